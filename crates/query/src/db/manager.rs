//! Pooled Postgres connections keyed by database and permission level.
//!
//! Shared pools live in a mutex-guarded map and are closed by a periodic
//! sweep once they exceed the maximum age or sit idle too long. Pools
//! handed out by [`ConnectionManager::get_connection`] are never cached;
//! the caller owns and closes them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use panorama_core::Error;
use panorama_core::config::DatabaseConfig;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::NoTls;

/// Access level a pool connects with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// Per-call overrides of the static pool settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionOptions {
    pub permissions: Option<Permissions>,
    pub max_connections: Option<usize>,
    pub statement_timeout: Option<Duration>,
}

struct PooledConnection {
    pool: Pool,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
}

/// Bookkeeping of one cached pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub created_at: Instant,
    pub last_used: Instant,
    pub use_count: u64,
}

type PoolKey = (String, Permissions);

pub struct ConnectionManager {
    config: DatabaseConfig,
    cached: Mutex<HashMap<PoolKey, PooledConnection>>,
}

impl ConnectionManager {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config, cached: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// A fresh pool the caller owns; never shared or swept.
    pub fn get_connection(&self, database_id: &str, options: ConnectionOptions) -> Result<Pool, Error> {
        tracing::debug!(database_id, "creating uncached pool");
        self.create_pool(database_id, options)
    }

    /// The shared pool for `(database_id, permissions)`, created on first use.
    pub fn get_connection_from_cache_or_new(&self, database_id: &str, permissions: Permissions) -> Result<Pool, Error> {
        let key = (database_id.to_string(), permissions);
        let now = Instant::now();
        let mut cached = self.cached.lock();

        if let Some(entry) = cached.get_mut(&key) {
            entry.last_used = now;
            entry.use_count += 1;
            return Ok(entry.pool.clone());
        }

        let options = ConnectionOptions { permissions: Some(permissions), ..Default::default() };
        let pool = self.create_pool(database_id, options)?;
        tracing::info!(database_id, ?permissions, "created cached pool");
        cached.insert(key, PooledConnection { pool: pool.clone(), created_at: now, last_used: now, use_count: 1 });
        Ok(pool)
    }

    pub fn stats(&self, database_id: &str, permissions: Permissions) -> Option<PoolStats> {
        self.cached.lock().get(&(database_id.to_string(), permissions)).map(|entry| PoolStats {
            created_at: entry.created_at,
            last_used: entry.last_used,
            use_count: entry.use_count,
        })
    }

    pub fn cached_count(&self) -> usize {
        self.cached.lock().len()
    }

    /// Close cached pools that are too old or idle as of `now`. Returns how
    /// many were closed.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let max_age = self.config.max_age();
        let idle_timeout = self.config.idle_timeout();
        let mut cached = self.cached.lock();
        let before = cached.len();

        cached.retain(|(database_id, permissions), entry| {
            let too_old = now.saturating_duration_since(entry.created_at) > max_age;
            let idle = now.saturating_duration_since(entry.last_used) > idle_timeout;
            if too_old || idle {
                tracing::info!(database_id, ?permissions, too_old, idle, uses = entry.use_count, "closing stale pool");
                entry.pool.close();
                false
            } else {
                true
            }
        });

        before - cached.len()
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Run [`sweep`](Self::sweep) on the configured interval until the
    /// manager is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(manager) = manager.upgrade() else { break };
                let closed = manager.sweep();
                if closed > 0 {
                    tracing::debug!(closed, remaining = manager.cached_count(), "connection sweep");
                }
            }
        })
    }

    /// Close the cached pools for `database_id`, or only the one with the
    /// given permissions.
    pub fn close_connection(&self, database_id: &str, permissions: Option<Permissions>) -> usize {
        let mut cached = self.cached.lock();
        let before = cached.len();
        cached.retain(|(id, perms), entry| {
            let matches = id == database_id && permissions.is_none_or(|p| p == *perms);
            if matches {
                entry.pool.close();
            }
            !matches
        });
        before - cached.len()
    }

    pub fn close_all(&self) -> usize {
        let mut cached = self.cached.lock();
        let closed = cached.len();
        for (_, entry) in cached.drain() {
            entry.pool.close();
        }
        tracing::info!(closed, "closed all cached pools");
        closed
    }

    fn create_pool(&self, database_id: &str, options: ConnectionOptions) -> Result<Pool, Error> {
        let statement_timeout = options.statement_timeout.unwrap_or_else(|| self.config.statement_timeout());
        let mut session = format!("-c statement_timeout={}", statement_timeout.as_millis());
        if options.permissions == Some(Permissions::ReadOnly) {
            session.push_str(" -c default_transaction_read_only=on");
        }

        let mut cfg = Config::new();
        cfg.host = Some(self.config.host.clone());
        cfg.port = Some(self.config.port);
        cfg.user = Some(self.config.user.clone());
        cfg.password = self.config.password.clone();
        cfg.dbname = Some(database_id.to_string());
        cfg.options = Some(session);
        cfg.connect_timeout = Some(self.config.connect_timeout());
        cfg.pool = Some(PoolConfig::new(options.max_connections.unwrap_or(self.config.max_connections)));
        cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::ConnectionFailed(format!("failed to create pool for {database_id}: {e}")))
    }
}
