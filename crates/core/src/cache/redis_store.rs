//! Redis-backed durable store for the server cache variant.
//!
//! Caching on the server is always optional. Every Redis failure is logged
//! and reported as a miss (reads) or silently skipped (writes); nothing here
//! ever surfaces an error to the request that triggered it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::entry::StoredEntry;
use super::store::DurableStore;
use crate::Error;

/// Base TTL applied on write.
pub const WRITE_TTL_BASE: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// Upper bound of the random jitter added on write.
pub const WRITE_TTL_JITTER: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// TTL a successful read refreshes the key to.
pub const READ_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Key of an entry in the server cache.
pub fn server_store_key(prefix: &str, uniqueness_hash: &str) -> String {
    format!("cache:{prefix}:{uniqueness_hash}")
}

/// Write TTL: base plus a uniform jitter so keys written together do not
/// expire together.
pub fn write_ttl_secs() -> u64 {
    let jitter = rand::rng().random_range(0..WRITE_TTL_JITTER.as_secs());
    WRITE_TTL_BASE.as_secs() + jitter
}

/// Server cache store.
#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").field("redis", &"<ConnectionManager>").finish()
    }
}

impl RedisStore {
    /// Connect to the given Redis URL.
    ///
    /// Returns `None` (after logging) if no URL is configured or the server
    /// cannot be reached; callers then run without a server cache.
    pub async fn connect(redis_url: Option<&str>) -> Option<Self> {
        let Some(url) = redis_url else {
            tracing::info!("no redis url configured; server-side caching disabled");
            return None;
        };

        let client = match redis::Client::open(url) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "invalid redis url; server-side caching disabled");
                return None;
            }
        };

        match ConnectionManager::new(client).await {
            Ok(redis) => {
                tracing::info!("server-side cache connected");
                Some(Self { redis })
            }
            Err(e) => {
                tracing::warn!(error = %e, "redis unreachable; server-side caching disabled");
                None
            }
        }
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn read(&self, namespace: &str, uniqueness_hash: &str) -> Result<Option<StoredEntry>, Error> {
        let key = server_store_key(namespace, uniqueness_hash);
        let mut redis = self.redis.clone();

        let json: Option<String> = match redis.get(&key).await {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "redis get failed");
                return Ok(None);
            }
        };

        let Some(json) = json else {
            return Ok(None);
        };

        let entry = match serde_json::from_str::<StoredEntry>(&json) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "corrupt server cache entry; treating as miss");
                return Ok(None);
            }
        };

        let refreshed: Result<bool, _> = redis.expire(&key, READ_TTL.as_secs() as i64).await;
        if let Err(e) = refreshed {
            tracing::warn!(key = %key, error = %e, "redis expire failed");
        }

        Ok(Some(entry))
    }

    async fn write(&self, namespace: &str, entry: &StoredEntry) -> Result<(), Error> {
        let key = server_store_key(namespace, &entry.uniqueness_hash);
        let json = serde_json::to_string(entry)?;

        let result: Result<(), _> = self.redis.clone().set_ex(&key, json, write_ttl_secs()).await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "redis set failed");
        }
        Ok(())
    }

    async fn remove(&self, namespace: &str, uniqueness_hash: &str) -> Result<(), Error> {
        let key = server_store_key(namespace, uniqueness_hash);
        let result: Result<(), _> = self.redis.clone().del(&key).await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "redis del failed");
        }
        Ok(())
    }

    async fn remove_all(&self, namespace: &str) -> Result<u64, Error> {
        let pattern = server_store_key(namespace, "*");
        let mut redis = self.redis.clone();
        let mut cursor = 0u64;
        let mut deleted = 0u64;

        loop {
            let result: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut redis)
                .await;

            match result {
                Ok((next_cursor, keys)) => {
                    if !keys.is_empty() {
                        let removed: Result<u64, _> = redis.del(&keys).await;
                        match removed {
                            Ok(n) => deleted += n,
                            Err(e) => tracing::warn!(pattern = %pattern, error = %e, "redis del failed"),
                        }
                    }
                    cursor = next_cursor;
                    if cursor == 0 {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "redis scan failed");
                    break;
                }
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_store_key() {
        assert_eq!(server_store_key("results", "abc"), "cache:results:abc");
    }

    #[test]
    fn test_write_ttl_within_jitter_window() {
        for _ in 0..200 {
            let ttl = write_ttl_secs();
            assert!(ttl >= WRITE_TTL_BASE.as_secs());
            assert!(ttl < WRITE_TTL_BASE.as_secs() + WRITE_TTL_JITTER.as_secs());
        }
    }

    #[tokio::test]
    async fn test_connect_without_url_disables_cache() {
        assert!(RedisStore::connect(None).await.is_none());
    }

    #[tokio::test]
    async fn test_connect_with_invalid_url_disables_cache() {
        assert!(RedisStore::connect(Some("not a url")).await.is_none());
    }
}
