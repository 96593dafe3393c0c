//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PANORAMA_*, nested keys split on `__`)
//! 2. TOML config file (if PANORAMA_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Maximum number of rows a results query is allowed to render.
pub const DEFAULT_MAX_ITEMS: usize = 20_000;

/// Maximum number of distinct options offered for one disaggregation.
pub const DEFAULT_MAX_REPLICANT_OPTIONS: usize = 100;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PANORAMA_*)
/// 2. TOML config file (if PANORAMA_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Redis-compatible URL for the server-side cache.
    ///
    /// Set via PANORAMA_REDIS_URL. When absent, server-side caching is disabled.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix inserted into server cache keys (`cache:<prefix>:<hash>`).
    #[serde(default = "default_cache_prefix")]
    pub cache_prefix: String,

    /// Path to the SQLite file backing the durable client cache.
    #[serde(default = "default_client_cache_path")]
    pub client_cache_path: PathBuf,

    /// Number of resolved entries the client cache keeps in memory.
    #[serde(default = "default_client_cache_capacity")]
    pub client_cache_capacity: usize,

    /// Largest result set a caller will render; queries fetch one extra row.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Largest option list the possible-values resolver will return.
    #[serde(default = "default_max_replicant_options")]
    pub max_replicant_options: usize,

    /// Analytics database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Postgres connection and pool settings.
///
/// Static defaults; call sites may override pool sizing per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Name of the instance-level database holding instance configuration.
    #[serde(default = "default_main_database")]
    pub main_database: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Seconds a cached pool may sit unused before the sweep closes it.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Seconds after which a cached pool is closed regardless of use.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Interval between sweeps of the connection cache.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_cache_prefix() -> String {
    "panorama".into()
}

fn default_client_cache_path() -> PathBuf {
    PathBuf::from("./panorama-cache.sqlite")
}

fn default_client_cache_capacity() -> usize {
    100
}

fn default_max_items() -> usize {
    DEFAULT_MAX_ITEMS
}

fn default_max_replicant_options() -> usize {
    DEFAULT_MAX_REPLICANT_OPTIONS
}

fn default_db_host() -> String {
    "localhost".into()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_user() -> String {
    "postgres".into()
}

fn default_main_database() -> String {
    "main".into()
}

fn default_max_connections() -> usize {
    10
}

fn default_idle_timeout_secs() -> u64 {
    5 * 60
}

fn default_max_age_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_statement_timeout_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: None,
            main_database: default_main_database(),
            max_connections: default_max_connections(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_age_secs: default_max_age_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            statement_timeout_ms: default_statement_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            cache_prefix: default_cache_prefix(),
            client_cache_path: default_client_cache_path(),
            client_cache_capacity: default_client_cache_capacity(),
            max_items: default_max_items(),
            max_replicant_options: default_max_replicant_options(),
            database: DatabaseConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PANORAMA_`
    /// 2. TOML file from `PANORAMA_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PANORAMA_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PANORAMA_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Redis URL, or `None` when server-side caching is disabled.
    pub fn redis_url(&self) -> Option<&str> {
        self.redis_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}
