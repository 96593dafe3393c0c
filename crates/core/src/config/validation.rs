//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `client_cache_capacity`, `max_items` or `max_replicant_options` is 0
    /// - `cache_prefix` is empty or contains `:`
    /// - `database.max_connections` is 0
    /// - `database.statement_timeout_ms` is under 1s or exceeds 1 hour
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_cache_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "client_cache_capacity".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.max_items == 0 {
            return Err(ConfigError::Invalid { field: "max_items".into(), reason: "must be greater than 0".into() });
        }

        if self.max_replicant_options == 0 {
            return Err(ConfigError::Invalid {
                field: "max_replicant_options".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.cache_prefix.is_empty() || self.cache_prefix.contains(':') {
            return Err(ConfigError::Invalid {
                field: "cache_prefix".into(),
                reason: "must be non-empty and must not contain ':'".into(),
            });
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "database.max_connections".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.database.statement_timeout_ms < 1_000 {
            return Err(ConfigError::Invalid {
                field: "database.statement_timeout_ms".into(),
                reason: "must be at least 1000ms".into(),
            });
        }
        if self.database.statement_timeout_ms > 3_600_000 {
            return Err(ConfigError::Invalid {
                field: "database.statement_timeout_ms".into(),
                reason: "must not exceed 1 hour (3600000ms)".into(),
            });
        }

        if self.database.idle_timeout_secs > self.database.max_age_secs {
            tracing::warn!(
                idle_timeout_secs = self.database.idle_timeout_secs,
                max_age_secs = self.database.max_age_secs,
                "idle timeout exceeds max connection age; \
                 max age will close connections first"
            );
        }

        Ok(())
    }
}
