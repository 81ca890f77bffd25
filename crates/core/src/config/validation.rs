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
    /// - a TTL or the grace period is 0
    /// - `max_cache_items` or `max_cache_bytes` is 0
    /// - `max_cache_bytes` exceeds 100MB
    /// - `db_path` is empty while the store is file-backed
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, hours) in [
            ("cached_ttl_hours", self.cached_ttl_hours),
            ("search_ttl_hours", self.search_ttl_hours),
            ("grace_period_hours", self.grace_period_hours),
        ] {
            if hours == 0 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be at least 1 hour".into() });
            }
        }

        if self.max_cache_items == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cache_items".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_cache_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cache_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_cache_bytes > 100 * 1024 * 1024 {
            return Err(ConfigError::Invalid {
                field: "max_cache_bytes".into(),
                reason: "must not exceed 100MB".into(),
            });
        }

        if !self.in_memory && self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "db_path".into(), reason: "must not be empty".into() });
        }

        if self.grace_period_hours > self.cached_ttl_hours {
            tracing::warn!(
                grace_period_hours = self.grace_period_hours,
                cached_ttl_hours = self.cached_ttl_hours,
                "grace period is longer than the chord sheet TTL"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let config = AppConfig { search_ttl_hours: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "search_ttl_hours"));
    }

    #[test]
    fn test_validate_zero_grace() {
        let config = AppConfig { grace_period_hours: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "grace_period_hours"));
    }

    #[test]
    fn test_validate_zero_bounds() {
        let config = AppConfig { max_cache_items: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "max_cache_items"));

        let config = AppConfig { max_cache_bytes: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "max_cache_bytes"));
    }

    #[test]
    fn test_validate_byte_budget_ceiling() {
        let config = AppConfig { max_cache_bytes: 101 * 1024 * 1024, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "max_cache_bytes"));

        let config = AppConfig { max_cache_bytes: 100 * 1024 * 1024, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_db_path() {
        let config = AppConfig { db_path: PathBuf::new(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "db_path"));

        let config = AppConfig { db_path: PathBuf::new(), in_memory: true, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_minimum_values() {
        let config = AppConfig {
            cached_ttl_hours: 1,
            search_ttl_hours: 1,
            grace_period_hours: 1,
            max_cache_items: 1,
            max_cache_bytes: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
