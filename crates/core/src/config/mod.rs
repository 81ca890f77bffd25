//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (CHORDCACHE_*)
//! 2. TOML config file (if CHORDCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use chrono::Duration;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::cache::SearchCacheLimits;
use crate::retention::RetentionPolicy;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (CHORDCACHE_*)
/// 2. TOML config file (if CHORDCACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite store.
    ///
    /// Set via CHORDCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Keep everything in memory and ignore `db_path`.
    ///
    /// Set via CHORDCACHE_IN_MEMORY environment variable.
    #[serde(default)]
    pub in_memory: bool,

    /// Lifetime of an unsaved chord sheet, in hours.
    ///
    /// Set via CHORDCACHE_CACHED_TTL_HOURS environment variable.
    #[serde(default = "default_cached_ttl_hours")]
    pub cached_ttl_hours: u32,

    /// Lifetime of a search-cache entry, in hours.
    ///
    /// Set via CHORDCACHE_SEARCH_TTL_HOURS environment variable.
    #[serde(default = "default_search_ttl_hours")]
    pub search_ttl_hours: u32,

    /// Undo window after a soft delete, in hours.
    ///
    /// Set via CHORDCACHE_GRACE_PERIOD_HOURS environment variable.
    #[serde(default = "default_grace_period_hours")]
    pub grace_period_hours: u32,

    /// Search-cache entry count bound.
    ///
    /// Set via CHORDCACHE_MAX_CACHE_ITEMS environment variable.
    #[serde(default = "default_max_cache_items")]
    pub max_cache_items: usize,

    /// Search-cache payload byte bound.
    ///
    /// Set via CHORDCACHE_MAX_CACHE_BYTES environment variable.
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: usize,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./chordcache.sqlite")
}

fn default_cached_ttl_hours() -> u32 {
    7 * 24
}

fn default_search_ttl_hours() -> u32 {
    30 * 24
}

fn default_grace_period_hours() -> u32 {
    24
}

fn default_max_cache_items() -> usize {
    100
}

fn default_max_cache_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            in_memory: false,
            cached_ttl_hours: default_cached_ttl_hours(),
            search_ttl_hours: default_search_ttl_hours(),
            grace_period_hours: default_grace_period_hours(),
            max_cache_items: default_max_cache_items(),
            max_cache_bytes: default_max_cache_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `CHORDCACHE_`
    /// 2. TOML file from `CHORDCACHE_CONFIG_FILE` (if set)
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

        if let Ok(config_path) = std::env::var("CHORDCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("CHORDCACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Retention rules for the chord-sheet store.
    pub fn sheet_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(
            Duration::hours(i64::from(self.cached_ttl_hours)),
            Duration::hours(i64::from(self.grace_period_hours)),
        )
    }

    /// Retention rules for the search cache.
    pub fn search_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(
            Duration::hours(i64::from(self.search_ttl_hours)),
            Duration::hours(i64::from(self.grace_period_hours)),
        )
    }

    pub fn search_limits(&self) -> SearchCacheLimits {
        SearchCacheLimits { max_items: self.max_cache_items, max_bytes: self.max_cache_bytes }
    }
}
