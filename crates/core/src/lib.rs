//! Local cache engine for chord sheets and chord-site search results.
//!
//! This crate provides:
//! - Canonical keys for artist/title pairs and searches
//! - A SQLite-backed chord-sheet store with saved and cached retention
//! - A bounded search-result cache
//! - A duplicate cleanup pass
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod locks;
pub mod retention;
pub mod source;

pub use cache::{
    CacheDb, ChordSheet, ChordSheetRecord, ChordSheetStore, CleanupReport, ConnectionManager, SearchCache,
    SearchCacheEntry, SearchResults,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use engine::{CacheStats, ChordCache, PurgeReport};
pub use error::Error;
pub use keys::{SearchType, normalize_key, search_key};
pub use retention::RetentionPolicy;
pub use source::{ChordSheetSource, SearchSource, SourceError};
