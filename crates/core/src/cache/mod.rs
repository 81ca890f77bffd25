//! SQLite-backed storage for chord sheets and search results.
//!
//! Both stores share one lazily opened connection through
//! [`ConnectionManager`] and run on tokio-rusqlite's single worker thread.
//! The module provides:
//!
//! - The chord-sheet store with saved/cached retention and soft delete
//! - A bounded search-result cache with recency eviction
//! - Access tracking on reads
//! - A duplicate cleanup pass for records written under legacy keys
//! - Automatic schema migrations

pub mod access;
pub mod connection;
pub mod dedupe;
pub mod hash;
pub mod migrations;
pub mod search;
pub mod sheets;

pub use crate::Error;

pub use connection::{CacheDb, ConnectionManager, StoreLocation};
pub use dedupe::{CleanupReport, DuplicateCleaner, DuplicateGroup};
pub use search::{
    ArtistResult, SearchCache, SearchCacheEntry, SearchCacheLimits, SearchDescriptor, SearchResults, SearchStats,
    SongResult, StoreSearch,
};
pub use sheets::{ChordSheet, ChordSheetRecord, ChordSheetStore, DeleteOutcome, SheetPath, SheetStats};
