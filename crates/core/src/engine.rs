//! Application-root facade.
//!
//! [`ChordCache`] owns the connection manager, both stores and the duplicate
//! cleaner, and wires them to one clock and one configuration. The
//! read-through helpers put the stores in front of a remote source: a cache
//! failure is logged and the fetched content is still returned.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::cache::{
    ChordSheet, ChordSheetStore, CleanupReport, ConnectionManager, DuplicateCleaner, SearchCache, SearchDescriptor,
    SearchResults, SearchStats, SheetPath, SheetStats, StoreLocation, StoreSearch,
};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::keys::{SearchType, normalize_key, search_key};
use crate::source::{ChordSheetSource, SearchSource};

/// Rows removed by an expiration sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub sheets: u64,
    pub searches: u64,
}

/// Counters across both stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub sheets: SheetStats,
    pub search: SearchStats,
    /// The configured file could not be opened and the session runs in memory.
    pub degraded: bool,
}

#[derive(Debug)]
pub struct ChordCache {
    manager: Arc<ConnectionManager>,
    sheets: Arc<ChordSheetStore>,
    search: SearchCache,
    cleaner: DuplicateCleaner,
}

impl ChordCache {
    /// Build the engine from configuration using the wall clock.
    ///
    /// Nothing is opened until the first operation.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let location = if config.in_memory {
            StoreLocation::InMemory
        } else {
            StoreLocation::File(config.db_path.clone())
        };
        let manager = Arc::new(ConnectionManager::new(location));

        let sheets = Arc::new(ChordSheetStore::new(Arc::clone(&manager), Arc::clone(&clock), config.sheet_policy()));
        let search = SearchCache::new(Arc::clone(&manager), clock, config.search_policy(), config.search_limits());
        let cleaner = DuplicateCleaner::new(Arc::clone(&sheets));

        Self { manager, sheets, search, cleaner }
    }

    /// In-memory engine with default policies.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::with_clock(&AppConfig { in_memory: true, ..Default::default() }, clock)
    }

    pub fn sheets(&self) -> &ChordSheetStore {
        &self.sheets
    }

    pub fn search_cache(&self) -> &SearchCache {
        &self.search
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    pub async fn run_duplicate_cleanup(&self) -> Result<CleanupReport, Error> {
        self.cleaner.run_duplicate_cleanup().await
    }

    /// Remove expired rows from both stores.
    pub async fn purge_expired(&self) -> Result<PurgeReport, Error> {
        let sheets = self.sheets.purge_expired().await?;
        let searches = self.search.purge_expired().await?;
        Ok(PurgeReport { sheets, searches })
    }

    pub async fn stats(&self) -> Result<CacheStats, Error> {
        let sheets = self.sheets.stats().await?;
        let search = self.search.stats().await?;
        Ok(CacheStats { sheets, search, degraded: self.manager.is_degraded() })
    }

    pub async fn close(&self) {
        self.manager.close().await;
    }

    /// Read-through lookup of a chord sheet.
    ///
    /// A live cached record is returned without touching `source`. On a miss
    /// the sheet is fetched and cached unsaved. Returns `None` when the pair
    /// has no usable key or the source has no sheet for it.
    ///
    /// # Errors
    ///
    /// Only `Error::Source`; storage failures are logged.
    pub async fn chord_sheet(
        &self, source: &dyn ChordSheetSource, artist: &str, title: &str,
    ) -> Result<Option<ChordSheet>, Error> {
        let key = normalize_key(artist, title);
        if key.is_empty() {
            tracing::debug!(artist = %artist, title = %title, "chord sheet request without usable artist or title");
            return Ok(None);
        }

        match self.sheets.get(key.as_str()).await {
            Ok(Some(record)) => return Ok(Some(record.sheet)),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %key, error = %e, "chord sheet cache read failed, fetching"),
        }

        let Some(sheet) = source.fetch_chord_sheet(&key).await.map_err(Error::Source)? else {
            tracing::debug!(path = %key, "source has no chord sheet");
            return Ok(None);
        };

        if let Err(e) = self.sheets.put(&sheet, false, Some(SheetPath::Key(key.clone()))).await {
            tracing::warn!(path = %key, error = %e, "failed to cache fetched chord sheet");
        }
        Ok(Some(sheet))
    }

    /// Read-through search.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` when the search type's required parts are missing
    /// - `Error::Source` when the source fails on a miss
    pub async fn search(
        &self, source: &dyn SearchSource, search_type: SearchType, artist: &str, song: &str,
    ) -> Result<SearchResults, Error> {
        let key = search_key(search_type, artist, song);
        if key.is_empty() {
            return Err(Error::InvalidInput(format!("{search_type} search is missing its query")));
        }

        match self.search.get(&key).await {
            Ok(Some(entry)) => return Ok(entry.results),
            Ok(None) => {}
            Err(e) => tracing::warn!(search_key = %key, error = %e, "search cache read failed, fetching"),
        }

        let query = match search_type {
            SearchType::Artist | SearchType::ArtistSongs => artist.trim().to_string(),
            SearchType::Song => song.trim().to_string(),
            SearchType::ArtistSong => format!("{} {}", artist.trim(), song.trim()),
        };
        let results = source.fetch_search_results(&query, search_type).await.map_err(Error::Source)?;

        let request = StoreSearch {
            search_key: key.clone(),
            results: results.clone(),
            search: SearchDescriptor { search_type, query, data_source: source.data_source().to_string() },
        };
        if let Err(e) = self.search.store_results(request).await {
            tracing::warn!(search_key = %key, error = %e, "failed to cache search results");
        }
        Ok(results)
    }
}
