//! Search cache operations.
//!
//! Caches search results per canonical search key. Entries expire after the
//! search TTL and are additionally bounded by an item count and a total
//! payload size; when either bound is exceeded the least recently used
//! entries are evicted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

use super::access;
use super::connection::ConnectionManager;
use super::hash::{compute_checksum, verify_checksum};
use crate::Error;
use crate::clock::{Clock, from_millis};
use crate::keys::SearchType;
use crate::locks::KeyLocks;
use crate::retention::{Retained, RetentionPolicy};

/// Version of the serialized payload layout.
pub const SCHEMA_VERSION: i64 = 1;

/// Default maximum number of cached searches.
pub const MAX_CACHE_ITEMS: usize = 100;

/// Default maximum total payload size in bytes.
pub const MAX_CACHE_BYTES: usize = 5 * 1024 * 1024;

/// An artist returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistResult {
    pub name: String,
    pub path: String,
}

/// A song returned by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongResult {
    pub title: String,
    pub artist: String,
    pub path: String,
}

/// Results of one search: artists or songs, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum SearchResults {
    Artists(Vec<ArtistResult>),
    Songs(Vec<SongResult>),
}

impl SearchResults {
    pub fn len(&self) -> usize {
        match self {
            SearchResults::Artists(items) => items.len(),
            SearchResults::Songs(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What was searched and where the results came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDescriptor {
    pub search_type: SearchType,
    /// The query as the user typed it.
    pub query: String,
    pub data_source: String,
}

/// A cached search with its storage metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCacheEntry {
    pub search_key: String,
    pub results: SearchResults,
    pub search: SearchDescriptor,
    pub timestamp: DateTime<Utc>,
    pub schema_version: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    /// Size of the serialized results.
    pub byte_size: usize,
}

impl Retained for SearchCacheEntry {
    fn saved(&self) -> bool {
        false
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Input to [`SearchCache::store_results`].
#[derive(Debug, Clone)]
pub struct StoreSearch {
    pub search_key: String,
    pub results: SearchResults,
    pub search: SearchDescriptor,
}

/// Capacity bounds of the search cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchCacheLimits {
    pub max_items: usize,
    pub max_bytes: usize,
}

impl Default for SearchCacheLimits {
    fn default() -> Self {
        Self { max_items: MAX_CACHE_ITEMS, max_bytes: MAX_CACHE_BYTES }
    }
}

/// Entry count and payload total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    pub entries: i64,
    pub total_bytes: i64,
}

/// A row as stored, before validation.
struct RawEntry {
    search_key: String,
    search_type: String,
    query: String,
    data_source: String,
    results_json: String,
    checksum: String,
    byte_size: i64,
    schema_version: i64,
    timestamp: i64,
    last_accessed: i64,
    access_count: i64,
    expires_at: Option<i64>,
}

impl RawEntry {
    fn validate(self) -> Result<SearchCacheEntry, Error> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::RecordCorrupt(format!("unknown schema version {}", self.schema_version)));
        }
        if !verify_checksum(&self.search_key, &self.results_json, &self.checksum) {
            return Err(Error::RecordCorrupt("checksum mismatch".into()));
        }
        let search_type = SearchType::from_tag(&self.search_type)
            .ok_or_else(|| Error::RecordCorrupt(format!("unknown search type {}", self.search_type)))?;
        let results: SearchResults = serde_json::from_str(&self.results_json)
            .map_err(|e| Error::RecordCorrupt(format!("unreadable results: {e}")))?;

        Ok(SearchCacheEntry {
            search_key: self.search_key,
            results,
            search: SearchDescriptor { search_type, query: self.query, data_source: self.data_source },
            timestamp: from_millis(self.timestamp),
            schema_version: self.schema_version,
            expires_at: self.expires_at.map(from_millis),
            last_accessed: from_millis(self.last_accessed),
            access_count: self.access_count,
            byte_size: usize::try_from(self.byte_size).unwrap_or_default(),
        })
    }
}

fn select_entry(conn: &rusqlite::Connection, key: &str) -> rusqlite::Result<Option<RawEntry>> {
    let mut stmt = conn.prepare_cached(
        "SELECT search_key, search_type, query, data_source, results_json, checksum, byte_size,
                schema_version, timestamp, last_accessed, access_count, expires_at
         FROM search_cache WHERE search_key = ?1",
    )?;
    let result = stmt.query_row(params![key], |row| {
        Ok(RawEntry {
            search_key: row.get(0)?,
            search_type: row.get(1)?,
            query: row.get(2)?,
            data_source: row.get(3)?,
            results_json: row.get(4)?,
            checksum: row.get(5)?,
            byte_size: row.get(6)?,
            schema_version: row.get(7)?,
            timestamp: row.get(8)?,
            last_accessed: row.get(9)?,
            access_count: row.get(10)?,
            expires_at: row.get(11)?,
        })
    });

    match result {
        Ok(raw) => Ok(Some(raw)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn delete_entry(conn: &rusqlite::Connection, key: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM search_cache WHERE search_key = ?1", params![key])
}

fn totals(conn: &rusqlite::Connection) -> rusqlite::Result<SearchStats> {
    conn.query_row("SELECT COUNT(*), COALESCE(SUM(byte_size), 0) FROM search_cache", [], |row| {
        Ok(SearchStats { entries: row.get(0)?, total_bytes: row.get(1)? })
    })
}

enum Lookup {
    Missing,
    Expired,
    Corrupt(Error),
    Hit(SearchCacheEntry),
}

/// Capacity-bounded cache of search results.
#[derive(Debug)]
pub struct SearchCache {
    manager: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
    limits: SearchCacheLimits,
    locks: KeyLocks,
}

impl SearchCache {
    pub fn new(
        manager: Arc<ConnectionManager>, clock: Arc<dyn Clock>, policy: RetentionPolicy, limits: SearchCacheLimits,
    ) -> Self {
        Self { manager, clock, policy, limits, locks: KeyLocks::new() }
    }

    pub fn limits(&self) -> SearchCacheLimits {
        self.limits
    }

    /// Get a live cached search.
    ///
    /// Expired and corrupt entries are deleted and reported as a miss.
    pub async fn get(&self, search_key: &str) -> Result<Option<SearchCacheEntry>, Error> {
        if search_key.is_empty() {
            return Ok(None);
        }

        let _guard = self.locks.lock(search_key).await;
        let now = self.clock.now();
        let policy = self.policy;
        let key = search_key.to_string();

        let lookup = self
            .manager
            .call(move |conn| -> Result<Lookup, Error> {
                let Some(raw) = select_entry(conn, &key)? else {
                    return Ok(Lookup::Missing);
                };
                let mut entry = match raw.validate() {
                    Ok(entry) => entry,
                    Err(e) => {
                        delete_entry(conn, &key)?;
                        return Ok(Lookup::Corrupt(e));
                    }
                };
                if policy.is_expired(&entry, now) {
                    delete_entry(conn, &key)?;
                    return Ok(Lookup::Expired);
                }
                match access::touch_search(conn, &key, now) {
                    Ok(_) => {
                        entry.access_count += 1;
                        entry.last_accessed = now;
                    }
                    Err(e) => tracing::warn!(search_key = %key, error = %e, "failed to record search access"),
                }
                Ok(Lookup::Hit(entry))
            })
            .await?;

        match lookup {
            Lookup::Hit(entry) => {
                tracing::debug!(search_key = %search_key, results = entry.results.len(), "search cache hit");
                Ok(Some(entry))
            }
            Lookup::Expired => {
                tracing::info!(search_key = %search_key, "evicted expired search on read");
                Ok(None)
            }
            Lookup::Corrupt(e) => {
                tracing::warn!(search_key = %search_key, error = %e, "dropped corrupt search cache entry");
                Ok(None)
            }
            Lookup::Missing => {
                tracing::debug!(search_key = %search_key, "search cache miss");
                Ok(None)
            }
        }
    }

    /// Insert or replace a cached search, then enforce the capacity bounds.
    ///
    /// Returns the keys evicted to make room. The stored entry itself is
    /// never evicted.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` when the search key is not `<type tag>:<query>`
    ///   for the descriptor's search type
    /// - `Error::CapacityExceeded` when the payload alone exceeds the byte budget
    pub async fn store_results(&self, request: StoreSearch) -> Result<Vec<String>, Error> {
        let StoreSearch { search_key, results, search } = request;
        let tagged = search_key
            .split_once(':')
            .filter(|(_, body)| !body.is_empty())
            .and_then(|(tag, _)| SearchType::from_tag(tag));
        if tagged != Some(search.search_type) {
            return Err(Error::InvalidInput(format!(
                "search key {search_key:?} is not tagged for a {} search",
                search.search_type
            )));
        }

        let results_json = serde_json::to_string(&results)?;
        let size = results_json.len();
        if size > self.limits.max_bytes {
            return Err(Error::CapacityExceeded { size, max: self.limits.max_bytes });
        }

        let _guard = self.locks.lock(&search_key).await;
        let now = self.clock.now();
        let expires_at = now + self.policy.ttl;
        let limits = self.limits;
        let checksum = compute_checksum(&search_key, &results_json);
        let key = search_key.clone();

        let evicted = self
            .manager
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO search_cache (
                        search_key, search_type, query, data_source, results_json, checksum, byte_size,
                        schema_version, timestamp, last_accessed, access_count, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 0, ?10)
                    ON CONFLICT(search_key) DO UPDATE SET
                        search_type = excluded.search_type,
                        query = excluded.query,
                        data_source = excluded.data_source,
                        results_json = excluded.results_json,
                        checksum = excluded.checksum,
                        byte_size = excluded.byte_size,
                        schema_version = excluded.schema_version,
                        timestamp = excluded.timestamp,
                        last_accessed = excluded.last_accessed,
                        expires_at = excluded.expires_at",
                    params![
                        &key,
                        search.search_type.tag(),
                        &search.query,
                        &search.data_source,
                        &results_json,
                        &checksum,
                        size as i64,
                        SCHEMA_VERSION,
                        now.timestamp_millis(),
                        expires_at.timestamp_millis(),
                    ],
                )?;

                let mut evicted = Vec::new();
                loop {
                    let stats = totals(&tx)?;
                    if stats.entries as usize <= limits.max_items && stats.total_bytes as usize <= limits.max_bytes {
                        break;
                    }
                    let victim: Option<String> = match tx.query_row(
                        "SELECT search_key FROM search_cache
                         WHERE search_key != ?1
                         ORDER BY last_accessed ASC, timestamp ASC, search_key ASC
                         LIMIT 1",
                        params![&key],
                        |row| row.get(0),
                    ) {
                        Ok(victim) => Some(victim),
                        Err(rusqlite::Error::QueryReturnedNoRows) => None,
                        Err(e) => return Err(e.into()),
                    };
                    let Some(victim) = victim else { break };
                    delete_entry(&tx, &victim)?;
                    evicted.push(victim);
                }

                tx.commit()?;
                Ok(evicted)
            })
            .await?;

        if !evicted.is_empty() {
            tracing::info!(search_key = %search_key, evicted = evicted.len(), "evicted searches over capacity");
        }
        tracing::debug!(search_key = %search_key, bytes = size, "stored search results");
        Ok(evicted)
    }

    /// Delete expired search cache entries.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let now = self.clock.now().timestamp_millis();
        let deleted = self
            .manager
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM search_cache WHERE expires_at IS NOT NULL AND expires_at < ?1",
                    params![now],
                )?;
                Ok(count as u64)
            })
            .await?;

        if deleted > 0 {
            tracing::info!(deleted, "purged expired searches");
        }
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<SearchStats, Error> {
        self.manager
            .call(|conn| -> Result<SearchStats, Error> { Ok(totals(conn)?) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::keys::search_key;
    use crate::retention::SEARCH_TTL;
    use chrono::Duration;

    fn cache_with(limits: SearchCacheLimits) -> (SearchCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = SearchCache::new(
            Arc::new(ConnectionManager::in_memory()),
            clock.clone(),
            RetentionPolicy::search_cache(),
            limits,
        );
        (cache, clock)
    }

    fn artist_search(name: &str) -> StoreSearch {
        StoreSearch {
            search_key: search_key(SearchType::Artist, name, ""),
            results: SearchResults::Artists(vec![ArtistResult { name: name.to_string(), path: name.to_lowercase() }]),
            search: SearchDescriptor {
                search_type: SearchType::Artist,
                query: name.to_string(),
                data_source: "test".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_store_and_get() {
        let (cache, _clock) = cache_with(SearchCacheLimits::default());
        let request = artist_search("Oasis");
        cache.store_results(request.clone()).await.unwrap();

        let entry = cache.get("artist:oasis").await.unwrap().unwrap();
        assert_eq!(entry.results, request.results);
        assert_eq!(entry.search, request.search);
        assert_eq!(entry.schema_version, SCHEMA_VERSION);
        assert_eq!(entry.expires_at, Some(from_millis(0) + SEARCH_TTL));
        assert_eq!(entry.access_count, 1);
    }

    #[tokio::test]
    async fn test_get_missing_search() {
        let (cache, _clock) = cache_with(SearchCacheLimits::default());
        assert!(cache.get("artist:nobody").await.unwrap().is_none());
        assert!(cache.get("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_search() {
        let (cache, _clock) = cache_with(SearchCacheLimits::default());
        cache.store_results(artist_search("Oasis")).await.unwrap();

        let songs = SearchResults::Songs(vec![SongResult {
            title: "Wonderwall".into(),
            artist: "Oasis".into(),
            path: "oasis-wonderwall".into(),
        }]);
        let request = StoreSearch { results: songs.clone(), ..artist_search("Oasis") };
        cache.store_results(request).await.unwrap();

        let entry = cache.get("artist:oasis").await.unwrap().unwrap();
        assert_eq!(entry.results, songs);
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_search_expires_after_ttl() {
        let (cache, clock) = cache_with(SearchCacheLimits::default());
        cache.store_results(artist_search("Oasis")).await.unwrap();

        clock.advance(SEARCH_TTL);
        assert!(cache.get("artist:oasis").await.unwrap().is_some());

        clock.advance(Duration::milliseconds(1));
        assert!(cache.get("artist:oasis").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let (cache, _clock) = cache_with(SearchCacheLimits::default());
        let request = StoreSearch { search_key: String::new(), ..artist_search("Oasis") };
        assert!(matches!(cache.store_results(request).await, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_key_must_match_search_type() {
        let (cache, _clock) = cache_with(SearchCacheLimits::default());
        for key in ["oasis", "artist:", "album:oasis", "song:oasis"] {
            let request = StoreSearch { search_key: key.into(), ..artist_search("Oasis") };
            assert!(matches!(cache.store_results(request).await, Err(Error::InvalidInput(_))), "{key}");
        }
        assert_eq!(cache.stats().await.unwrap().entries, 0);

        let request = StoreSearch { search_key: "artist:oasis".into(), ..artist_search("Oasis") };
        cache.store_results(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_count_bound_evicts_one() {
        let (cache, clock) = cache_with(SearchCacheLimits { max_items: 3, max_bytes: MAX_CACHE_BYTES });
        for name in ["a", "b", "c"] {
            cache.store_results(artist_search(name)).await.unwrap();
            clock.advance(Duration::seconds(1));
        }

        let evicted = cache.store_results(artist_search("d")).await.unwrap();
        assert_eq!(evicted, ["artist:a"]);
        assert_eq!(cache.stats().await.unwrap().entries, 3);
    }

    #[tokio::test]
    async fn test_eviction_prefers_least_recently_accessed() {
        let (cache, clock) = cache_with(SearchCacheLimits { max_items: 2, max_bytes: MAX_CACHE_BYTES });
        cache.store_results(artist_search("a")).await.unwrap();
        clock.advance(Duration::seconds(1));
        cache.store_results(artist_search("b")).await.unwrap();
        clock.advance(Duration::seconds(1));

        // "a" is older but was read more recently than "b".
        cache.get("artist:a").await.unwrap();
        clock.advance(Duration::seconds(1));

        let evicted = cache.store_results(artist_search("c")).await.unwrap();
        assert_eq!(evicted, ["artist:b"]);
        assert!(cache.get("artist:a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_byte_bound_evicts_until_satisfied() {
        let one = serde_json::to_string(&artist_search("a").results).unwrap().len();
        let (cache, clock) = cache_with(SearchCacheLimits { max_items: 100, max_bytes: one * 2 });

        cache.store_results(artist_search("a")).await.unwrap();
        clock.advance(Duration::seconds(1));
        cache.store_results(artist_search("b")).await.unwrap();
        clock.advance(Duration::seconds(1));

        let evicted = cache.store_results(artist_search("c")).await.unwrap();
        assert_eq!(evicted, ["artist:a"]);
        let stats = cache.stats().await.unwrap();
        assert!(stats.total_bytes as usize <= one * 2);
    }

    #[tokio::test]
    async fn test_oversized_entry_is_rejected() {
        let (cache, _clock) = cache_with(SearchCacheLimits { max_items: 10, max_bytes: 40 });
        cache.store_results(StoreSearch {
            results: SearchResults::Artists(Vec::new()),
            ..artist_search("x")
        })
        .await
        .unwrap();

        let result = cache.store_results(artist_search("Oasis")).await;
        assert!(matches!(result, Err(Error::CapacityExceeded { max: 40, .. })));
        assert_eq!(cache.stats().await.unwrap().entries, 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_dropped() {
        let (cache, _clock) = cache_with(SearchCacheLimits::default());
        cache.store_results(artist_search("Oasis")).await.unwrap();

        cache
            .manager
            .call(|conn| -> Result<usize, Error> {
                Ok(conn.execute("UPDATE search_cache SET results_json = '{not json' WHERE search_key = 'artist:oasis'", [])?)
            })
            .await
            .unwrap();

        assert!(cache.get("artist:oasis").await.unwrap().is_none());
        assert_eq!(cache.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_unknown_schema_version_is_dropped() {
        let (cache, _clock) = cache_with(SearchCacheLimits::default());
        cache.store_results(artist_search("Oasis")).await.unwrap();

        cache
            .manager
            .call(|conn| -> Result<usize, Error> { Ok(conn.execute("UPDATE search_cache SET schema_version = 99", [])?) })
            .await
            .unwrap();

        assert!(cache.get("artist:oasis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_search() {
        let (cache, clock) = cache_with(SearchCacheLimits::default());
        cache.store_results(artist_search("old")).await.unwrap();
        clock.advance(Duration::days(20));
        cache.store_results(artist_search("fresh")).await.unwrap();
        clock.advance(Duration::days(11));

        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.get("artist:old").await.unwrap().is_none());
        assert!(cache.get("artist:fresh").await.unwrap().is_some());
    }
}
