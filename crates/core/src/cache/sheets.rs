//! Chord sheet store.
//!
//! Persists chord sheets under their canonical `artist-title` key and keeps
//! the retention metadata consistent with [`RetentionPolicy`]:
//!
//! - lookups evict expired records before reporting a miss
//! - live hits bump the access metadata
//! - writes merge into an existing record instead of replacing it
//! - deletes of unsaved records are soft for one grace period

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

use super::access;
use super::connection::ConnectionManager;
use crate::Error;
use crate::clock::{Clock, from_millis};
use crate::keys::{SEGMENT_SEPARATOR, canonicalize_path, normalize_key, normalize_segment};
use crate::locks::KeyLocks;
use crate::retention::{Retained, RetentionPolicy};

/// Content of a chord sheet as produced by the fetch collaborator.
///
/// An empty string means the field is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordSheet {
    pub title: String,
    pub artist: String,
    /// Chords and lyrics.
    pub song_chords: String,
    /// Musical key, e.g. `G` or `Am`.
    pub song_key: String,
    pub tuning: String,
    pub capo: String,
}

impl ChordSheet {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self { artist: artist.into(), title: title.into(), ..Default::default() }
    }

    pub fn with_chords(mut self, chords: impl Into<String>) -> Self {
        self.song_chords = chords.into();
        self
    }

    fn fields(&self) -> [&String; 6] {
        [&self.title, &self.artist, &self.song_chords, &self.song_key, &self.tuning, &self.capo]
    }

    fn fields_mut(&mut self) -> [&mut String; 6] {
        [
            &mut self.title,
            &mut self.artist,
            &mut self.song_chords,
            &mut self.song_key,
            &mut self.tuning,
            &mut self.capo,
        ]
    }

    /// Merge `incoming` into `self` field by field.
    ///
    /// Empty incoming fields never overwrite anything. Non-empty incoming
    /// fields fill empty fields, and replace populated ones only when
    /// `overwrite` is set. Returns whether anything changed.
    pub fn merge_from(&mut self, incoming: &ChordSheet, overwrite: bool) -> bool {
        let mut changed = false;
        for (current, new) in self.fields_mut().into_iter().zip(incoming.fields()) {
            if new.is_empty() || current == new {
                continue;
            }
            if current.is_empty() || overwrite {
                current.clone_from(new);
                changed = true;
            }
        }
        changed
    }

    /// Fill an artist or title that has no usable text from the segments of
    /// the canonical `key` it is stored under.
    pub(crate) fn fill_identity_from_key(&mut self, key: &str) {
        let Some((artist, title)) = key.split_once(SEGMENT_SEPARATOR) else {
            return;
        };
        if normalize_segment(&self.artist).is_empty() {
            self.artist = artist.replace('_', " ");
        }
        if normalize_segment(&self.title).is_empty() {
            self.title = title.replace('_', " ");
        }
    }
}

/// A persisted chord sheet with its storage metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordSheetRecord {
    /// Key the row is stored under.
    pub path: String,
    #[serde(flatten)]
    pub sheet: ChordSheet,
    pub saved: bool,
    /// Creation or first-fetch time.
    pub timestamp: DateTime<Utc>,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ChordSheetRecord {
    fn new(path: String, sheet: ChordSheet, saved: bool, now: DateTime<Utc>) -> Self {
        Self {
            path,
            sheet,
            saved,
            timestamp: now,
            access_count: 0,
            last_accessed: None,
            expires_at: None,
            deleted_at: None,
        }
    }

    /// Canonical key for this record's artist and title.
    pub fn canonical_key(&self) -> String {
        normalize_key(&self.sheet.artist, &self.sheet.title)
    }
}

impl Retained for ChordSheetRecord {
    fn saved(&self) -> bool {
        self.saved
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// How a caller identifies a chord sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetPath {
    /// An `artist-title` key, canonical or not.
    Key(String),
    /// Raw artist and title as a person typed them.
    Song { artist: String, title: String },
}

impl SheetPath {
    /// Canonical key, or the empty sentinel when none can be derived.
    pub fn canonical(&self) -> String {
        match self {
            SheetPath::Key(key) => canonicalize_path(key),
            SheetPath::Song { artist, title } => normalize_key(artist, title),
        }
    }
}

impl From<&str> for SheetPath {
    fn from(key: &str) -> Self {
        SheetPath::Key(key.to_string())
    }
}

impl From<String> for SheetPath {
    fn from(key: String) -> Self {
        SheetPath::Key(key)
    }
}

impl From<(&str, &str)> for SheetPath {
    fn from((artist, title): (&str, &str)) -> Self {
        SheetPath::Song { artist: artist.to_string(), title: title.to_string() }
    }
}

/// Result of [`ChordSheetStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DeleteOutcome {
    NotFound,
    /// Marked deleted; restorable until `expires_at`.
    SoftDeleted { expires_at: Option<DateTime<Utc>> },
    /// Row removed.
    Removed,
    /// Saved records must be unsaved before they can be deleted.
    RefusedSaved,
}

/// Record counts by retention state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetStats {
    pub total: i64,
    pub saved: i64,
    pub cached: i64,
    pub soft_deleted: i64,
}

const SHEET_COLUMNS: &str = "path, title, artist, song_chords, song_key, tuning, capo,
     saved, timestamp, access_count, last_accessed, expires_at, deleted_at";

fn millis(ts: Option<DateTime<Utc>>) -> Option<i64> {
    ts.map(|t| t.timestamp_millis())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChordSheetRecord> {
    Ok(ChordSheetRecord {
        path: row.get(0)?,
        sheet: ChordSheet {
            title: row.get(1)?,
            artist: row.get(2)?,
            song_chords: row.get(3)?,
            song_key: row.get(4)?,
            tuning: row.get(5)?,
            capo: row.get(6)?,
        },
        saved: row.get::<_, i64>(7)? == 1,
        timestamp: from_millis(row.get(8)?),
        access_count: row.get(9)?,
        last_accessed: row.get::<_, Option<i64>>(10)?.map(from_millis),
        expires_at: row.get::<_, Option<i64>>(11)?.map(from_millis),
        deleted_at: row.get::<_, Option<i64>>(12)?.map(from_millis),
    })
}

/// Whether `err` means the row exists but its values cannot be decoded.
fn is_decode_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
    )
}

/// Read the row stored under `path`.
///
/// A row that cannot be decoded is deleted and reported as absent.
pub(crate) fn select_sheet(conn: &rusqlite::Connection, path: &str) -> rusqlite::Result<Option<ChordSheetRecord>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {SHEET_COLUMNS} FROM chord_sheets WHERE path = ?1"))?;
    match stmt.query_row(params![path], row_to_record) {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) if is_decode_error(&e) => {
            tracing::warn!(path = %path, error = %e, "dropped undecodable chord sheet");
            delete_sheet(conn, path)?;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Rows read by a full scan.
#[derive(Debug, Default)]
pub(crate) struct SheetScan {
    pub(crate) records: Vec<ChordSheetRecord>,
    /// Paths of rows that could not be decoded.
    pub(crate) undecodable: Vec<String>,
}

fn scan_rows(stmt: &mut rusqlite::Statement<'_>) -> rusqlite::Result<SheetScan> {
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0).ok(), row_to_record(row))))?;

    let mut scan = SheetScan::default();
    for row in rows {
        let (path, decoded) = row?;
        match decoded {
            Ok(record) => scan.records.push(record),
            Err(e) if is_decode_error(&e) => {
                tracing::warn!(path = ?path, error = %e, "skipping undecodable chord sheet");
                scan.undecodable.extend(path);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(scan)
}

pub(crate) fn select_all_sheets(conn: &rusqlite::Connection) -> rusqlite::Result<SheetScan> {
    let mut stmt = conn.prepare(&format!("SELECT {SHEET_COLUMNS} FROM chord_sheets ORDER BY path"))?;
    scan_rows(&mut stmt)
}

/// Insert or fully replace the row stored under `record.path`.
pub(crate) fn write_sheet(conn: &rusqlite::Connection, record: &ChordSheetRecord) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO chord_sheets ({SHEET_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(path) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                song_chords = excluded.song_chords,
                song_key = excluded.song_key,
                tuning = excluded.tuning,
                capo = excluded.capo,
                saved = excluded.saved,
                timestamp = excluded.timestamp,
                access_count = excluded.access_count,
                last_accessed = excluded.last_accessed,
                expires_at = excluded.expires_at,
                deleted_at = excluded.deleted_at"
        ),
        params![
            &record.path,
            &record.sheet.title,
            &record.sheet.artist,
            &record.sheet.song_chords,
            &record.sheet.song_key,
            &record.sheet.tuning,
            &record.sheet.capo,
            i64::from(record.saved),
            record.timestamp.timestamp_millis(),
            record.access_count,
            millis(record.last_accessed),
            millis(record.expires_at),
            millis(record.deleted_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_sheet(conn: &rusqlite::Connection, path: &str) -> rusqlite::Result<usize> {
    conn.execute("DELETE FROM chord_sheets WHERE path = ?1", params![path])
}

enum Lookup {
    Missing,
    Expired,
    SoftDeleted,
    Hit(ChordSheetRecord),
}

/// CRUD layer over persisted chord sheets.
#[derive(Debug)]
pub struct ChordSheetStore {
    manager: Arc<ConnectionManager>,
    clock: Arc<dyn Clock>,
    policy: RetentionPolicy,
    locks: KeyLocks,
}

impl ChordSheetStore {
    pub fn new(manager: Arc<ConnectionManager>, clock: Arc<dyn Clock>, policy: RetentionPolicy) -> Self {
        Self { manager, clock, policy, locks: KeyLocks::new() }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub(crate) fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Look up a live chord sheet.
    ///
    /// Returns `None` for unknown keys, keys that cannot be normalized,
    /// soft-deleted records, and expired records (which are deleted first).
    /// A hit increments the record's access count before returning it.
    pub async fn get(&self, path: impl Into<SheetPath>) -> Result<Option<ChordSheetRecord>, Error> {
        let key = path.into().canonical();
        if key.is_empty() {
            tracing::debug!("chord sheet lookup with unusable path");
            return Ok(None);
        }

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();
        let policy = self.policy;
        let lookup_key = key.clone();

        let lookup = self
            .manager
            .call(move |conn| -> Result<Lookup, Error> {
                let Some(mut record) = select_sheet(conn, &lookup_key)? else {
                    return Ok(Lookup::Missing);
                };
                if policy.is_expired(&record, now) {
                    delete_sheet(conn, &lookup_key)?;
                    return Ok(Lookup::Expired);
                }
                if record.deleted_at.is_some() {
                    return Ok(Lookup::SoftDeleted);
                }
                access::apply_sheet_access(conn, &mut record, now);
                Ok(Lookup::Hit(record))
            })
            .await?;

        match lookup {
            Lookup::Hit(record) => {
                tracing::debug!(path = %key, access_count = record.access_count, "chord sheet cache hit");
                Ok(Some(record))
            }
            Lookup::Expired => {
                tracing::info!(path = %key, "evicted expired chord sheet on read");
                Ok(None)
            }
            Lookup::SoftDeleted => {
                tracing::debug!(path = %key, "chord sheet is pending deletion");
                Ok(None)
            }
            Lookup::Missing => {
                tracing::debug!(path = %key, "chord sheet cache miss");
                Ok(None)
            }
        }
    }

    /// Store a chord sheet, merging into any existing record.
    ///
    /// The key comes from `path` when it normalizes, otherwise from the
    /// sheet's own artist and title. `saved = true` is a save action: its
    /// non-empty fields replace existing content. `saved = false` only fills
    /// gaps and never demotes a saved record. Access metadata and the
    /// original timestamp survive the merge. A stored record with no usable
    /// artist or title takes them from the key's segments.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when no canonical key can be derived.
    pub async fn put(
        &self, sheet: &ChordSheet, saved: bool, path: Option<SheetPath>,
    ) -> Result<ChordSheetRecord, Error> {
        let key = path
            .map(|p| p.canonical())
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| normalize_key(&sheet.artist, &sheet.title));
        if key.is_empty() {
            return Err(Error::InvalidInput("chord sheet needs a non-empty artist and title".into()));
        }

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();
        let policy = self.policy;
        let sheet = sheet.clone();
        let write_key = key.clone();

        let (record, evicted) = self
            .manager
            .call(move |conn| -> Result<(ChordSheetRecord, bool), Error> {
                let existing = select_sheet(conn, &write_key)?;
                let evicted = existing.as_ref().is_some_and(|r| policy.is_expired(r, now));

                let mut record = match existing {
                    Some(mut current) if !evicted => {
                        current.sheet.merge_from(&sheet, saved);
                        current.saved |= saved;
                        current.deleted_at = None;
                        current
                    }
                    _ => ChordSheetRecord::new(write_key, sheet, saved, now),
                };
                record.sheet.fill_identity_from_key(&record.path);
                record.expires_at = policy.expiration_of(&record);

                write_sheet(conn, &record)?;
                Ok((record, evicted))
            })
            .await?;

        if evicted {
            tracing::info!(path = %key, "evicted expired chord sheet on write");
        }
        tracing::debug!(path = %key, saved = record.saved, "stored chord sheet");
        Ok(record)
    }

    /// Delete a chord sheet.
    ///
    /// Unsaved records are soft-deleted first and only removed once their
    /// grace period has passed. Saved records are refused.
    pub async fn delete(&self, path: impl Into<SheetPath>) -> Result<DeleteOutcome, Error> {
        let key = path.into().canonical();
        if key.is_empty() {
            return Ok(DeleteOutcome::NotFound);
        }

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();
        let policy = self.policy;
        let delete_key = key.clone();

        let outcome = self
            .manager
            .call(move |conn| -> Result<DeleteOutcome, Error> {
                let Some(mut record) = select_sheet(conn, &delete_key)? else {
                    return Ok(DeleteOutcome::NotFound);
                };
                if record.saved {
                    return Ok(DeleteOutcome::RefusedSaved);
                }
                if policy.is_expired(&record, now) {
                    delete_sheet(conn, &delete_key)?;
                    return Ok(DeleteOutcome::Removed);
                }
                if record.deleted_at.is_none() {
                    record.deleted_at = Some(now);
                    record.expires_at = policy.expiration_of(&record);
                    write_sheet(conn, &record)?;
                }
                Ok(DeleteOutcome::SoftDeleted { expires_at: record.expires_at })
            })
            .await?;

        tracing::debug!(path = %key, ?outcome, "delete chord sheet");
        Ok(outcome)
    }

    /// Clear the saved flag so the record becomes an ordinary cached entry.
    ///
    /// The cached TTL starts from now. Returns whether a saved record was found.
    pub async fn unsave(&self, path: impl Into<SheetPath>) -> Result<bool, Error> {
        let key = path.into().canonical();
        if key.is_empty() {
            return Ok(false);
        }

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();
        let policy = self.policy;

        self.manager
            .call(move |conn| -> Result<bool, Error> {
                let Some(mut record) = select_sheet(conn, &key)? else {
                    return Ok(false);
                };
                if !record.saved {
                    return Ok(false);
                }
                record.saved = false;
                record.timestamp = now;
                record.expires_at = policy.expiration_of(&record);
                write_sheet(conn, &record)?;
                Ok(true)
            })
            .await
    }

    /// Undo a soft delete that is still inside its grace period.
    pub async fn restore(&self, path: impl Into<SheetPath>) -> Result<bool, Error> {
        let key = path.into().canonical();
        if key.is_empty() {
            return Ok(false);
        }

        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();
        let policy = self.policy;

        self.manager
            .call(move |conn| -> Result<bool, Error> {
                let Some(mut record) = select_sheet(conn, &key)? else {
                    return Ok(false);
                };
                if record.deleted_at.is_none() {
                    return Ok(false);
                }
                if policy.is_expired(&record, now) {
                    delete_sheet(conn, &key)?;
                    return Ok(false);
                }
                record.deleted_at = None;
                record.expires_at = policy.expiration_of(&record);
                write_sheet(conn, &record)?;
                Ok(true)
            })
            .await
    }

    /// Every saved chord sheet, ordered by artist then title.
    pub async fn get_all_saved(&self) -> Result<Vec<ChordSheetRecord>, Error> {
        self.manager
            .call(|conn| -> Result<Vec<ChordSheetRecord>, Error> {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SHEET_COLUMNS} FROM chord_sheets INDEXED BY idx_chord_sheets_saved
                     WHERE saved = 1
                     ORDER BY artist COLLATE NOCASE, title COLLATE NOCASE, path"
                ))?;
                Ok(scan_rows(&mut stmt)?.records)
            })
            .await
    }

    /// Remove every record whose expiration has passed.
    ///
    /// Returns the number of deleted records.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        let now = self.clock.now().timestamp_millis();
        let deleted = self
            .manager
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute(
                    "DELETE FROM chord_sheets WHERE saved = 0 AND expires_at IS NOT NULL AND expires_at < ?1",
                    params![now],
                )?;
                Ok(count as u64)
            })
            .await?;

        if deleted > 0 {
            tracing::info!(deleted, "purged expired chord sheets");
        }
        Ok(deleted)
    }

    /// Record counts by retention state.
    pub async fn stats(&self) -> Result<SheetStats, Error> {
        self.manager
            .call(|conn| -> Result<SheetStats, Error> {
                let stats = conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(saved = 1), 0),
                            COALESCE(SUM(saved = 0 AND deleted_at IS NULL), 0),
                            COALESCE(SUM(deleted_at IS NOT NULL), 0)
                     FROM chord_sheets",
                    [],
                    |row| Ok(SheetStats { total: row.get(0)?, saved: row.get(1)?, cached: row.get(2)?, soft_deleted: row.get(3)? }),
                )?;
                Ok(stats)
            })
            .await
    }
}
