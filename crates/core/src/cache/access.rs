//! Access tracking.
//!
//! Hit metadata (`access_count`, `last_accessed`) is written on the database
//! worker in the same call as the read that produced the hit, while the
//! caller still holds the key's lock. Any later lookup of the key is queued
//! behind it and observes the update. A failed update is logged and the read
//! result is returned unchanged.

use chrono::{DateTime, Utc};
use tokio_rusqlite::{params, rusqlite};

use super::sheets::{ChordSheetRecord, ChordSheetStore, SheetPath};
use crate::Error;

pub(crate) fn touch_sheet(conn: &rusqlite::Connection, path: &str, now: DateTime<Utc>) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE chord_sheets SET access_count = access_count + 1, last_accessed = ?2 WHERE path = ?1",
        params![path, now.timestamp_millis()],
    )?;
    Ok(updated > 0)
}

pub(crate) fn touch_search(conn: &rusqlite::Connection, key: &str, now: DateTime<Utc>) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE search_cache SET access_count = access_count + 1, last_accessed = ?2 WHERE search_key = ?1",
        params![key, now.timestamp_millis()],
    )?;
    Ok(updated > 0)
}

/// Record a hit on `record` and mirror it in the returned value.
pub(crate) fn apply_sheet_access(conn: &rusqlite::Connection, record: &mut ChordSheetRecord, now: DateTime<Utc>) {
    match touch_sheet(conn, &record.path, now) {
        Ok(true) => {
            record.access_count += 1;
            record.last_accessed = Some(now);
        }
        Ok(false) => {}
        Err(e) => tracing::warn!(path = %record.path, error = %e, "failed to record chord sheet access"),
    }
}

impl ChordSheetStore {
    /// Count an access to a chord sheet without reading it.
    ///
    /// Returns whether a live record was updated.
    pub async fn record_access(&self, path: impl Into<SheetPath>) -> Result<bool, Error> {
        let key = path.into().canonical();
        if key.is_empty() {
            return Ok(false);
        }

        let _guard = self.locks().lock(&key).await;
        let now = self.clock().now();
        let policy = self.policy();

        self.manager()
            .call(move |conn| -> Result<bool, Error> {
                match super::sheets::select_sheet(conn, &key)? {
                    Some(record) if record.deleted_at.is_none() && !policy.is_expired(&record, now) => {
                        Ok(touch_sheet(conn, &key, now)?)
                    }
                    _ => Ok(false),
                }
            })
            .await
    }
}
