//! Time-to-live retention policy.
//!
//! Expiration is derived from a record's state rather than stored as the
//! source of truth:
//!
//! - saved records never expire
//! - soft-deleted records expire `grace` after deletion
//! - everything else expires `ttl` after its timestamp

use chrono::{DateTime, Duration, Utc};

/// Default lifetime of an unsaved chord sheet.
pub const CACHED_TTL: Duration = Duration::days(7);

/// Default lifetime of a search-cache entry.
pub const SEARCH_TTL: Duration = Duration::days(30);

/// Undo window after a soft delete.
pub const GRACE_PERIOD: Duration = Duration::days(1);

/// Retention state a record exposes to the policy.
pub trait Retained {
    fn saved(&self) -> bool;
    fn deleted_at(&self) -> Option<DateTime<Utc>>;
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Expiration rules for one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub ttl: Duration,
    pub grace: Duration,
}

impl RetentionPolicy {
    pub const fn new(ttl: Duration, grace: Duration) -> Self {
        Self { ttl, grace }
    }

    /// Policy for the chord-sheet store.
    pub const fn chord_sheets() -> Self {
        Self::new(CACHED_TTL, GRACE_PERIOD)
    }

    /// Policy for the search cache.
    pub const fn search_cache() -> Self {
        Self::new(SEARCH_TTL, GRACE_PERIOD)
    }

    /// When `record` stops being live, or `None` if it never does.
    pub fn expiration_of(&self, record: &impl Retained) -> Option<DateTime<Utc>> {
        if record.saved() {
            return None;
        }
        match record.deleted_at() {
            Some(deleted_at) => Some(deleted_at + self.grace),
            None => Some(record.timestamp() + self.ttl),
        }
    }

    /// Strictly after the expiration instant counts as expired.
    pub fn is_expired(&self, record: &impl Retained, now: DateTime<Utc>) -> bool {
        self.expiration_of(record).is_some_and(|expires_at| now > expires_at)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::chord_sheets()
    }
}
