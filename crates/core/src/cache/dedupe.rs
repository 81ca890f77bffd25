//! Duplicate detection and cleanup.
//!
//! Older releases stored chord sheets under other key formats, so one song can
//! exist under several paths. The cleaner groups every record by the key the
//! current normalizer derives from its artist and title, keeps the best
//! record of each group, folds the others into it and stores it under the
//! canonical key. Expired and undecodable rows are removed first, so a
//! keeper is always a live record.
//!
//! Keeper order, best first:
//!
//! 1. saved before unsaved
//! 2. higher `access_count`
//! 3. more recent `last_accessed`
//! 4. more recent `timestamp`
//! 5. smaller stored path

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use super::sheets::{ChordSheetRecord, ChordSheetStore, delete_sheet, select_all_sheets, write_sheet};
use crate::Error;
use crate::keys::{canonicalize_path, normalize_key};
use crate::retention::RetentionPolicy;

/// One set of records that collided under the canonical key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub canonical_key: String,
    pub records_in_group: usize,
    /// Paths the records were stored under, keeper first.
    pub paths: Vec<String>,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Every group that held more than one record.
    pub groups: Vec<DuplicateGroup>,
    /// Number of groups merged into a single record.
    pub merged_count: usize,
    /// Records left in the store after the pass.
    pub kept_count: usize,
    /// Records removed as duplicates.
    pub deleted_count: usize,
    /// Lone records moved from a legacy key to the canonical key.
    pub rekeyed_count: usize,
    /// Records removed because their retention had already run out.
    pub expired_count: usize,
    /// Rows removed because they could not be decoded.
    pub undecodable_count: usize,
}

/// Total order used to pick a keeper; `Less` means `a` is the better keeper.
pub fn keeper_order(a: &ChordSheetRecord, b: &ChordSheetRecord) -> CmpOrdering {
    b.saved
        .cmp(&a.saved)
        .then_with(|| b.access_count.cmp(&a.access_count))
        .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        .then_with(|| b.timestamp.cmp(&a.timestamp))
        .then_with(|| a.path.cmp(&b.path))
}

/// Fold a group into its keeper.
///
/// Empty keeper fields are filled from the other records in keeper order;
/// populated keeper fields are never touched. Access counts are summed and
/// the newest `timestamp` in the group is kept, so merging never shortens a
/// record's lifetime. Returns `None` for an empty group.
pub fn merge_group(
    mut group: Vec<ChordSheetRecord>, canonical_key: &str, policy: RetentionPolicy,
) -> Option<ChordSheetRecord> {
    group.sort_by(keeper_order);
    let any_live = group.iter().any(|r| r.deleted_at.is_none());

    let mut records = group.into_iter();
    let mut keeper = records.next()?;

    for other in records {
        keeper.sheet.merge_from(&other.sheet, false);
        keeper.access_count += other.access_count;
        keeper.last_accessed = keeper.last_accessed.max(other.last_accessed);
        keeper.timestamp = keeper.timestamp.max(other.timestamp);
        keeper.saved |= other.saved;
    }

    if any_live {
        keeper.deleted_at = None;
    }
    keeper.sheet.fill_identity_from_key(canonical_key);
    keeper.path = canonical_key.to_string();
    keeper.expires_at = policy.expiration_of(&keeper);
    Some(keeper)
}

/// Key a record belongs under: its artist and title, or failing that its
/// stored path. `None` when neither yields a key.
fn group_key(record: &ChordSheetRecord) -> Option<String> {
    let key = record.canonical_key();
    let key = if key.is_empty() { canonicalize_path(&record.path) } else { key };
    (!key.is_empty()).then_some(key)
}

/// Group records by canonical key.
///
/// Records without any derivable key are left where they are; their paths
/// are returned so no keeper is ever written over them.
fn group_records(records: Vec<ChordSheetRecord>) -> (BTreeMap<String, Vec<ChordSheetRecord>>, HashSet<String>) {
    let mut groups: BTreeMap<String, Vec<ChordSheetRecord>> = BTreeMap::new();
    let mut reserved = HashSet::new();
    for record in records {
        match group_key(&record) {
            Some(key) => groups.entry(key).or_default().push(record),
            None => {
                tracing::debug!(path = %record.path, "leaving chord sheet without a derivable key in place");
                reserved.insert(record.path);
            }
        }
    }
    (groups, reserved)
}

/// Resets the running flag when a pass ends, even on error.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Maintenance pass reconciling duplicate chord sheets.
#[derive(Debug)]
pub struct DuplicateCleaner {
    store: Arc<ChordSheetStore>,
    running: AtomicBool,
}

impl DuplicateCleaner {
    pub fn new(store: Arc<ChordSheetStore>) -> Self {
        Self { store, running: AtomicBool::new(false) }
    }

    /// Merge every group of colliding records into one record.
    ///
    /// The whole pass runs in a single transaction. Running it again right
    /// away reports no merges.
    ///
    /// # Errors
    ///
    /// Returns `Error::CleanupInProgress` if another pass is running.
    pub async fn run_duplicate_cleanup(&self) -> Result<CleanupReport, Error> {
        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(Error::CleanupInProgress);
        }
        let _guard = RunGuard(&self.running);

        let policy = self.store.policy();
        let now = self.store.clock().now();
        let report = self
            .store
            .manager()
            .call(move |conn| -> Result<CleanupReport, Error> {
                let tx = conn.transaction()?;
                let scan = select_all_sheets(&tx)?;

                let mut report = CleanupReport::default();
                for path in &scan.undecodable {
                    delete_sheet(&tx, path)?;
                }
                report.undecodable_count = scan.undecodable.len();

                let (expired, live): (Vec<_>, Vec<_>) =
                    scan.records.into_iter().partition(|r| policy.is_expired(r, now));
                for record in &expired {
                    delete_sheet(&tx, &record.path)?;
                }
                report.expired_count = expired.len();

                let (groups, reserved) = group_records(live);
                let mut stale_paths = Vec::new();
                let mut keepers = Vec::new();

                for (canonical_key, group) in groups {
                    let size = group.len();
                    if size == 1 && group[0].path == canonical_key {
                        continue;
                    }

                    let mut paths: Vec<String> = {
                        let mut sorted: Vec<&ChordSheetRecord> = group.iter().collect();
                        sorted.sort_by(|a, b| keeper_order(a, b));
                        sorted.into_iter().map(|r| r.path.clone()).collect()
                    };

                    if size == 1 {
                        report.rekeyed_count += 1;
                    } else {
                        report.merged_count += 1;
                        report.deleted_count += size - 1;
                        report.groups.push(DuplicateGroup {
                            canonical_key: canonical_key.clone(),
                            records_in_group: size,
                            paths: paths.clone(),
                        });
                    }

                    stale_paths.append(&mut paths);
                    keepers.extend(merge_group(group, &canonical_key, policy));
                }

                // Clear every affected row before writing keepers so a keeper
                // landing on a path that another group still owns is not
                // deleted afterwards.
                for path in &stale_paths {
                    delete_sheet(&tx, path)?;
                }
                for keeper in &keepers {
                    if reserved.contains(&keeper.path) {
                        // Dropping the transaction rolls the whole pass back.
                        return Err(Error::RecordCorrupt(format!(
                            "cleanup would overwrite chord sheet {} that has no artist or title",
                            keeper.path
                        )));
                    }
                    write_sheet(&tx, keeper)?;
                }

                let remaining: i64 = tx.query_row("SELECT COUNT(*) FROM chord_sheets", [], |row| row.get(0))?;
                tx.commit()?;
                report.kept_count = usize::try_from(remaining).unwrap_or_default();
                Ok(report)
            })
            .await?;

        tracing::info!(
            merged = report.merged_count,
            deleted = report.deleted_count,
            rekeyed = report.rekeyed_count,
            expired = report.expired_count,
            undecodable = report.undecodable_count,
            kept = report.kept_count,
            "duplicate cleanup finished"
        );
        Ok(report)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
