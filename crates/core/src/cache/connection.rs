//! Database connection management with pragma configuration.
//!
//! [`CacheDb`] is one open SQLite handle with pragmas applied and migrations
//! run. [`ConnectionManager`] owns the lifecycle of that handle: it opens it
//! lazily, shares it between the stores, reopens it after the connection
//! reports itself closed, and falls back to an in-memory database when the
//! configured file cannot be opened.

use super::migrations;
use crate::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_rusqlite::{Connection, rusqlite};

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// Cache database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct CacheDb {
    pub(crate) conn: Connection,
}

impl CacheDb {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies performance pragmas,
    /// and runs any pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    /// Open an in-memory database.
    ///
    /// Used by tests and as the fallback when the configured file is unusable.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn).await
    }

    async fn prepare(conn: Connection) -> Result<Self, Error> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }
}

/// Where the manager should open its database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    InMemory,
}

/// Lazily initialized, shared [`CacheDb`].
///
/// Owned by the application root and handed to the stores. The first call to
/// [`ConnectionManager::handle`] opens the database; callers arriving while
/// that is in flight wait on the same initialization and receive the same
/// handle.
#[derive(Debug)]
pub struct ConnectionManager {
    location: StoreLocation,
    slot: Mutex<Option<CacheDb>>,
    degraded: AtomicBool,
}

impl ConnectionManager {
    pub fn new(location: StoreLocation) -> Self {
        Self { location, slot: Mutex::new(None), degraded: AtomicBool::new(false) }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreLocation::File(path.into()))
    }

    pub fn in_memory() -> Self {
        Self::new(StoreLocation::InMemory)
    }

    /// Return the live handle, opening it first if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageUnavailable` only when the in-memory fallback
    /// cannot be opened either.
    pub async fn handle(&self) -> Result<CacheDb, Error> {
        let mut slot = self.slot.lock().await;
        if let Some(db) = slot.as_ref() {
            return Ok(db.clone());
        }

        let db = self.open().await?;
        *slot = Some(db.clone());
        Ok(db)
    }

    async fn open(&self) -> Result<CacheDb, Error> {
        if let StoreLocation::File(path) = &self.location {
            if self.is_degraded() {
                return Self::open_fallback().await;
            }
            match CacheDb::open(path).await {
                Ok(db) => {
                    tracing::debug!(path = %path.display(), "opened cache database");
                    return Ok(db);
                }
                Err(e) => {
                    // Only the first failure is logged; the session stays in memory afterwards.
                    if !self.degraded.swap(true, Ordering::SeqCst) {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "cache database unavailable, continuing with a non-persistent in-memory cache"
                        );
                    }
                }
            }
        }

        Self::open_fallback().await
    }

    async fn open_fallback() -> Result<CacheDb, Error> {
        CacheDb::open_in_memory()
            .await
            .map_err(|e| Error::StorageUnavailable(e.to_string()))
    }

    /// Run `f` on the database worker thread.
    ///
    /// Calls run in submission order on a single thread, so one closure is
    /// one atomic step with respect to every other call. A lost connection
    /// invalidates the memoized handle before the error is returned.
    pub async fn call<F, T>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.handle().await?;
        let result = db.conn.call(f).await.map_err(Error::from);
        if let Err(e) = &result {
            self.observe(e).await;
        }
        result
    }

    /// Inspect an operation's error and drop the handle if the connection is gone.
    pub async fn observe(&self, err: &Error) {
        if err.is_connection_lost() {
            tracing::warn!(error = %err, "cache connection lost, will reopen on next use");
            self.invalidate().await;
        }
    }

    /// Forget the current handle; the next [`ConnectionManager::handle`] reopens.
    pub async fn invalidate(&self) {
        self.slot.lock().await.take();
    }

    /// Release the handle. The background connection thread exits once
    /// every clone held by in-flight operations is dropped.
    pub async fn close(&self) {
        if self.slot.lock().await.take().is_some() {
            tracing::debug!("closed cache database");
        }
    }

    /// Whether a handle is currently open.
    pub async fn is_open(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Whether the session fell back to the in-memory store.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}
