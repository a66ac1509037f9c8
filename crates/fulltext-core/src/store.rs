//! Record store adapter: reads and writes [`ExtractionStatus`] by identifier.
//!
//! The store is the only state shared across pipeline workers. Two
//! implementations are provided: [`SqliteStatusStore`] for persistence across
//! runs and [`MemoryStatusStore`] for tests and throwaway runs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use thiserror::Error;

use crate::{ExtractionStatus, UpdateReason};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt status record for {identifier}: {reason}")]
    Corrupt { identifier: String, reason: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed status lookup and update.
///
/// Calls are blocking; async callers go through [`get_status_bounded`] and
/// [`set_status_bounded`], which run them on a blocking thread under a timeout.
/// `set_status` for one identifier is last-write-wins.
pub trait StatusStore: Send + Sync {
    fn get_status(&self, identifier: &str) -> Result<Option<ExtractionStatus>, StoreError>;
    fn set_status(&self, status: &ExtractionStatus) -> Result<(), StoreError>;
}

/// Look up a status on a blocking thread, bounded by `timeout`.
pub async fn get_status_bounded(
    store: &Arc<dyn StatusStore>,
    identifier: &str,
    timeout: Duration,
) -> Result<Option<ExtractionStatus>, StoreError> {
    let store = Arc::clone(store);
    let identifier = identifier.to_string();
    let task = tokio::task::spawn_blocking(move || store.get_status(&identifier));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(StoreError::Unavailable(format!(
            "status lookup task failed: {join}"
        ))),
        Err(_) => Err(StoreError::Unavailable(format!(
            "status lookup timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Record a status on a blocking thread, bounded by `timeout`.
pub async fn set_status_bounded(
    store: &Arc<dyn StatusStore>,
    status: ExtractionStatus,
    timeout: Duration,
) -> Result<(), StoreError> {
    let store = Arc::clone(store);
    let task = tokio::task::spawn_blocking(move || store.set_status(&status));
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(StoreError::Unavailable(format!(
            "status update task failed: {join}"
        ))),
        Err(_) => Err(StoreError::Unavailable(format!(
            "status update timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS extraction_status (
             identifier     TEXT PRIMARY KEY,
             source_path    TEXT NOT NULL,
             provider       TEXT NOT NULL,
             extracted_at   TEXT NOT NULL,
             source_version TEXT NOT NULL,
             update_reason  TEXT NOT NULL
         );",
    )
}

/// SQLite-backed status store.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStatusStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteStatusStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = open_sqlite(path)?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of identifiers with a recorded status.
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM extraction_status", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

struct StatusRow {
    source_path: String,
    provider: String,
    extracted_at: String,
    source_version: String,
    update_reason: String,
}

impl StatusStore for SqliteStatusStore {
    fn get_status(&self, identifier: &str) -> Result<Option<ExtractionStatus>, StoreError> {
        let row = {
            let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            conn.query_row(
                "SELECT source_path, provider, extracted_at, source_version, update_reason
                 FROM extraction_status WHERE identifier = ?1",
                params![identifier],
                |row| {
                    Ok(StatusRow {
                        source_path: row.get(0)?,
                        provider: row.get(1)?,
                        extracted_at: row.get(2)?,
                        source_version: row.get(3)?,
                        update_reason: row.get(4)?,
                    })
                },
            )
            .optional()?
        };
        let Some(row) = row else {
            return Ok(None);
        };

        let corrupt = |reason: String| StoreError::Corrupt {
            identifier: identifier.to_string(),
            reason,
        };
        let last_extracted_at = DateTime::parse_from_rfc3339(&row.extracted_at)
            .map_err(|e| corrupt(format!("bad timestamp {:?}: {e}", row.extracted_at)))?
            .with_timezone(&Utc);
        let last_update_reason: UpdateReason = row.update_reason.parse().map_err(corrupt)?;

        Ok(Some(ExtractionStatus {
            identifier: identifier.to_string(),
            source_path: PathBuf::from(row.source_path),
            provider: row.provider,
            last_extracted_at,
            source_version: row.source_version,
            last_update_reason,
        }))
    }

    fn set_status(&self, status: &ExtractionStatus) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO extraction_status
             (identifier, source_path, provider, extracted_at, source_version, update_reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                status.identifier,
                status.source_path.to_string_lossy(),
                status.provider,
                status.last_extracted_at.to_rfc3339(),
                status.source_version,
                status.last_update_reason.as_str(),
            ],
        )?;
        Ok(())
    }
}

/// In-memory status store.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    entries: DashMap<String, ExtractionStatus>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get_status(&self, identifier: &str) -> Result<Option<ExtractionStatus>, StoreError> {
        Ok(self.entries.get(identifier).map(|e| e.value().clone()))
    }

    fn set_status(&self, status: &ExtractionStatus) -> Result<(), StoreError> {
        self.entries
            .insert(status.identifier.clone(), status.clone());
        Ok(())
    }
}
