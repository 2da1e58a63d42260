//! # Store Module
//!
//! The persistent index: single source of truth for every derived fact.
//!
//! ## Storage
//! One SQLite file in WAL mode. WAL lets readers proceed against the last
//! committed state while a write transaction is open.
//!
//! ## Access Discipline
//! - **Single writer**: one connection behind a mutex. Every write runs in an
//!   `IMMEDIATE` transaction through [`IndexStore::write`], so a crash leaves
//!   either the pre-write or the fully committed state.
//! - **Multiple readers**: a small pool of read-only connections used by
//!   [`IndexStore::read`]. They never observe an uncommitted write.
//! - **Busy/locked**: retried with exponential backoff (see [`RetryPolicy`]),
//!   then surfaced as [`StoreError::Locked`] for that operation only.
//!
//! ## Example
//! ```rust,ignore
//! let store = IndexStore::open(&paths.store)?;
//! let outcome = store.upsert(&NewPhoto::bare("/photos/a.jpg", 1024, mtime, &hash))?;
//! let similar = store.query_by_hash_neighborhood(PerceptualHash(0xABCD), 8)?;
//! ```

pub mod bands;
mod faces;
mod photos;
mod retry;
mod schema;
mod types;

pub use faces::{decode_embedding, encode_embedding};
pub use photos::{ContentGroup, PhotoChange};
pub use retry::RetryPolicy;
pub use types::{
    BackupStatus, FaceIdSet, FaceObservation, FaceRecord, NewPhoto, PhotoFilter, PhotoRecord,
    SortField, UpsertOutcome,
};

pub(crate) use faces::{
    delete_face, face_by_id, insert_face, insert_observation, list_faces, list_observations,
    move_observations, update_face,
};
pub(crate) use photos::{
    backup_queue, clear_dup_groups, content_groups, dup_group_of, labelled_groups, live_hashes,
    mark_restored, mark_trashed, neighbours, photo_by_id, photos_by_ids, purge_record,
    record_backup_retry_failure, relabel_dup_group, set_backup_status, set_dup_group,
    trashed_photos, ungrouped_hashes,
};

use crate::error::StoreError;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Settings key: threshold the persisted near-duplicate labels were built with
pub const SETTING_GROUP_THRESHOLD: &str = "grouping.threshold";
/// Settings key: set when a change invalidates persisted labels
pub const SETTING_GROUPS_DIRTY: &str = "grouping.dirty";

const READER_COUNT: usize = 4;

/// Handle to the index store; share it by reference or `Arc`
pub struct IndexStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    db_path: PathBuf,
    retry: RetryPolicy,
}

impl IndexStore {
    /// Open or create the store at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let open_failed = |reason: String| StoreError::OpenFailed {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| open_failed(e.to_string()))?;
        }

        let writer = Connection::open(path).map_err(|e| open_failed(e.to_string()))?;
        writer
            .execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA foreign_keys=ON;",
            )
            .map_err(|e| Self::classify_open_error(path, e))?;
        writer
            .busy_timeout(Duration::from_millis(50))
            .map_err(|e| open_failed(e.to_string()))?;
        writer
            .execute_batch(schema::SCHEMA)
            .map_err(|e| Self::classify_open_error(path, e))?;

        let mut readers = Vec::with_capacity(READER_COUNT);
        for _ in 0..READER_COUNT {
            let reader = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| open_failed(e.to_string()))?;
            reader
                .busy_timeout(Duration::from_millis(50))
                .map_err(|e| open_failed(e.to_string()))?;
            readers.push(Mutex::new(reader));
        }

        tracing::debug!(path = %path.display(), "opened index store");

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            db_path: path.to_path_buf(),
            retry: RetryPolicy::default(),
        })
    }

    fn classify_open_error(path: &Path, error: rusqlite::Error) -> StoreError {
        match &error {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
                ) =>
            {
                StoreError::Corrupted {
                    path: path.to_path_buf(),
                }
            }
            _ => StoreError::from(error),
        }
    }

    /// Location of the store file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` in one write transaction, committing only if it succeeds.
    ///
    /// Busy/locked failures roll back and retry the whole closure.
    pub fn write<T>(
        &self,
        mut f: impl FnMut(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.writer.lock().map_err(|_| StoreError::Corrupted {
            path: self.db_path.clone(),
        })?;

        self.retry.run(|| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    /// Run `f` against the last committed state
    pub fn read<T>(
        &self,
        mut f: impl FnMut(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .readers
            .iter()
            .find_map(|r| r.try_lock().ok())
            .map(Ok)
            .unwrap_or_else(|| {
                self.readers[0].lock().map_err(|_| StoreError::Corrupted {
                    path: self.db_path.clone(),
                })
            })?;

        self.retry.run(|| f(&conn))
    }

    /// Read a value from the settings table
    pub fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.read(|conn| get_setting(conn, key))
    }

    /// Write a value to the settings table
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(|tx| set_setting(tx, key, value))
    }
}

pub(crate) fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

pub(crate) fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Mark persisted near-duplicate labels as needing a full recompute
pub(crate) fn mark_groups_dirty(conn: &Connection) -> Result<(), StoreError> {
    set_setting(conn, SETTING_GROUPS_DIRTY, "1")
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// A store in a fresh temporary directory
    pub fn temp_store() -> (TempDir, IndexStore) {
        let dir = TempDir::new().unwrap();
        let store = IndexStore::open(&dir.path().join("index.db")).unwrap();
        (dir, store)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_store;
    use super::*;

    #[test]
    fn open_creates_schema_and_is_reopenable() {
        let (dir, store) = temp_store();
        store.set_setting("k", "v").unwrap();
        drop(store);

        let reopened = IndexStore::open(&dir.path().join("index.db")).unwrap();
        assert_eq!(reopened.setting("k").unwrap(), Some("v".to_string()));
    }

    #[test]
    fn failed_write_leaves_no_trace() {
        let (_dir, store) = temp_store();
        let result: Result<(), _> = store.write(|tx| {
            set_setting(tx, "half", "written")?;
            Err(StoreError::UnknownPhoto { id: 99 })
        });

        assert!(result.is_err());
        assert_eq!(store.setting("half").unwrap(), None);
    }

    #[test]
    fn readers_see_only_committed_state() {
        let (_dir, store) = temp_store();
        store.set_setting("seen", "before").unwrap();

        store
            .write(|tx| {
                set_setting(tx, "seen", "during")?;
                // The reader pool is separate from the writer connection
                let visible = store.setting("seen")?;
                assert_eq!(visible, Some("before".to_string()));
                Ok(())
            })
            .unwrap();

        assert_eq!(store.setting("seen").unwrap(), Some("during".to_string()));
    }

    #[test]
    fn garbage_file_is_reported_as_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        std::fs::write(&path, vec![0x42u8; 8192]).unwrap();

        match IndexStore::open(&path) {
            Err(StoreError::Corrupted { .. }) => {}
            Err(other) => panic!("expected corruption, got {other}"),
            Ok(_) => panic!("garbage opened as a store"),
        }
    }
}
