//! # Trash Module
//!
//! Reversible removal into the app-managed trash directory.
//!
//! Trashing moves the file to `<trash>/<id>-<file name>` and marks the record
//! deleted; the record keeps its id, hashes and backup state until the trash
//! is purged. Moves try an atomic rename first and fall back to
//! copy, verify, remove when the trash lives on another filesystem.

use crate::core::hasher::hash_file;
use crate::core::store::{mark_restored, mark_trashed, purge_record, IndexStore, PhotoRecord};
use crate::error::{ArchiveError, StoreError, TrashError};
use crate::events::{Event, EventSender, TrashEvent};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Move `from` to `to`, falling back to copy + verify + remove
pub fn move_file(from: &Path, to: &Path) -> Result<(), TrashError> {
    let failed = |source: io::Error| TrashError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };

    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(failed)?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(failed(e)),
        Err(rename_error) => {
            tracing::debug!(%rename_error, "rename failed, copying instead");
            fs::copy(from, to).map_err(failed)?;

            let source_hash = hash_file(from).map_err(failed)?;
            let copy_hash = hash_file(to).map_err(failed)?;
            if source_hash != copy_hash {
                let _ = fs::remove_file(to);
                return Err(failed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "copy verification failed",
                )));
            }
            fs::remove_file(from).map_err(failed)
        }
    }
}

/// The trash area of one archive
pub struct Trash<'a> {
    store: &'a IndexStore,
    dir: PathBuf,
}

impl<'a> Trash<'a> {
    pub fn new(store: &'a IndexStore, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn trash_path_for(&self, record: &PhotoRecord) -> PathBuf {
        let name = record
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "photo".to_string());
        self.dir.join(format!("{}-{}", record.id, name))
    }

    fn require(&self, id: i64) -> Result<PhotoRecord, ArchiveError> {
        Ok(self
            .store
            .get(id)?
            .ok_or(StoreError::UnknownPhoto { id })?)
    }

    /// Move a photo into the trash; returns where it went
    pub fn move_to_trash(&self, id: i64, events: &EventSender) -> Result<PathBuf, ArchiveError> {
        let record = self.require(id)?;
        if record.deleted {
            return Err(TrashError::AlreadyTrashed { id }.into());
        }

        let destination = self.trash_path_for(&record);
        move_file(&record.path, &destination)?;

        if let Err(e) = self.store.write(|tx| mark_trashed(tx, id, &destination)) {
            // Put the file back so disk and index agree
            if let Err(undo) = move_file(&destination, &record.path) {
                tracing::error!(%undo, path = %destination.display(), "could not undo trash move");
            }
            return Err(e.into());
        }

        tracing::info!(id, from = %record.path.display(), "moved to trash");
        events.send(Event::Trash(TrashEvent::Trashed {
            id,
            to: destination.clone(),
        }));
        Ok(destination)
    }

    /// Move a trashed photo back to its original path
    pub fn restore(&self, id: i64, events: &EventSender) -> Result<PathBuf, ArchiveError> {
        let record = self.require(id)?;
        let Some(trash_path) = record.trash_path.clone().filter(|_| record.deleted) else {
            return Err(TrashError::NotTrashed { id }.into());
        };

        if record.path.exists() {
            return Err(TrashError::RestoreConflict { path: record.path }.into());
        }
        if let Some(existing) = self.store.get_by_path(&record.path)? {
            return Err(StoreError::PathConflict {
                path: record.path,
                existing: existing.id,
            }
            .into());
        }

        move_file(&trash_path, &record.path)?;
        if let Err(e) = self.store.write(|tx| mark_restored(tx, id)) {
            if let Err(undo) = move_file(&record.path, &trash_path) {
                tracing::error!(%undo, path = %record.path.display(), "could not undo restore");
            }
            return Err(e.into());
        }

        tracing::info!(id, path = %record.path.display(), "restored from trash");
        events.send(Event::Trash(TrashEvent::Restored {
            id,
            path: record.path.clone(),
        }));
        Ok(record.path)
    }

    /// Records currently in the trash
    pub fn list(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.store.query_deleted()
    }

    /// Delete every trashed file and hard-delete its record.
    ///
    /// Face clusters are kept. A file that cannot be removed keeps its
    /// record in the trash and is listed in [`PurgeReport::errors`]; only a
    /// store failure ends the purge early.
    pub fn purge(&self, events: &EventSender) -> Result<PurgeReport, StoreError> {
        let mut report = PurgeReport::default();
        for record in self.list()? {
            if let Some(path) = &record.trash_path {
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(error) => {
                        tracing::warn!(
                            id = record.id,
                            %error,
                            path = %path.display(),
                            "could not purge"
                        );
                        report.errors.push(format!("{}: {}", path.display(), error));
                        continue;
                    }
                }
            }
            self.store.write(|tx| purge_record(tx, record.id))?;
            report.purged += 1;
        }

        tracing::info!(purged = report.purged, failed = report.errors.len(), "trash purged");
        events.send(Event::Trash(TrashEvent::Purged {
            records: report.purged,
        }));
        Ok(report)
    }
}

/// Outcome of [`Trash::purge`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub purged: usize,
    /// One line per trashed file that could not be removed
    pub errors: Vec<String>,
}
