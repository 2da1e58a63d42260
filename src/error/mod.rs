//! # Error Module
//!
//! Error types for the photo archive engine.
//!
//! ## Design Principles
//! - **Never panic** on user data - return errors instead
//! - **Include context** - paths, record ids, what went wrong
//! - **Per-file failures are not fatal** - they are collected into pass summaries
//! - **Recovery hints** - suggest how to fix when possible

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Scanning error: {0}")]
    Scan(#[from] ScanError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Index store error: {0}")]
    Store(#[from] StoreError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Face clustering error: {0}")]
    Face(#[from] FaceError),

    #[error("Trash error: {0}")]
    Trash(#[from] TrashError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors that occur while walking the photo tree.
///
/// All of these are recorded as warnings; none of them abort a walk.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Permission denied accessing: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Symlink loop at {path} (points back to {ancestor})")]
    SymlinkLoop { path: PathBuf, ancestor: PathBuf },

    #[error("Broken symlink: {path}")]
    BrokenSymlink { path: PathBuf },

    #[error("Failed to read {path}: {source}")]
    ReadEntry {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// The entry this error is about, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            ScanError::DirectoryNotFound { path }
            | ScanError::PermissionDenied { path }
            | ScanError::SymlinkLoop { path, .. }
            | ScanError::BrokenSymlink { path }
            | ScanError::ReadEntry { path, .. } => Some(path),
        }
    }
}

/// Errors from decoding or hashing a single image
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported image format: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to decode image {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Image is empty: {path}")]
    EmptyImage { path: PathBuf },

    #[error("Failed to read image file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DecodeError {
    /// Attach the file path to an error raised on pixels alone
    pub fn at(self, file: &Path) -> Self {
        let file = file.to_path_buf();
        match self {
            DecodeError::UnsupportedFormat { .. } => DecodeError::UnsupportedFormat { path: file },
            DecodeError::Corrupt { reason, .. } => DecodeError::Corrupt { path: file, reason },
            DecodeError::EmptyImage { .. } => DecodeError::EmptyImage { path: file },
            DecodeError::Io { source, .. } => DecodeError::Io { path: file, source },
        }
    }
}

/// Missing or unparsable embedded metadata.
///
/// Never surfaced to callers: extraction falls back to filesystem attributes
/// and records where the value came from instead.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("No embedded metadata")]
    NoMetadata,

    #[error("Unparsable capture time '{value}'")]
    BadTimestamp { value: String },
}

/// Errors from the persistent index store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open index at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("Index is locked by another writer (after {attempts} attempts)")]
    Locked { attempts: u32 },

    #[error("Index query failed: {0}")]
    QueryFailed(String),

    #[error("Index corruption detected at {path}. Move this file aside and rescan.")]
    Corrupted { path: PathBuf },

    #[error("Photo record {id} does not exist")]
    UnknownPhoto { id: i64 },

    #[error("Face record {id} does not exist")]
    UnknownFace { id: i64 },

    #[error("Backup status of record {id} cannot change from {from} to {to}")]
    IllegalTransition { id: i64, from: String, to: String },

    #[error("Path {path} is already indexed by record {existing}")]
    PathConflict { path: PathBuf, existing: i64 },
}

impl StoreError {
    /// Busy/locked conditions that are worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Locked { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                StoreError::Locked { attempts: 1 }
            }
            _ => StoreError::QueryFailed(error.to_string()),
        }
    }
}

/// Errors from a backup pass. Each one marks a single record `Failed`.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Backup destination unreachable: {path}: {reason}")]
    DestinationUnreachable { path: PathBuf, reason: String },

    #[error("Source file missing for backup: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Verification failed for {content_hash}: destination hashed to {actual}")]
    VerifyMismatch {
        content_hash: String,
        actual: String,
    },

    #[error("Copy failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backup pass was cancelled")]
    Cancelled,
}

/// Errors from face clustering
#[derive(Error, Debug)]
pub enum FaceError {
    #[error("Embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding is empty or not finite")]
    InvalidEmbedding,

    #[error("Face detection failed for {path}: {reason}")]
    DetectionFailed { path: PathBuf, reason: String },
}

/// Errors from the trash area
#[derive(Error, Debug)]
pub enum TrashError {
    #[error("Record {id} is not in the trash")]
    NotTrashed { id: i64 },

    #[error("Record {id} is already in the trash")]
    AlreadyTrashed { id: i64 },

    #[error("Cannot restore {path}: a file already exists there")]
    RestoreConflict { path: PathBuf },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, ArchiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_error_includes_path() {
        let error = ScanError::PermissionDenied {
            path: PathBuf::from("/photos/private"),
        };
        assert!(error.to_string().contains("/photos/private"));
    }

    #[test]
    fn decode_error_includes_reason() {
        let error = DecodeError::Corrupt {
            path: PathBuf::from("/photos/broken.jpg"),
            reason: "invalid JPEG".to_string(),
        };
        let message = error.to_string();
        assert!(message.contains("/photos/broken.jpg"));
        assert!(message.contains("invalid JPEG"));
    }

    #[test]
    fn corrupted_index_suggests_recovery() {
        let error = StoreError::Corrupted {
            path: PathBuf::from("/data/photo_archive.db"),
        };
        assert!(error.to_string().contains("rescan"));
    }

    #[test]
    fn only_lock_errors_are_retryable() {
        assert!(StoreError::Locked { attempts: 1 }.is_retryable());
        assert!(!StoreError::QueryFailed("syntax".into()).is_retryable());
        assert!(!StoreError::UnknownFace { id: 3 }.is_retryable());
    }

    #[test]
    fn busy_sqlite_error_maps_to_locked() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(StoreError::from(busy).is_retryable());
    }
}
