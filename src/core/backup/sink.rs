//! Backup destinations.

use crate::core::hasher::hash_file;
use crate::error::BackupError;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// What a sink did with one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Bytes were copied and verified
    Copied,
    /// A verified copy of the same content was already there
    AlreadyPresent,
}

/// A place backups are written to, keyed by content hash.
///
/// `store` must only return `Ok` once the destination holds bytes whose
/// digest equals `content_hash`.
pub trait BackupSink: Send + Sync {
    /// Fail fast when the destination cannot be used at all
    fn check_available(&self) -> Result<(), BackupError>;

    /// Copy `source` into the sink and verify it
    fn store(&self, source: &Path, content_hash: &str) -> Result<CopyOutcome, BackupError>;

    /// Human-readable location
    fn describe(&self) -> String;
}

/// Content-addressed folder: `<root>/<first two hex chars>/<hash>`
#[derive(Debug, Clone)]
pub struct LocalFolderSink {
    root: PathBuf,
}

impl LocalFolderSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the copy of `content_hash` lives
    pub fn location(&self, content_hash: &str) -> PathBuf {
        match content_hash.get(..2) {
            Some(prefix) => self.root.join(prefix).join(content_hash),
            None => self.root.join(content_hash),
        }
    }

    fn unreachable(&self, error: impl ToString) -> BackupError {
        BackupError::DestinationUnreachable {
            path: self.root.clone(),
            reason: error.to_string(),
        }
    }

    fn verified(path: &Path, content_hash: &str) -> bool {
        matches!(hash_file(path), Ok(actual) if actual == content_hash)
    }
}

impl BackupSink for LocalFolderSink {
    fn check_available(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.root).map_err(|e| self.unreachable(e))?;
        // A temp file proves the folder is writable; it is removed on drop
        tempfile::NamedTempFile::new_in(&self.root).map_err(|e| self.unreachable(e))?;
        Ok(())
    }

    fn store(&self, source: &Path, content_hash: &str) -> Result<CopyOutcome, BackupError> {
        let destination = self.location(content_hash);
        if destination.exists() && Self::verified(&destination, content_hash) {
            return Ok(CopyOutcome::AlreadyPresent);
        }

        let mut input = File::open(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BackupError::SourceMissing {
                path: source.to_path_buf(),
            },
            _ => BackupError::Io {
                path: source.to_path_buf(),
                source: e,
            },
        })?;

        let parent = destination.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| self.unreachable(e))?;

        // Written under a temporary name so a crash never leaves a partial
        // file at the final location
        let mut staged = tempfile::NamedTempFile::new_in(parent).map_err(|e| self.unreachable(e))?;
        let io_error = |source: io::Error| BackupError::Io {
            path: destination.clone(),
            source,
        };
        io::copy(&mut input, staged.as_file_mut()).map_err(io_error)?;
        staged.as_file().sync_all().map_err(io_error)?;

        let actual = hash_file(staged.path()).map_err(io_error)?;
        if actual != content_hash {
            return Err(BackupError::VerifyMismatch {
                content_hash: content_hash.to_string(),
                actual,
            });
        }

        staged
            .persist(&destination)
            .map_err(|e| io_error(e.error))?;
        tracing::debug!(
            source = %source.display(),
            destination = %destination.display(),
            "backed up"
        );
        Ok(CopyOutcome::Copied)
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hasher::hash_bytes;
    use tempfile::TempDir;

    #[test]
    fn copies_into_content_addressed_location() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"pixels").unwrap();
        let hash = hash_bytes(b"pixels");
        let sink = LocalFolderSink::new(dir.path().join("backup"));

        assert_eq!(sink.store(&source, &hash).unwrap(), CopyOutcome::Copied);

        let copy = sink.location(&hash);
        assert!(copy.starts_with(dir.path().join("backup").join(&hash[..2])));
        assert_eq!(fs::read(copy).unwrap(), b"pixels");
    }

    #[test]
    fn identical_content_is_stored_once() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();
        let hash = hash_bytes(b"same");
        let sink = LocalFolderSink::new(dir.path().join("backup"));

        assert_eq!(sink.store(&a, &hash).unwrap(), CopyOutcome::Copied);
        assert_eq!(sink.store(&b, &hash).unwrap(), CopyOutcome::AlreadyPresent);
    }

    #[test]
    fn changed_source_fails_verification() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"edited after indexing").unwrap();
        let indexed = hash_bytes(b"original");
        let sink = LocalFolderSink::new(dir.path().join("backup"));

        let result = sink.store(&source, &indexed);

        assert!(matches!(result, Err(BackupError::VerifyMismatch { .. })));
        assert!(!sink.location(&indexed).exists());
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let sink = LocalFolderSink::new(dir.path().join("backup"));
        let result = sink.store(&dir.path().join("gone.jpg"), "abcdef");
        assert!(matches!(result, Err(BackupError::SourceMissing { .. })));
    }

    #[test]
    fn unusable_destination_is_unreachable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"not a directory").unwrap();
        let sink = LocalFolderSink::new(blocker.join("backup"));

        assert!(matches!(
            sink.check_available(),
            Err(BackupError::DestinationUnreachable { .. })
        ));
    }
}
