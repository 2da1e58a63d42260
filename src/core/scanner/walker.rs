//! Directory walking implementation using walkdir.
//!
//! The walk is depth-first with children sorted by file name, so the order
//! of emitted paths equals `Path` ordering. That makes a walk restartable:
//! [`WalkDirScanner::walk_from`] skips everything up to and including a
//! checkpoint path without re-reading the directories it already finished.

use super::{filter::ImageFilter, FileDescriptor, PhotoScanner, WalkItems};
use crate::config::ScanSettings;
use crate::error::ScanError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Configuration for the directory walk
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Whether to follow symbolic links
    pub follow_symlinks: bool,
    /// Maximum directory depth (None = unlimited)
    pub max_depth: Option<usize>,
}

impl From<&ScanSettings> for ScanConfig {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            follow_symlinks: settings.follow_symlinks,
            max_depth: settings.max_depth,
        }
    }
}

/// Scanner implementation using the walkdir crate
pub struct WalkDirScanner {
    config: ScanConfig,
    filter: ImageFilter,
}

impl WalkDirScanner {
    /// Create a new scanner
    pub fn new(filter: ImageFilter, config: ScanConfig) -> Self {
        Self { config, filter }
    }

    /// Build a scanner from the `scan` section of the configuration
    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self::new(ImageFilter::from_settings(settings), ScanConfig::from(settings))
    }

    /// Never descend into `dir` (used for the application data directory)
    pub fn prune_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.filter = self.filter.prune_dir(dir);
        self
    }

    /// Resume a walk after `checkpoint`, the last path fully handled
    pub fn walk_from(&self, root: &Path, checkpoint: &Path) -> ScanWalk<'_> {
        let mut walk = self.open(root);
        walk.checkpoint = Some(checkpoint.to_path_buf());
        walk
    }

    fn open(&self, root: &Path) -> ScanWalk<'_> {
        let mut walker = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name();
        if let Some(depth) = self.config.max_depth {
            walker = walker.max_depth(depth);
        }

        let root_error = if root.is_dir() {
            None
        } else {
            Some(ScanError::DirectoryNotFound {
                path: root.to_path_buf(),
            })
        };

        ScanWalk {
            inner: walker.into_iter(),
            filter: &self.filter,
            follow_symlinks: self.config.follow_symlinks,
            checkpoint: None,
            root_error,
            finished: false,
        }
    }
}

impl PhotoScanner for WalkDirScanner {
    fn walk(&self, root: &Path) -> WalkItems<'_> {
        Box::new(self.open(root))
    }
}

/// Lazy walk over one root.
///
/// Yields `Ok` for every candidate file and `Err` for every skipped entry.
/// Skips never end the walk.
pub struct ScanWalk<'a> {
    inner: walkdir::IntoIter,
    filter: &'a ImageFilter,
    follow_symlinks: bool,
    checkpoint: Option<PathBuf>,
    root_error: Option<ScanError>,
    finished: bool,
}

impl ScanWalk<'_> {
    /// Whether a directory lies entirely before the checkpoint
    fn before_checkpoint(&self, dir: &Path) -> bool {
        match &self.checkpoint {
            Some(cp) => dir < cp.as_path() && !cp.starts_with(dir),
            None => false,
        }
    }

    fn describe(&self, entry: &DirEntry) -> Option<Result<FileDescriptor, ScanError>> {
        let path = entry.path();

        if entry.path_is_symlink() && !self.follow_symlinks {
            // Unfollowed links are not indexed, but dangling ones are reported
            return match fs::metadata(path) {
                Err(e) if e.kind() == ErrorKind::NotFound => Some(Err(ScanError::BrokenSymlink {
                    path: path.to_path_buf(),
                })),
                _ => None,
            };
        }

        if !entry.file_type().is_file() || !self.filter.should_include(path) {
            return None;
        }

        if let Some(cp) = &self.checkpoint {
            if path <= cp.as_path() {
                return None;
            }
        }

        Some(match entry.metadata() {
            Ok(meta) => Ok(FileDescriptor {
                path: path.to_path_buf(),
                size: meta.len(),
                mtime: meta.modified().unwrap_or(std::time::UNIX_EPOCH),
            }),
            Err(e) => Err(classify_walk_error(e)),
        })
    }
}

impl Iterator for ScanWalk<'_> {
    type Item = Result<FileDescriptor, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Some(error) = self.root_error.take() {
            self.finished = true;
            return Some(Err(error));
        }

        loop {
            let entry = match self.inner.next() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => return Some(Err(classify_walk_error(e))),
                Some(Ok(entry)) => entry,
            };

            let is_root = entry.depth() == 0;
            if !self.filter.should_visit(entry.path(), is_root) {
                if entry.file_type().is_dir() {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_dir() {
                if !is_root && self.before_checkpoint(entry.path()) {
                    self.inner.skip_current_dir();
                }
                continue;
            }

            if let Some(item) = self.describe(&entry) {
                if let Err(skip) = &item {
                    tracing::warn!(error = %skip, "skipping entry");
                }
                return Some(item);
            }
        }
    }
}

/// Map a walkdir failure onto the scan error taxonomy
fn classify_walk_error(error: walkdir::Error) -> ScanError {
    let path = error.path().map(|p| p.to_path_buf()).unwrap_or_default();

    if let Some(ancestor) = error.loop_ancestor() {
        return ScanError::SymlinkLoop {
            path,
            ancestor: ancestor.to_path_buf(),
        };
    }

    match error.io_error().map(|e| e.kind()) {
        Some(ErrorKind::PermissionDenied) => ScanError::PermissionDenied { path },
        Some(ErrorKind::NotFound) => ScanError::BrokenSymlink { path },
        _ => {
            let source = match error.into_io_error() {
                Some(io) => io,
                None => std::io::Error::new(ErrorKind::Other, "walk failed"),
            };
            ScanError::ReadEntry { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        path
    }

    fn scanner() -> WalkDirScanner {
        WalkDirScanner::new(ImageFilter::new(), ScanConfig::default())
    }

    fn ok_paths(walk: impl Iterator<Item = Result<FileDescriptor, ScanError>>) -> Vec<PathBuf> {
        walk.filter_map(|r| r.ok()).map(|f| f.path).collect()
    }

    #[test]
    fn walk_empty_directory_yields_nothing() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(scanner().walk(temp_dir.path()).count(), 0);
    }

    #[test]
    fn walk_reports_size_and_skips_non_images() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "photo.jpg");
        touch(temp_dir.path(), "notes.txt");

        let files: Vec<_> = scanner()
            .walk(temp_dir.path())
            .filter_map(|r| r.ok())
            .collect();

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("photo.jpg"));
        assert_eq!(files[0].size, 4);
    }

    #[test]
    fn walk_order_is_path_order() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "b.jpg");
        touch(temp_dir.path(), "a/z.jpg");
        touch(temp_dir.path(), "a.jpg");
        touch(temp_dir.path(), "c/d/e.png");

        let paths = ok_paths(scanner().walk(temp_dir.path()));
        let mut sorted = paths.clone();
        sorted.sort();

        assert_eq!(paths.len(), 4);
        assert_eq!(paths, sorted);
    }

    #[test]
    fn walk_from_resumes_after_checkpoint() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "a/1.jpg");
        let checkpoint = touch(temp_dir.path(), "a/2.jpg");
        touch(temp_dir.path(), "a/3.jpg");
        touch(temp_dir.path(), "b/1.jpg");

        let paths = ok_paths(scanner().walk_from(temp_dir.path(), &checkpoint));

        assert_eq!(
            paths,
            vec![temp_dir.path().join("a/3.jpg"), temp_dir.path().join("b/1.jpg")]
        );
    }

    #[test]
    fn hidden_directories_are_not_entered() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "visible.jpg");
        touch(temp_dir.path(), ".cache/thumb.jpg");

        let paths = ok_paths(scanner().walk(temp_dir.path()));
        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn pruned_directory_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "keep.jpg");
        touch(temp_dir.path(), "appdata/trash/old.jpg");

        let scanner = scanner().prune_dir(temp_dir.path().join("appdata"));
        let paths = ok_paths(scanner.walk(temp_dir.path()));

        assert_eq!(paths, vec![temp_dir.path().join("keep.jpg")]);
    }

    #[test]
    fn missing_root_is_a_single_skip() {
        let items: Vec<_> = scanner().walk(Path::new("/nonexistent/path/12345")).collect();
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(ScanError::DirectoryNotFound { .. })));
    }

    #[test]
    fn scan_collects_multiple_roots() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        touch(first.path(), "one.jpg");
        touch(second.path(), "two.png");

        let result = scanner().scan(&[first.path().to_path_buf(), second.path().to_path_buf()]);

        assert_eq!(result.files.len(), 2);
        assert!(result.skipped.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_skipped_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "sub/photo.jpg");
        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("sub/loop")).unwrap();

        let scanner = WalkDirScanner::new(
            ImageFilter::new(),
            ScanConfig {
                follow_symlinks: true,
                max_depth: None,
            },
        );
        let items: Vec<_> = scanner.walk(temp_dir.path()).collect();

        assert!(items
            .iter()
            .any(|r| matches!(r, Err(ScanError::SymlinkLoop { .. }))));
        assert_eq!(items.iter().filter(|r| r.is_ok()).count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn broken_symlink_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "photo.jpg");
        std::os::unix::fs::symlink(
            temp_dir.path().join("gone.jpg"),
            temp_dir.path().join("dangling.jpg"),
        )
        .unwrap();

        let items: Vec<_> = scanner().walk(temp_dir.path()).collect();

        assert!(items
            .iter()
            .any(|r| matches!(r, Err(ScanError::BrokenSymlink { .. }))));
        assert_eq!(items.iter().filter(|r| r.is_ok()).count(), 1);
    }
}
