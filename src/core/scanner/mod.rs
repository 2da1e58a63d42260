//! # Scanner Module
//!
//! Pure filesystem traversal: discovers candidate image files and classifies
//! them against what the index already knows. Never hashes or decodes.
//!
//! ## Pieces
//! - [`WalkDirScanner`] produces a lazy, restartable [`ScanWalk`] of
//!   [`FileDescriptor`]s. Unreadable entries and symlink loops come out as
//!   `Err(ScanError)` items; the walk keeps going.
//! - [`RescanDiff`] compares each descriptor to the last-known
//!   `(path, size, mtime)` set and reports unchanged / new / modified, then
//!   lists the paths that disappeared. Records under an entry the walk had
//!   to skip are never listed; the walk did not look there.
//! - [`reconcile_moves`] pairs disappeared records with new paths that carry
//!   the same content hash, so a move updates a path instead of creating a
//!   second record.
//!
//! ## Example
//! ```rust,ignore
//! let scanner = WalkDirScanner::new(ImageFilter::new(), ScanConfig::default());
//! for item in scanner.walk(Path::new("/Users/me/Pictures")) {
//!     match item {
//!         Ok(file) => println!("{} ({} bytes)", file.path.display(), file.size),
//!         Err(skip) => eprintln!("skipped: {}", skip),
//!     }
//! }
//! ```

mod diff;
mod filter;
mod walker;

pub use diff::{reconcile_moves, FileChange, KnownFile, MovedFile, RescanDiff};
pub use filter::ImageFilter;
pub use walker::{ScanConfig, ScanWalk, WalkDirScanner};

use crate::error::ScanError;
use crate::events::{null_sender, Event, EventSender, ScanEvent};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A discovered file, as seen by the filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Absolute path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub mtime: SystemTime,
}

impl FileDescriptor {
    /// Modification time as nanoseconds since the Unix epoch
    pub fn mtime_ns(&self) -> i64 {
        to_unix_nanos(self.mtime)
    }
}

/// Convert a timestamp to nanoseconds since the epoch (pre-epoch clamps to 0)
pub fn to_unix_nanos(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos()
        .min(i64::MAX as u128) as i64
}

/// Inverse of [`to_unix_nanos`]
pub fn from_unix_nanos(nanos: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos.max(0) as u64)
}

/// Eagerly collected result of walking several roots
#[derive(Debug, Default)]
pub struct ScanResult {
    /// Discovered files
    pub files: Vec<FileDescriptor>,
    /// Entries skipped with a warning
    pub skipped: Vec<ScanError>,
}

/// Files and skips produced by walking one root
pub type WalkItems<'a> = Box<dyn Iterator<Item = Result<FileDescriptor, ScanError>> + 'a>;

/// Trait for scanners, so pipelines can be driven by fakes in tests
pub trait PhotoScanner: Send + Sync {
    /// Lazily walk one root
    fn walk(&self, root: &std::path::Path) -> WalkItems<'_>;

    /// Walk every root and collect the results
    fn scan(&self, roots: &[PathBuf]) -> ScanResult {
        self.scan_with_events(roots, &null_sender())
    }

    /// Walk every root, reporting discoveries and skips as they happen
    fn scan_with_events(&self, roots: &[PathBuf], events: &EventSender) -> ScanResult {
        events.send(Event::Scan(ScanEvent::Started {
            roots: roots.to_vec(),
        }));

        let mut result = ScanResult::default();
        for root in roots {
            for item in self.walk(root) {
                match item {
                    Ok(file) => {
                        events.send(Event::Scan(ScanEvent::FileFound {
                            path: file.path.clone(),
                        }));
                        result.files.push(file);
                    }
                    Err(skip) => {
                        events.send(Event::Scan(ScanEvent::Skipped {
                            path: skip.path().map(|p| p.to_path_buf()).unwrap_or_default(),
                            reason: skip.to_string(),
                        }));
                        result.skipped.push(skip);
                    }
                }
            }
        }

        events.send(Event::Scan(ScanEvent::Completed {
            files_found: result.files.len(),
            skipped: result.skipped.len(),
        }));
        result
    }
}
