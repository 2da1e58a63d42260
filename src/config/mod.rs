//! # Config Module
//!
//! Engine settings and the on-disk application layout.
//!
//! Settings live in a JSON file (`config.json`) inside the application data
//! directory. A missing file means defaults; a malformed file is an error.
//!
//! ## Layout
//! ```text
//! <data dir>/
//!   photo_archive.db   the index store
//!   trash/             files moved out of the photo tree, reversible
//!   config.json        this configuration (optional)
//! ```

use crate::error::ArchiveError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the index store file inside the data directory
pub const STORE_FILE_NAME: &str = "photo_archive.db";
/// Name of the trash subdirectory inside the data directory
pub const TRASH_DIR_NAME: &str = "trash";
/// Name of the optional configuration file inside the data directory
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Resolved locations of everything the engine persists
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Application data directory, distinct from any photo tree
    pub data_dir: PathBuf,
    /// The index store file
    pub store: PathBuf,
    /// The trash directory
    pub trash: PathBuf,
}

impl AppPaths {
    /// Lay out paths under an explicit data directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            store: data_dir.join(STORE_FILE_NAME),
            trash: data_dir.join(TRASH_DIR_NAME),
            data_dir,
        }
    }

    /// The platform data directory (e.g. `~/.local/share/photo-archive`)
    pub fn default_location() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join("photo-archive"))
    }

    /// Path of the configuration file
    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    /// Create the data and trash directories
    pub fn ensure(&self) -> Result<(), ArchiveError> {
        for dir in [&self.data_dir, &self.trash] {
            std::fs::create_dir_all(dir).map_err(|e| {
                ArchiveError::Config(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub scan: ScanSettings,
    pub hashing: HashingSettings,
    pub grouping: GroupingSettings,
    pub faces: FaceSettings,
    pub backup: BackupSettings,
}

/// Directory walk settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Extension allow-list, lowercase without the dot
    pub extensions: Vec<String>,
    /// Include dot-files and dot-directories
    pub include_hidden: bool,
    /// Follow symbolic links (loops are detected and skipped)
    pub follow_symlinks: bool,
    /// Maximum directory depth (None = unlimited)
    pub max_depth: Option<usize>,
    /// Regular expressions matched against full paths to exclude
    pub exclude_patterns: Vec<String>,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp", "heic", "heif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            include_hidden: false,
            follow_symlinks: false,
            max_depth: None,
            exclude_patterns: Vec::new(),
        }
    }
}

/// Worker pool settings for the hashing stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingSettings {
    /// Hashing workers (0 = one per core)
    pub workers: usize,
    /// Capacity of the queue between the walker and the workers
    pub queue_capacity: usize,
    /// Records per store transaction
    pub batch_size: usize,
}

impl Default for HashingSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 256,
            batch_size: 200,
        }
    }
}

impl HashingSettings {
    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            rayon::current_num_threads().max(1)
        } else {
            self.workers
        }
    }
}

/// Near-duplicate grouping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingSettings {
    /// Maximum Hamming distance (of 64 bits) for two photos to be near-duplicates
    pub threshold: u32,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self { threshold: 8 }
    }
}

/// Face clustering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceSettings {
    /// Maximum cosine distance for an embedding to join an existing cluster
    pub assign_distance: f32,
    /// Maximum cosine distance between centroids for re-clustering to merge them
    pub merge_distance: f32,
}

impl Default for FaceSettings {
    fn default() -> Self {
        Self {
            assign_distance: 0.4,
            merge_distance: 0.3,
        }
    }
}

/// Backup settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Destination folder for the local backup sink
    pub destination: Option<PathBuf>,
}

impl ArchiveConfig {
    /// Load configuration from a JSON file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ArchiveError::Config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ArchiveError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ArchiveError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ArchiveError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ArchiveError::Config(format!("cannot write {}: {}", path.display(), e)))
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.grouping.threshold > 64 {
            return Err(ArchiveError::Config(format!(
                "grouping threshold {} exceeds the 64-bit hash width",
                self.grouping.threshold
            )));
        }
        if self.hashing.queue_capacity == 0 || self.hashing.batch_size == 0 {
            return Err(ArchiveError::Config(
                "queue_capacity and batch_size must be at least 1".to_string(),
            ));
        }
        for pattern in &self.scan.exclude_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                ArchiveError::Config(format!("bad exclude pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ArchiveConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.grouping.threshold, 8);
        assert!(config.scan.extensions.contains(&"jpg".to_string()));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "grouping": { "threshold": 4 } }"#).unwrap();

        let config = ArchiveConfig::load(&path).unwrap();
        assert_eq!(config.grouping.threshold, 4);
        assert_eq!(config.hashing.batch_size, 200);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            ArchiveConfig::load(&path),
            Err(ArchiveError::Config(_))
        ));
    }

    #[test]
    fn bad_exclude_pattern_is_rejected() {
        let mut config = ArchiveConfig::default();
        config.scan.exclude_patterns.push("(".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn layout_keeps_store_and_trash_under_data_dir() {
        let paths = AppPaths::new("/data/archive");
        assert_eq!(paths.store, PathBuf::from("/data/archive/photo_archive.db"));
        assert_eq!(paths.trash, PathBuf::from("/data/archive/trash"));
    }
}
