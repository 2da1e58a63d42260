//! File filtering logic for the scanner.

use crate::config::ScanSettings;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Decides which entries the walk descends into and which files it emits
pub struct ImageFilter {
    /// Lowercase extensions to include
    extensions: HashSet<String>,
    /// Whether to include hidden files and directories
    include_hidden: bool,
    /// Full-path exclusions
    excludes: Vec<Regex>,
    /// Directories that are never entered (the app data directory)
    pruned_dirs: Vec<PathBuf>,
}

impl ImageFilter {
    /// Create a filter with the default extension allow-list
    pub fn new() -> Self {
        Self::from_settings(&ScanSettings::default())
    }

    /// Build a filter from scan settings. Invalid patterns are dropped with a
    /// warning; `ArchiveConfig::validate` rejects them earlier.
    pub fn from_settings(settings: &ScanSettings) -> Self {
        let excludes = settings
            .exclude_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "ignoring bad exclude pattern");
                    None
                }
            })
            .collect();

        Self {
            extensions: settings.extensions.iter().map(|e| e.to_lowercase()).collect(),
            include_hidden: settings.include_hidden,
            excludes,
            pruned_dirs: Vec::new(),
        }
    }

    /// Include hidden files (starting with .)
    pub fn with_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Never descend into `dir`
    pub fn prune_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pruned_dirs.push(dir.into());
        self
    }

    /// Whether the walk may enter or emit this entry at all
    pub fn should_visit(&self, path: &Path, is_root: bool) -> bool {
        if is_root {
            return true;
        }
        if !self.include_hidden && is_hidden(path) {
            return false;
        }
        if self.pruned_dirs.iter().any(|d| path.starts_with(d)) {
            return false;
        }
        let text = path.to_string_lossy();
        !self.excludes.iter().any(|re| re.is_match(&text))
    }

    /// Whether a regular file belongs in the index
    pub fn should_include(&self, path: &Path) -> bool {
        if !self.should_visit(path, false) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }
}

impl Default for ImageFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn includes_allowed_extensions_case_insensitively() {
        let filter = ImageFilter::new();
        assert!(filter.should_include(Path::new("/photos/image.jpg")));
        assert!(filter.should_include(Path::new("/photos/IMG_1234.HEIC")));
        assert!(!filter.should_include(Path::new("/photos/clip.mp4")));
        assert!(!filter.should_include(Path::new("/photos/no_extension")));
    }

    #[test]
    fn hidden_entries_excluded_by_default() {
        let filter = ImageFilter::new();
        assert!(!filter.should_include(Path::new("/photos/.hidden.jpg")));
        assert!(filter.with_hidden(true).should_include(Path::new("/photos/.hidden.jpg")));
    }

    #[test]
    fn exclude_patterns_match_full_path() {
        let settings = ScanSettings {
            exclude_patterns: vec![r"/thumbnails/".to_string()],
            ..Default::default()
        };
        let filter = ImageFilter::from_settings(&settings);
        assert!(!filter.should_include(Path::new("/photos/thumbnails/a.jpg")));
        assert!(filter.should_include(Path::new("/photos/2020/a.jpg")));
    }

    #[test]
    fn pruned_dir_is_never_visited() {
        let filter = ImageFilter::new().prune_dir("/photos/archive-data");
        assert!(!filter.should_visit(Path::new("/photos/archive-data/trash"), false));
        assert!(filter.should_visit(Path::new("/photos"), true));
    }
}
