//! Rescan classification against the last-known index state.

use super::FileDescriptor;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// What the index last recorded for a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFile {
    pub id: i64,
    pub path: PathBuf,
    pub size: u64,
    pub mtime_ns: i64,
    pub content_hash: Option<String>,
    /// Already flagged missing by an earlier pass
    pub missing: bool,
}

/// Classification of one walked file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// Size and mtime match the index; nothing to do
    Unchanged,
    /// Path never indexed (or only as a deleted record)
    New,
    /// Size or mtime differ; rehash to confirm
    Modified { id: i64 },
    /// A record flagged missing is back at its path; rehash to confirm
    Reappeared { id: i64 },
}

impl FileChange {
    /// Whether the file needs hashing
    pub fn needs_work(&self) -> bool {
        !matches!(self, FileChange::Unchanged)
    }
}

/// A removed record explained by a new path with the same bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedFile {
    pub id: i64,
    pub from: PathBuf,
    pub to: PathBuf,
}

/// Tracks which known paths a walk has seen
#[derive(Debug, Default)]
pub struct RescanDiff {
    known: HashMap<PathBuf, KnownFile>,
    seen: HashSet<PathBuf>,
    /// Entries the walk could not read; nothing under them was visited
    skipped: Vec<PathBuf>,
}

impl RescanDiff {
    pub fn new(known: impl IntoIterator<Item = KnownFile>) -> Self {
        Self {
            known: known.into_iter().map(|k| (k.path.clone(), k)).collect(),
            seen: HashSet::new(),
            skipped: Vec::new(),
        }
    }

    /// Classify a walked file and mark its path as seen
    pub fn classify(&mut self, file: &FileDescriptor) -> FileChange {
        self.seen.insert(file.path.clone());

        match self.known.get(&file.path) {
            None => FileChange::New,
            Some(k) if k.missing => FileChange::Reappeared { id: k.id },
            Some(k) if k.size == file.size && k.mtime_ns == file.mtime_ns() => {
                FileChange::Unchanged
            }
            Some(k) => FileChange::Modified { id: k.id },
        }
    }

    /// What the index recorded for `path`
    pub fn known(&self, path: &Path) -> Option<&KnownFile> {
        self.known.get(path)
    }

    /// Record an entry the walk skipped. Records at or below `path` were
    /// not visited, so they are never reported unseen.
    pub fn skip_subtree(&mut self, path: &Path) {
        self.skipped.push(path.to_path_buf());
    }

    fn under_skipped(&self, path: &Path) -> bool {
        self.skipped.iter().any(|skipped| path.starts_with(skipped))
    }

    /// Known records the walk could have produced but did not, in path order
    pub fn unseen(&self) -> Vec<KnownFile> {
        let mut unseen: Vec<KnownFile> = self
            .known
            .values()
            .filter(|k| !self.seen.contains(&k.path) && !self.under_skipped(&k.path))
            .cloned()
            .collect();
        unseen.sort_by(|a, b| a.path.cmp(&b.path));
        unseen
    }

    /// Content hashes of every known record
    pub fn known_hashes(&self) -> HashSet<String> {
        self.known
            .values()
            .filter_map(|k| k.content_hash.clone())
            .collect()
    }

    /// Number of known records
    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}

/// Pair vanished records with new paths carrying the same content hash.
///
/// New paths are taken in path order; each claims the lowest-id unclaimed
/// vanished record with its hash. Unmatched new paths are genuinely new.
pub fn reconcile_moves(
    vanished: &[KnownFile],
    new_files: &[(PathBuf, String)],
) -> Vec<MovedFile> {
    let mut by_hash: HashMap<&str, Vec<&KnownFile>> = HashMap::new();
    for record in vanished {
        if let Some(hash) = &record.content_hash {
            by_hash.entry(hash.as_str()).or_default().push(record);
        }
    }
    for candidates in by_hash.values_mut() {
        // Highest id first so pop() yields the lowest
        candidates.sort_by(|a, b| b.id.cmp(&a.id));
    }

    let mut ordered: Vec<&(PathBuf, String)> = new_files.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    let mut moves = Vec::new();
    for (path, hash) in ordered {
        if let Some(record) = by_hash.get_mut(hash.as_str()).and_then(|c| c.pop()) {
            moves.push(MovedFile {
                id: record.id,
                from: record.path.clone(),
                to: path.clone(),
            });
        }
    }
    moves
}
