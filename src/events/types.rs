//! Event type definitions for progress reporting.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// All events emitted by the archive engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    /// Directory walk events
    Scan(ScanEvent),
    /// Hash/extract/write progress for the indexing stage
    Index(IndexEvent),
    /// Duplicate grouping events
    Group(GroupEvent),
    /// Face clustering events
    Face(FaceEvent),
    /// Backup pass events
    Backup(BackupEvent),
    /// Trash area events
    Trash(TrashEvent),
    /// Pipeline-level events
    Pipeline(PipelineEvent),
}

/// Events during the directory walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    /// Walking has started
    Started { roots: Vec<PathBuf> },
    /// A candidate file was discovered
    FileFound { path: PathBuf },
    /// An entry was skipped; the walk continues
    Skipped { path: PathBuf, reason: String },
    /// Walking finished
    Completed { files_found: usize, skipped: usize },
}

/// Events during the hash/extract/write stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexEvent {
    /// Periodic counts
    Progress(IndexProgress),
    /// A file failed to decode and was flagged for review
    Flagged { path: PathBuf, reason: String },
    /// A moved file was reconciled onto its existing record
    Moved { from: PathBuf, to: PathBuf },
    /// A batch of changes was committed
    Committed { records: usize },
}

/// Counts processed/remaining/errored for the indexing stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexProgress {
    /// Files fully handled (including unchanged skips)
    pub processed: usize,
    /// Files discovered but not yet handled
    pub remaining: usize,
    /// Files that failed to read or decode
    pub errored: usize,
    /// Files skipped because size and mtime were unchanged
    pub unchanged: usize,
}

/// Events from the duplicate grouper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GroupEvent {
    /// Grouping started; `full` is false for incremental runs
    Started { photos: usize, full: bool },
    /// Grouping finished
    Completed { groups: usize, grouped_photos: usize },
}

/// Events from the face clusterer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaceEvent {
    /// A new identity cluster was created
    ClusterCreated { face_id: i64 },
    /// Re-clustering merged one cluster into another
    ClustersMerged { kept: i64, removed: i64 },
    /// Re-clustering finished
    ReclusterCompleted { clusters: usize, merges: usize },
}

/// Events during a backup pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackupEvent {
    /// The pass selected its queue
    Started { queued: usize },
    /// A record was copied and verified
    BackedUp { id: i64, deduplicated: bool },
    /// A record failed and will be retried on the next pass
    Failed { id: i64, reason: String },
    /// The pass finished
    Completed { backed_up: usize, failed: usize },
}

/// Events from the trash area
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrashEvent {
    /// A photo was moved into the trash
    Trashed { id: i64, to: PathBuf },
    /// A photo was moved back to its original path
    Restored { id: i64, path: PathBuf },
    /// The trash was emptied
    Purged { records: usize },
}

/// Pipeline-level events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Pipeline has started
    Started,
    /// Moving to a new phase
    PhaseChanged { phase: PipelinePhase },
    /// Pipeline completed
    Completed { summary: PassSummary },
    /// Pipeline was cancelled; committed work is kept
    Cancelled,
}

/// Phases of an indexing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    Scanning,
    Indexing,
    Reconciling,
    Grouping,
}

/// Summary reported at the end of every scan or backup pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PassSummary {
    /// Files seen by the walk (or records selected by a backup pass)
    pub total: usize,
    /// Records inserted
    pub added: usize,
    /// Records whose content changed
    pub modified: usize,
    /// Records skipped as unchanged
    pub unchanged: usize,
    /// Records reconciled as moves
    pub moved: usize,
    /// Records flagged missing
    pub missing: usize,
    /// Per-file failures (skips, decode failures, copy failures)
    pub errors: Vec<String>,
    /// Whether the pass was cancelled before finishing
    pub cancelled: bool,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl PassSummary {
    /// Number of records written by the pass
    pub fn writes(&self) -> usize {
        self.added + self.modified + self.moved + self.missing
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelinePhase::Scanning => write!(f, "Scanning"),
            PipelinePhase::Indexing => write!(f, "Indexing"),
            PipelinePhase::Reconciling => write!(f, "Reconciling"),
            PipelinePhase::Grouping => write!(f, "Grouping"),
        }
    }
}
