//! # Core Module
//!
//! The UI-agnostic archive engine.
//!
//! ## Modules
//! - `scanner` - Walks photo roots and classifies files against the index
//! - `metadata` - Capture date, location and document detection
//! - `hasher` - Content digests and perceptual hashes
//! - `store` - The SQLite index every other component reads and writes
//! - `grouper` - Exact and near-duplicate groups
//! - `faces` - Incremental face clustering and periodic re-merge
//! - `backup` - Per-record backup state and backup passes
//! - `trash` - Reversible removal into the app-managed trash
//! - `pipeline` - Orchestrates an indexing run
//! - `query` - Read-only API for presentation layers
//! - `history` - Summaries of past scan and backup passes

pub mod backup;
pub mod faces;
pub mod grouper;
pub mod hasher;
pub mod history;
pub mod metadata;
pub mod pipeline;
pub mod query;
pub mod scanner;
pub mod store;
pub mod trash;

// Re-export commonly used types
pub use grouper::{DuplicateGroup, DuplicateGrouper, GroupKind};
pub use hasher::{HashEngine, PerceptualHash};
pub use pipeline::{CancellationToken, Pipeline, PipelineResult};
pub use query::ArchiveQuery;
pub use scanner::FileDescriptor;
pub use store::{BackupStatus, IndexStore, PhotoFilter, PhotoRecord};
