//! # History Module
//!
//! One summary row per scan or backup pass, kept in the index store so the
//! CLI can show what past runs did.

mod repository;
mod types;

pub use repository::HistoryRepository;
pub use types::{RunKind, RunRecord, RunStatus};
