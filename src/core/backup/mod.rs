//! # Backup Module
//!
//! Tracks per-record backup state and runs backup passes.
//!
//! ## State Machine
//! ```text
//! NotBacked ──copy ok──▶ BackedUp ──content changed──▶ NotBacked
//!     │                     ▲
//!     └──copy failed──▶ Failed
//! ```
//! Failed records stay `Failed` (attempt count grows) until a later pass
//! succeeds. They are never retried within the pass that failed them.
//!
//! ## Crash Safety
//! Each record's status commits in its own transaction right after its copy
//! is verified. A pass killed mid-copy leaves earlier records `BackedUp`
//! and the interrupted record untouched, so the next pass resumes there.
//! Copies are content addressed, so identical bytes at several paths are
//! stored once.

mod sink;

pub use sink::{BackupSink, CopyOutcome, LocalFolderSink};

use crate::core::pipeline::CancellationToken;
use crate::core::store::{
    backup_queue, record_backup_retry_failure, set_backup_status, BackupStatus, IndexStore,
    PhotoRecord,
};
use crate::error::{BackupError, StoreError};
use crate::events::{BackupEvent, Event, EventSender, PassSummary};
use std::time::Instant;

/// Counts for one backup pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackupReport {
    /// Records selected at the start of the pass
    pub queued: usize,
    pub backed_up: usize,
    /// Backed up without copying (content already at the destination)
    pub deduplicated: usize,
    pub failed: usize,
    /// One line per failure
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl BackupReport {
    /// The pass as a history summary
    pub fn to_summary(&self) -> PassSummary {
        PassSummary {
            total: self.queued,
            added: self.backed_up,
            unchanged: self.deduplicated,
            errors: self.errors.clone(),
            cancelled: self.cancelled,
            duration_ms: self.duration_ms,
            ..Default::default()
        }
    }
}

/// Runs backup passes against one sink
pub struct BackupTracker<'a> {
    store: &'a IndexStore,
    sink: &'a dyn BackupSink,
}

impl<'a> BackupTracker<'a> {
    pub fn new(store: &'a IndexStore, sink: &'a dyn BackupSink) -> Self {
        Self { store, sink }
    }

    /// Records the next pass would pick up
    pub fn queue(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.store.backup_queue()
    }

    /// Back up every `NotBacked` or `Failed` record selected at the start.
    ///
    /// Per-record failures are recorded, never returned; only a store
    /// failure ends the pass early with an error.
    pub fn run_pass(
        &self,
        cancel: &CancellationToken,
        events: &EventSender,
    ) -> Result<BackupReport, StoreError> {
        let started = Instant::now();
        let queue = self.store.read(backup_queue)?;
        let mut report = BackupReport {
            queued: queue.len(),
            ..Default::default()
        };
        events.send(Event::Backup(BackupEvent::Started {
            queued: queue.len(),
        }));
        tracing::info!(queued = queue.len(), sink = %self.sink.describe(), "backup pass started");

        let unavailable = self.sink.check_available().err();

        for record in &queue {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let result = match &unavailable {
                Some(error) => Err(BackupError::DestinationUnreachable {
                    path: self.sink.describe().into(),
                    reason: error.to_string(),
                }),
                None => self.sink.store(&record.path, &record.content_hash),
            };

            match result {
                Ok(outcome) => {
                    let id = record.id;
                    self.store
                        .write(|tx| set_backup_status(tx, id, BackupStatus::BackedUp, None))?;
                    let deduplicated = outcome == CopyOutcome::AlreadyPresent;
                    report.backed_up += 1;
                    if deduplicated {
                        report.deduplicated += 1;
                    }
                    events.send(Event::Backup(BackupEvent::BackedUp { id, deduplicated }));
                }
                Err(BackupError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(error) => {
                    self.record_failure(record, &error)?;
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("{}: {}", record.path.display(), error));
                    events.send(Event::Backup(BackupEvent::Failed {
                        id: record.id,
                        reason: error.to_string(),
                    }));
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        events.send(Event::Backup(BackupEvent::Completed {
            backed_up: report.backed_up,
            failed: report.failed,
        }));
        tracing::info!(
            backed_up = report.backed_up,
            deduplicated = report.deduplicated,
            failed = report.failed,
            cancelled = report.cancelled,
            "backup pass finished"
        );
        Ok(report)
    }

    fn record_failure(&self, record: &PhotoRecord, error: &BackupError) -> Result<(), StoreError> {
        tracing::warn!(path = %record.path.display(), %error, "backup failed");
        let id = record.id;
        let message = error.to_string();
        self.store.write(|tx| match record.backup_status {
            BackupStatus::Failed => record_backup_retry_failure(tx, id, &message),
            _ => set_backup_status(tx, id, BackupStatus::Failed, Some(&message)),
        })
    }
}
