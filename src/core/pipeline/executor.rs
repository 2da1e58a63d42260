//! Pipeline execution implementation.

use super::CancellationToken;
use crate::config::ArchiveConfig;
use crate::core::faces::{FaceClusterer, FaceDetector, NoFaceDetector};
use crate::core::grouper::{DuplicateGrouper, GroupingOutcome};
use crate::core::hasher::{hash_bytes, read_file_bytes, HashEngine, ImageDecoder};
use crate::core::metadata::MetadataExtractor;
use crate::core::scanner::{
    reconcile_moves, FileChange, FileDescriptor, PhotoScanner, RescanDiff, WalkDirScanner,
};
use crate::core::store::{IndexStore, NewPhoto, PhotoChange};
use crate::error::{ArchiveError, ScanError, StoreError};
use crate::events::{
    null_sender, Event, EventSender, IndexEvent, IndexProgress, PassSummary, PipelineEvent,
    PipelinePhase, ScanEvent,
};
use crossbeam_channel::{bounded, Sender};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// Progress is reported at least this often (in handled files)
const PROGRESS_EVERY: usize = 100;

/// Result of one indexing run
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Counts and per-file failures
    pub summary: PassSummary,
    /// Grouping run after indexing (None when skipped or cancelled)
    pub grouping: Option<GroupingOutcome>,
    /// Face embeddings assigned to clusters
    pub faces_assigned: usize,
}

/// Builder for pipeline configuration
pub struct PipelineBuilder {
    roots: Vec<PathBuf>,
    config: ArchiveConfig,
    decoder: Option<Arc<dyn ImageDecoder>>,
    detector: Arc<dyn FaceDetector>,
    scanner: Option<Arc<dyn PhotoScanner>>,
    cancel: CancellationToken,
    exclude: Vec<PathBuf>,
    group: bool,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            config: ArchiveConfig::default(),
            decoder: None,
            detector: Arc::new(NoFaceDetector),
            scanner: None,
            cancel: CancellationToken::new(),
            exclude: Vec::new(),
            group: true,
        }
    }

    /// Directories to index
    pub fn roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.roots = roots;
        self
    }

    pub fn config(mut self, config: ArchiveConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the image decoder
    pub fn decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Detector producing face embeddings
    pub fn face_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Replace the directory walker. Excluded directories apply only to the
    /// default walker.
    pub fn scanner(mut self, scanner: Arc<dyn PhotoScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    /// Token the caller can use to stop the run
    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Never walk into `dir` (the application data directory)
    pub fn exclude(mut self, dir: impl Into<PathBuf>) -> Self {
        self.exclude.push(dir.into());
        self
    }

    /// Update duplicate groups after indexing (default true)
    pub fn group_after(mut self, group: bool) -> Self {
        self.group = group;
        self
    }

    /// Build the pipeline
    pub fn build(self) -> Pipeline {
        let scanner = match self.scanner {
            Some(scanner) => scanner,
            None => Arc::new(
                self.exclude
                    .iter()
                    .fold(WalkDirScanner::from_settings(&self.config.scan), |s, dir| {
                        s.prune_dir(dir.clone())
                    }),
            ),
        };
        let engine = match self.decoder {
            Some(decoder) => HashEngine::with_decoder(decoder),
            None => HashEngine::new(),
        };

        Pipeline {
            roots: self.roots,
            scanner,
            engine,
            extractor: MetadataExtractor::new(),
            detector: self.detector,
            clusterer: FaceClusterer::from_settings(&self.config.faces),
            grouper: DuplicateGrouper::from_settings(&self.config.grouping),
            config: self.config,
            cancel: self.cancel,
            group: self.group,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A changed file queued for hashing
struct Work {
    file: FileDescriptor,
    change: FileChange,
    known_hash: Option<String>,
}

/// What a worker made of one file
enum Processed {
    /// Bytes match the index; only size/mtime moved
    SameContent { file: FileDescriptor, change: FileChange },
    Indexed {
        change: FileChange,
        photo: NewPhoto,
        faces: Vec<Vec<f32>>,
        /// Decode failure, when the file was stored for review
        flagged: Option<String>,
    },
    Unreadable { file: FileDescriptor, reason: String },
}

/// Messages reaching the writer
enum Message {
    Found,
    Unchanged,
    Skipped(ScanError),
    Processed(Processed),
}

/// A change waiting for the next commit, with the faces found on it
struct Pending {
    change: PhotoChange,
    faces: Vec<Vec<f32>>,
}

/// Writer-side state of one run
#[derive(Default)]
struct Ledger {
    summary: PassSummary,
    progress: IndexProgress,
    found: usize,
    batch: Vec<Pending>,
    /// New paths whose bytes are already indexed: possible moves
    held_back: Vec<(NewPhoto, Vec<Vec<f32>>)>,
    /// Committed photos with faces to cluster
    faces: Vec<(i64, Vec<Vec<f32>>)>,
}

/// The indexing pipeline: walk, hash, extract, commit, reconcile, group
pub struct Pipeline {
    roots: Vec<PathBuf>,
    config: ArchiveConfig,
    scanner: Arc<dyn PhotoScanner>,
    engine: HashEngine,
    extractor: MetadataExtractor,
    detector: Arc<dyn FaceDetector>,
    clusterer: FaceClusterer,
    grouper: DuplicateGrouper,
    cancel: CancellationToken,
    group: bool,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Run the pipeline without events
    pub fn run(&self, store: &IndexStore) -> Result<PipelineResult, ArchiveError> {
        self.run_with_events(store, &null_sender())
    }

    /// Run the pipeline with event reporting.
    ///
    /// One file's failure never stops the run; only a store failure does.
    pub fn run_with_events(
        &self,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<PipelineResult, ArchiveError> {
        let start_time = Instant::now();
        events.send(Event::Pipeline(PipelineEvent::Started));
        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Scanning,
        }));

        let diff = RescanDiff::new(store.known_files(&self.roots)?);
        let known_hashes = diff.known_hashes();
        tracing::info!(
            roots = self.roots.len(),
            known = diff.known_count(),
            detector = self.detector.name(),
            "indexing started"
        );

        let workers = self.config.hashing.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("hash-{i}"))
            .build()
            .map_err(|e| ArchiveError::Config(format!("cannot start {workers} workers: {e}")))?;

        let capacity = self.config.hashing.queue_capacity;
        let (work_tx, work_rx) = bounded::<Work>(capacity);
        let (message_tx, message_rx) = bounded::<Message>(capacity);
        let halt = CancellationToken::new();
        let mut ledger = Ledger::default();

        events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
            phase: PipelinePhase::Indexing,
        }));

        let (diff, write_result) = thread::scope(|s| {
            let walker = {
                let message_tx = message_tx.clone();
                let halt = &halt;
                s.spawn(move || self.walk(diff, work_tx, message_tx, halt, events))
            };

            {
                let message_tx = message_tx.clone();
                let halt = &halt;
                s.spawn(move || {
                    pool.install(|| {
                        work_rx.into_iter().par_bridge().for_each_with(
                            message_tx,
                            |tx, work| {
                                if self.stopped(halt) {
                                    return;
                                }
                                let _ = tx.send(Message::Processed(self.process(work)));
                            },
                        )
                    })
                });
            }
            drop(message_tx);

            let mut write_result = Ok(());
            for message in message_rx.iter() {
                if write_result.is_err() {
                    continue;
                }
                write_result = self.handle(message, &mut ledger, store, &known_hashes, events);
                if write_result.is_err() {
                    halt.cancel();
                }
            }
            if write_result.is_ok() {
                write_result = self.flush(&mut ledger, store, events);
            }

            let diff = walker.join().unwrap_or_default();
            (diff, write_result)
        });
        write_result?;

        let cancelled = self.cancel.is_cancelled();
        if !cancelled {
            events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
                phase: PipelinePhase::Reconciling,
            }));
            self.reconcile(&diff, &mut ledger, store, events)?;
        } else {
            tracing::info!(
                held_back = ledger.held_back.len(),
                "cancelled; skipping reconciliation"
            );
        }

        let faces_assigned = self.assign_faces(&mut ledger, store, events)?;

        let grouping = if self.group && !cancelled {
            events.send(Event::Pipeline(PipelineEvent::PhaseChanged {
                phase: PipelinePhase::Grouping,
            }));
            Some(self.grouper.update(store, events)?)
        } else {
            None
        };

        let mut summary = ledger.summary;
        summary.total = ledger.found;
        summary.cancelled = cancelled;
        summary.duration_ms = start_time.elapsed().as_millis() as u64;

        if cancelled {
            events.send(Event::Pipeline(PipelineEvent::Cancelled));
        }
        events.send(Event::Pipeline(PipelineEvent::Completed {
            summary: summary.clone(),
        }));
        tracing::info!(
            total = summary.total,
            added = summary.added,
            modified = summary.modified,
            moved = summary.moved,
            missing = summary.missing,
            errors = summary.errors.len(),
            "indexing finished"
        );

        Ok(PipelineResult {
            summary,
            grouping,
            faces_assigned,
        })
    }

    fn stopped(&self, halt: &CancellationToken) -> bool {
        self.cancel.is_cancelled() || halt.is_cancelled()
    }

    /// Walker stage: classify every file, queue the changed ones
    fn walk(
        &self,
        mut diff: RescanDiff,
        work_tx: Sender<Work>,
        message_tx: Sender<Message>,
        halt: &CancellationToken,
        events: &EventSender,
    ) -> RescanDiff {
        events.send(Event::Scan(ScanEvent::Started {
            roots: self.roots.clone(),
        }));
        let mut found = 0;
        let mut skipped = 0;

        'roots: for root in &self.roots {
            for item in self.scanner.walk(root) {
                if self.stopped(halt) {
                    break 'roots;
                }
                match item {
                    Ok(file) => {
                        found += 1;
                        let change = diff.classify(&file);
                        let _ = message_tx.send(Message::Found);
                        if !change.needs_work() {
                            let _ = message_tx.send(Message::Unchanged);
                            continue;
                        }
                        if events.is_listening() {
                            events.send(Event::Scan(ScanEvent::FileFound {
                                path: file.path.clone(),
                            }));
                        }
                        let known_hash =
                            diff.known(&file.path).and_then(|k| k.content_hash.clone());
                        let work = Work {
                            file,
                            change,
                            known_hash,
                        };
                        if work_tx.send(work).is_err() {
                            break 'roots;
                        }
                    }
                    Err(skip) => {
                        skipped += 1;
                        tracing::warn!(%skip, "skipped during walk");
                        if let Some(path) = skip.path() {
                            diff.skip_subtree(path);
                        }
                        events.send(Event::Scan(ScanEvent::Skipped {
                            path: skip.path().map(|p| p.to_path_buf()).unwrap_or_default(),
                            reason: skip.to_string(),
                        }));
                        let _ = message_tx.send(Message::Skipped(skip));
                    }
                }
            }
        }

        events.send(Event::Scan(ScanEvent::Completed {
            files_found: found,
            skipped,
        }));
        diff
    }

    /// Worker stage: one read, then content hash, decode, metadata and faces
    fn process(&self, work: Work) -> Processed {
        let Work {
            file,
            change,
            known_hash,
        } = work;

        let bytes = match read_file_bytes(&file.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Processed::Unreadable {
                    reason: format!("{}: {}", file.path.display(), e),
                    file,
                }
            }
        };

        let content_hash = hash_bytes(&bytes);
        if change != FileChange::New && known_hash.as_deref() == Some(content_hash.as_str()) {
            return Processed::SameContent { file, change };
        }

        let decoded = self.engine.fingerprint(&file.path, &bytes);
        let image = decoded.as_ref().ok().map(|(image, _)| image);
        let metadata = self.extractor.extract(&file, &bytes, image);

        let faces = match image {
            Some(image) => self.detector.detect(&file.path, image).unwrap_or_else(|e| {
                tracing::warn!(path = %file.path.display(), error = %e, "face detection failed");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut photo =
            NewPhoto::bare(file.path.clone(), file.size, file.mtime_ns(), &content_hash);
        photo.width = metadata.width;
        photo.height = metadata.height;
        photo.date_taken = Some(metadata.date_taken);
        photo.date_source = Some(metadata.date_source);
        photo.location = metadata.location;
        photo.is_document = metadata.is_document;

        let flagged = match &decoded {
            Ok((_, hash)) => {
                photo.perceptual_hash = Some(*hash);
                None
            }
            Err(e) => {
                photo.review_note = Some(format!("review: {e}"));
                Some(e.to_string())
            }
        };

        Processed::Indexed {
            change,
            photo,
            faces,
            flagged,
        }
    }

    /// Writer stage: fold one message into the ledger, committing full batches
    fn handle(
        &self,
        message: Message,
        ledger: &mut Ledger,
        store: &IndexStore,
        known_hashes: &HashSet<String>,
        events: &EventSender,
    ) -> Result<(), StoreError> {
        match message {
            Message::Found => {
                ledger.found += 1;
                return Ok(());
            }
            Message::Unchanged => {
                ledger.summary.unchanged += 1;
                ledger.progress.unchanged += 1;
            }
            Message::Skipped(skip) => {
                ledger.summary.errors.push(skip.to_string());
                ledger.progress.errored += 1;
                return Ok(());
            }
            Message::Processed(Processed::Unreadable { file, reason }) => {
                tracing::warn!(path = %file.path.display(), %reason, "unreadable file");
                events.send(Event::Scan(ScanEvent::Skipped {
                    path: file.path,
                    reason: reason.clone(),
                }));
                ledger.summary.errors.push(reason);
                ledger.progress.errored += 1;
            }
            Message::Processed(Processed::SameContent { file, change }) => {
                let id = match change {
                    FileChange::Modified { id } | FileChange::Reappeared { id } => id,
                    _ => return Ok(()),
                };
                if let FileChange::Reappeared { .. } = change {
                    ledger.batch.push(Pending {
                        change: PhotoChange::Reappear { id },
                        faces: Vec::new(),
                    });
                }
                ledger.batch.push(Pending {
                    change: PhotoChange::Touch {
                        id,
                        size: file.size,
                        mtime_ns: file.mtime_ns(),
                    },
                    faces: Vec::new(),
                });
                ledger.summary.modified += 1;
            }
            Message::Processed(Processed::Indexed {
                change,
                photo,
                faces,
                flagged,
            }) => {
                if let Some(reason) = flagged {
                    tracing::warn!(path = %photo.path.display(), %reason, "flagged for review");
                    events.send(Event::Index(IndexEvent::Flagged {
                        path: photo.path.clone(),
                        reason: reason.clone(),
                    }));
                    ledger
                        .summary
                        .errors
                        .push(format!("{}: {}", photo.path.display(), reason));
                    ledger.progress.errored += 1;
                }

                match change {
                    FileChange::New if known_hashes.contains(&photo.content_hash) => {
                        ledger.held_back.push((photo, faces));
                    }
                    FileChange::New => {
                        ledger.summary.added += 1;
                        ledger.batch.push(Pending {
                            change: PhotoChange::Upsert(photo),
                            faces,
                        });
                    }
                    _ => {
                        ledger.summary.modified += 1;
                        ledger.batch.push(Pending {
                            change: PhotoChange::Upsert(photo),
                            faces,
                        });
                    }
                }
            }
        }

        ledger.progress.processed += 1;
        ledger.progress.remaining = ledger.found.saturating_sub(ledger.progress.processed);
        if ledger.progress.processed % PROGRESS_EVERY == 0 {
            events.send(Event::Index(IndexEvent::Progress(ledger.progress.clone())));
        }
        if ledger.batch.len() >= self.config.hashing.batch_size {
            self.flush(ledger, store, events)?;
        }
        Ok(())
    }

    /// Commit the pending batch in one transaction
    fn flush(
        &self,
        ledger: &mut Ledger,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<(), StoreError> {
        if ledger.batch.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(&mut ledger.batch);
        self.commit(batch, ledger, store, events)
    }

    fn commit(
        &self,
        batch: Vec<Pending>,
        ledger: &mut Ledger,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<(), StoreError> {
        let changes: Vec<PhotoChange> = batch.iter().map(|p| p.change.clone()).collect();
        let ids = store.apply(&changes)?;

        for (id, pending) in ids.into_iter().zip(batch) {
            if !pending.faces.is_empty() {
                ledger.faces.push((id, pending.faces));
            }
        }
        tracing::debug!(records = changes.len(), "committed batch");
        events.send(Event::Index(IndexEvent::Committed {
            records: changes.len(),
        }));
        events.send(Event::Index(IndexEvent::Progress(ledger.progress.clone())));
        Ok(())
    }

    /// Match vanished records to held-back new paths, insert the rest and
    /// flag unexplained disappearances as missing. One transaction.
    fn reconcile(
        &self,
        diff: &RescanDiff,
        ledger: &mut Ledger,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<(), StoreError> {
        // Unseen but still on disk means filtered out, not gone. Records
        // under a skipped entry never reach this list.
        let vanished: Vec<_> = diff
            .unseen()
            .into_iter()
            .filter(|k| !k.path.exists())
            .collect();

        let candidates: Vec<(PathBuf, String)> = ledger
            .held_back
            .iter()
            .map(|(photo, _)| (photo.path.clone(), photo.content_hash.clone()))
            .collect();
        let moves = reconcile_moves(&vanished, &candidates);

        let mut batch = Vec::new();
        for (photo, faces) in std::mem::take(&mut ledger.held_back) {
            if let Some(movement) = moves.iter().find(|m| m.to == photo.path) {
                batch.push(Pending {
                    change: PhotoChange::Move {
                        id: movement.id,
                        to: photo.path.clone(),
                        size: photo.size,
                        mtime_ns: photo.mtime_ns,
                    },
                    faces: Vec::new(),
                });
            } else {
                ledger.summary.added += 1;
                batch.push(Pending {
                    change: PhotoChange::Upsert(photo),
                    faces,
                });
            }
        }

        let moved_ids: HashSet<i64> = moves.iter().map(|m| m.id).collect();
        for record in vanished
            .iter()
            .filter(|k| !k.missing && !moved_ids.contains(&k.id))
        {
            tracing::info!(path = %record.path.display(), "file missing");
            batch.push(Pending {
                change: PhotoChange::MarkMissing { id: record.id },
                faces: Vec::new(),
            });
            ledger.summary.missing += 1;
        }

        for movement in &moves {
            tracing::info!(
                from = %movement.from.display(),
                to = %movement.to.display(),
                "file moved"
            );
            events.send(Event::Index(IndexEvent::Moved {
                from: movement.from.clone(),
                to: movement.to.clone(),
            }));
        }
        ledger.summary.moved += moves.len();

        if batch.is_empty() {
            return Ok(());
        }
        self.commit(batch, ledger, store, events)
    }

    /// Cluster faces found on committed photos
    fn assign_faces(
        &self,
        ledger: &mut Ledger,
        store: &IndexStore,
        events: &EventSender,
    ) -> Result<usize, StoreError> {
        let mut assigned = 0;
        for (photo_id, embeddings) in std::mem::take(&mut ledger.faces) {
            match self
                .clusterer
                .assign_incremental(store, photo_id, &embeddings, events)
            {
                Ok(assignments) => assigned += assignments.len(),
                Err(ArchiveError::Store(e)) => return Err(e),
                Err(e) => {
                    tracing::warn!(photo_id, error = %e, "faces not clustered");
                    ledger.summary.errors.push(e.to_string());
                }
            }
        }
        Ok(assigned)
    }
}
