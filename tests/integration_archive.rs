//! Integration tests for what happens to indexed photos after a scan:
//! backup passes, the trash, face clusters and pass history.

use assert_fs::prelude::*;
use assert_fs::TempDir;
use image::{DynamicImage, ImageBuffer, Rgb};
use photo_archive::config::AppPaths;
use photo_archive::core::backup::{BackupSink, BackupTracker, CopyOutcome, LocalFolderSink};
use photo_archive::core::faces::{FaceClusterer, FaceDetector};
use photo_archive::core::history::{HistoryRepository, RunKind, RunStatus};
use photo_archive::core::pipeline::{CancellationToken, Pipeline, PipelineResult};
use photo_archive::core::query::ArchiveQuery;
use photo_archive::core::store::{BackupStatus, IndexStore, PhotoFilter};
use photo_archive::core::trash::Trash;
use photo_archive::error::{ArchiveError, BackupError, FaceError, TrashError};
use photo_archive::events::null_sender;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn write_gradient(path: &Path, width: u32, rising: bool) {
    let img = ImageBuffer::from_fn(width, 32, |x, _| {
        let v = (x * 255 / (width - 1)) as u8;
        let v = if rising { v } else { 255 - v };
        Rgb([v, v, v])
    });
    img.save(path).unwrap();
}

struct Archive {
    data: TempDir,
    paths: AppPaths,
    store: IndexStore,
}

impl Archive {
    fn new() -> Self {
        let data = TempDir::new().unwrap();
        let paths = AppPaths::new(data.path());
        paths.ensure().unwrap();
        let store = IndexStore::open(&paths.store).unwrap();
        Self { data, paths, store }
    }

    fn scan(&self, root: &Path) -> PipelineResult {
        Pipeline::builder()
            .roots(vec![root.to_path_buf()])
            .build()
            .run(&self.store)
            .unwrap()
    }

    fn id_of(&self, path: &Path) -> i64 {
        self.store.get_by_path(path).unwrap().unwrap().id
    }
}

/// Fails every copy after the first `limit`, the way a killed process would
struct InterruptedSink {
    inner: LocalFolderSink,
    limit: usize,
    copies: AtomicUsize,
}

impl BackupSink for InterruptedSink {
    fn check_available(&self) -> Result<(), BackupError> {
        self.inner.check_available()
    }

    fn store(&self, source: &Path, content_hash: &str) -> Result<CopyOutcome, BackupError> {
        if self.copies.fetch_add(1, Ordering::SeqCst) >= self.limit {
            return Err(BackupError::Cancelled);
        }
        self.inner.store(source, content_hash)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[test]
fn backup_pass_after_scan_and_edit() {
    let photos = TempDir::new().unwrap();
    write_gradient(photos.child("a.png").path(), 64, true);
    write_gradient(photos.child("b.png").path(), 64, false);
    fs::copy(photos.child("a.png").path(), photos.child("a-copy.png").path()).unwrap();
    let archive = Archive::new();
    archive.scan(photos.path());

    let destination = archive.data.child("backup");
    let sink = LocalFolderSink::new(destination.path());
    let tracker = BackupTracker::new(&archive.store, &sink);
    let report = tracker.run_pass(&CancellationToken::new(), &null_sender()).unwrap();

    assert_eq!(report.backed_up, 3);
    assert_eq!(report.deduplicated, 1);
    assert!(tracker.queue().unwrap().is_empty());
    let a = archive.store.get_by_path(photos.child("a.png").path()).unwrap().unwrap();
    assert!(predicate::path::is_file().eval(sink.location(&a.content_hash).as_path()));

    // Editing a backed-up photo puts it back in the queue
    write_gradient(photos.child("b.png").path(), 96, true);
    archive.scan(photos.path());
    let queue = tracker.queue().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].path, photos.child("b.png").path());
    assert_eq!(queue[0].backup_status, BackupStatus::NotBacked);

    let second = tracker.run_pass(&CancellationToken::new(), &null_sender()).unwrap();
    assert_eq!(second.backed_up, 1);
}

#[test]
fn interrupted_backup_resumes_where_it_stopped() {
    let photos = TempDir::new().unwrap();
    for i in 0..10u32 {
        write_gradient(photos.child(format!("{i:02}.png")).path(), 16 + i * 8, i % 2 == 0);
    }
    let archive = Archive::new();
    archive.scan(photos.path());
    let ids: Vec<i64> = (0..10)
        .map(|i| archive.id_of(photos.child(format!("{i:02}.png")).path()))
        .collect();
    let destination = archive.data.child("backup");

    let crashing = InterruptedSink {
        inner: LocalFolderSink::new(destination.path()),
        limit: 4,
        copies: AtomicUsize::new(0),
    };
    let first = BackupTracker::new(&archive.store, &crashing)
        .run_pass(&CancellationToken::new(), &null_sender())
        .unwrap();
    assert!(first.cancelled);

    let status = |id: i64| archive.store.get(id).unwrap().unwrap().backup_status;
    let mut ordered = ids.clone();
    ordered.sort();
    assert!(ordered[..4].iter().all(|id| status(*id) == BackupStatus::BackedUp));
    assert!(ordered[4..].iter().all(|id| status(*id) == BackupStatus::NotBacked));

    let resumed = InterruptedSink {
        inner: LocalFolderSink::new(destination.path()),
        limit: usize::MAX,
        copies: AtomicUsize::new(0),
    };
    let second = BackupTracker::new(&archive.store, &resumed)
        .run_pass(&CancellationToken::new(), &null_sender())
        .unwrap();

    assert_eq!(resumed.copies.load(Ordering::SeqCst), 6);
    assert_eq!(second.backed_up, 6);
    assert!(ids.iter().all(|id| status(*id) == BackupStatus::BackedUp));
}

/// Trips a cancellation token after `after` copies, like Ctrl-C mid-pass
struct StoppingSink {
    inner: LocalFolderSink,
    token: CancellationToken,
    after: usize,
    copies: AtomicUsize,
}

impl BackupSink for StoppingSink {
    fn check_available(&self) -> Result<(), BackupError> {
        self.inner.check_available()
    }

    fn store(&self, source: &Path, content_hash: &str) -> Result<CopyOutcome, BackupError> {
        let outcome = self.inner.store(source, content_hash)?;
        if self.copies.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.token.cancel();
        }
        Ok(outcome)
    }

    fn describe(&self) -> String {
        self.inner.describe()
    }
}

#[test]
fn cancelled_backup_is_recorded_and_resumed() {
    let photos = TempDir::new().unwrap();
    for i in 0..5u32 {
        write_gradient(photos.child(format!("{i}.png")).path(), 16 + i * 8, i % 2 == 0);
    }
    let archive = Archive::new();
    archive.scan(photos.path());
    let history = HistoryRepository::new(&archive.store);

    let token = CancellationToken::new();
    let stopping = StoppingSink {
        inner: LocalFolderSink::new(archive.data.child("backup").path()),
        token: token.clone(),
        after: 2,
        copies: AtomicUsize::new(0),
    };
    let first = BackupTracker::new(&archive.store, &stopping)
        .run_pass(&token, &null_sender())
        .unwrap();
    assert!(first.cancelled);
    assert_eq!(first.backed_up, 2);
    assert_eq!(first.failed, 0);

    let run = history
        .record(RunKind::Backup, chrono::Utc::now(), &[], &first.to_summary())
        .unwrap();
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(history.get(&run.id).unwrap().unwrap().status, RunStatus::Cancelled);

    let sink = LocalFolderSink::new(archive.data.child("backup").path());
    let tracker = BackupTracker::new(&archive.store, &sink);
    assert_eq!(tracker.queue().unwrap().len(), 3);
    let second = tracker.run_pass(&CancellationToken::new(), &null_sender()).unwrap();
    assert!(!second.cancelled);
    assert_eq!(second.backed_up, 3);
    assert!(tracker.queue().unwrap().is_empty());
}

#[test]
fn trash_survives_rescans_and_restores() {
    let photos = TempDir::new().unwrap();
    write_gradient(photos.child("a.png").path(), 64, true);
    write_gradient(photos.child("b.png").path(), 64, false);
    let archive = Archive::new();
    archive.scan(photos.path());
    let id = archive.id_of(photos.child("a.png").path());
    let trash = Trash::new(&archive.store, &archive.paths.trash);

    let trashed_to = trash.move_to_trash(id, &null_sender()).unwrap();
    photos.child("a.png").assert(predicate::path::missing());
    assert!(trashed_to.starts_with(&archive.paths.trash));

    // The trashed record is neither re-added nor flagged missing
    let rescan = archive.scan(photos.path());
    assert_eq!(rescan.summary.writes(), 0);
    assert_eq!(trash.list().unwrap().len(), 1);
    assert_eq!(archive.store.count().unwrap(), 1);

    trash.restore(id, &null_sender()).unwrap();
    photos.child("a.png").assert(predicate::path::is_file());
    assert_eq!(archive.id_of(photos.child("a.png").path()), id);
    assert!(trash.list().unwrap().is_empty());
}

#[test]
fn restore_never_overwrites_a_new_file() {
    let photos = TempDir::new().unwrap();
    write_gradient(photos.child("a.png").path(), 64, true);
    let archive = Archive::new();
    archive.scan(photos.path());
    let id = archive.id_of(photos.child("a.png").path());
    let trash = Trash::new(&archive.store, &archive.paths.trash);
    trash.move_to_trash(id, &null_sender()).unwrap();

    photos.child("a.png").write_str("something else").unwrap();
    let result = trash.restore(id, &null_sender());

    assert!(matches!(
        result,
        Err(ArchiveError::Trash(TrashError::RestoreConflict { .. }))
    ));
    photos.child("a.png").assert("something else");
}

#[test]
fn purge_empties_the_trash() {
    let photos = TempDir::new().unwrap();
    write_gradient(photos.child("a.png").path(), 64, true);
    write_gradient(photos.child("b.png").path(), 64, false);
    let archive = Archive::new();
    archive.scan(photos.path());
    let trash = Trash::new(&archive.store, &archive.paths.trash);
    for name in ["a.png", "b.png"] {
        let id = archive.id_of(photos.child(name).path());
        trash.move_to_trash(id, &null_sender()).unwrap();
    }

    assert_eq!(trash.purge(&null_sender()).unwrap().purged, 2);

    assert!(fs::read_dir(&archive.paths.trash).unwrap().next().is_none());
    let all = PhotoFilter {
        include_deleted: true,
        include_missing: true,
        ..Default::default()
    };
    assert!(archive.store.list(&all).unwrap().is_empty());
}

/// Reports one face whose embedding depends on the image brightness slope
struct SlopeFaces;

impl FaceDetector for SlopeFaces {
    fn detect(&self, _path: &Path, image: &DynamicImage) -> Result<Vec<Vec<f32>>, FaceError> {
        let gray = image.to_luma8();
        let left = gray.get_pixel(0, 0)[0] as f32;
        let right = gray.get_pixel(gray.width() - 1, 0)[0] as f32;
        Ok(vec![if left < right {
            vec![1.0, 0.1, 0.0]
        } else {
            vec![0.0, 0.1, 1.0]
        }])
    }

    fn name(&self) -> &'static str {
        "slope"
    }
}

#[test]
fn faces_cluster_across_scans_and_merge_on_recluster() {
    let photos = TempDir::new().unwrap();
    write_gradient(photos.child("a.png").path(), 64, true);
    write_gradient(photos.child("b.png").path(), 80, true);
    write_gradient(photos.child("c.png").path(), 64, false);
    let archive = Archive::new();

    let result = Pipeline::builder()
        .roots(vec![photos.path().to_path_buf()])
        .face_detector(Arc::new(SlopeFaces))
        .build()
        .run(&archive.store)
        .unwrap();
    assert_eq!(result.faces_assigned, 3);

    let clusters = ArchiveQuery::new(&archive.store).get_face_clusters().unwrap();
    assert_eq!(clusters.len(), 2);
    let sizes: Vec<usize> = clusters.iter().map(|c| c.photo_ids.len()).collect();
    assert!(sizes.contains(&2) && sizes.contains(&1));

    // Far-apart clusters stay apart
    let outcome = FaceClusterer::default()
        .recluster_full(&archive.store, &null_sender())
        .unwrap();
    assert!(outcome.merges.is_empty());
    assert_eq!(outcome.clusters, 2);
}

#[test]
fn scan_and_backup_runs_are_recorded() {
    let photos = TempDir::new().unwrap();
    write_gradient(photos.child("a.png").path(), 64, true);
    let archive = Archive::new();
    let history = HistoryRepository::new(&archive.store);

    let started = chrono::Utc::now();
    let scan = archive.scan(photos.path());
    history
        .record(RunKind::Scan, started, &[photos.path().to_path_buf()], &scan.summary)
        .unwrap();

    let sink = LocalFolderSink::new(archive.data.child("backup").path());
    let report = BackupTracker::new(&archive.store, &sink)
        .run_pass(&CancellationToken::new(), &null_sender())
        .unwrap();
    history
        .record(RunKind::Backup, chrono::Utc::now(), &[], &report.to_summary())
        .unwrap();

    let runs = history.list(10).unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].kind, RunKind::Backup);
    assert_eq!(runs[0].summary.added, 1);
    assert_eq!(runs[1].kind, RunKind::Scan);
    assert_eq!(runs[1].summary.added, 1);
    assert!(runs.iter().all(|r| r.status == RunStatus::Completed));
}
