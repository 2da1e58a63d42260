//! # CLI Module
//!
//! Command-line interface for the photo archive.
//!
//! ## Usage
//! ```bash
//! # Index (or rescan) one or more photo trees
//! photo-archive scan ~/Photos /mnt/camera
//!
//! # Show duplicate groups at a stricter threshold, as JSON
//! photo-archive duplicates --threshold 4 --output json
//!
//! # Back up everything not yet backed up
//! photo-archive backup --destination /mnt/backup
//!
//! # Reversible removal
//! photo-archive trash move 42
//! photo-archive trash restore 42
//! ```

mod output;

use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use photo_archive::config::{AppPaths, ArchiveConfig};
use photo_archive::core::backup::{BackupTracker, LocalFolderSink};
use photo_archive::core::faces::FaceClusterer;
use photo_archive::core::history::{HistoryRepository, RunKind};
use photo_archive::core::pipeline::{CancellationToken, Pipeline};
use photo_archive::core::query::ArchiveQuery;
use photo_archive::core::store::{BackupStatus, IndexStore, PhotoFilter, SortField};
use photo_archive::core::trash::Trash;
use photo_archive::error::{ArchiveError, Result};
use photo_archive::events::{
    null_sender, BackupEvent, Event, EventChannel, EventReceiver, IndexEvent, PipelineEvent,
};
use std::path::PathBuf;
use std::thread;

/// Photo Archive - index, deduplicate and back up a photo library
#[derive(Parser, Debug)]
#[command(name = "photo-archive")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Application data directory (index, trash)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (defaults to config.json in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index directories; rescans only touch what changed
    Scan {
        /// Directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Include hidden files
        #[arg(long)]
        include_hidden: bool,

        /// Hashing workers (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,

        /// Skip updating duplicate groups
        #[arg(long)]
        no_group: bool,
    },

    /// Show exact and near-duplicate groups
    Duplicates {
        /// Near-duplicate threshold in bits (lower = stricter, 0-64)
        #[arg(short, long)]
        threshold: Option<u32>,
    },

    /// List indexed photos
    List(ListArgs),

    /// Face clusters
    Faces {
        #[command(subcommand)]
        command: FaceCommands,
    },

    /// Copy photos that are not backed up yet to the backup destination
    Backup {
        /// Destination folder (overrides backup.destination)
        #[arg(short, long)]
        destination: Option<PathBuf>,

        /// Only show what would be backed up
        #[arg(long)]
        dry_run: bool,
    },

    /// Reversible removal of photos
    Trash {
        #[command(subcommand)]
        command: TrashCommands,
    },

    /// Show past scan and backup passes
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Sort key
    #[arg(short, long, default_value = "path")]
    sort: SortBy,

    /// Sort descending
    #[arg(long)]
    desc: bool,

    /// Only photos with this backup status
    #[arg(long)]
    backup: Option<BackupFilter>,

    /// Only photos classified as documents
    #[arg(long)]
    documents: bool,

    /// Include photos flagged missing
    #[arg(long)]
    missing: bool,

    /// Only photos under this directory
    #[arg(long)]
    under: Option<PathBuf>,

    /// Maximum number of photos
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum FaceCommands {
    /// List clusters with their photos
    List,
    /// Merge clusters whose centroids drifted together
    Recluster,
    /// Name a cluster (omit the name to clear it)
    Label {
        /// Cluster id
        id: i64,
        /// Person name
        name: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TrashCommands {
    /// Move photos into the trash
    Move {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Move trashed photos back to where they were
    Restore {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// List trashed photos
    List,
    /// Permanently delete everything in the trash
    Purge {
        /// Confirm permanent deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// JSON output for scripting
    Json,
    /// Minimal output (paths only)
    Minimal,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortBy {
    Path,
    Date,
    Size,
    Modified,
}

impl From<SortBy> for SortField {
    fn from(sort: SortBy) -> Self {
        match sort {
            SortBy::Path => SortField::Path,
            SortBy::Date => SortField::DateTaken,
            SortBy::Size => SortField::Size,
            SortBy::Modified => SortField::Modified,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackupFilter {
    NotBacked,
    BackedUp,
    Failed,
}

impl From<BackupFilter> for BackupStatus {
    fn from(filter: BackupFilter) -> Self {
        match filter {
            BackupFilter::NotBacked => BackupStatus::NotBacked,
            BackupFilter::BackedUp => BackupStatus::BackedUp,
            BackupFilter::Failed => BackupStatus::Failed,
        }
    }
}

/// Everything a command needs: layout, settings and the open store
struct Context {
    paths: AppPaths,
    config: ArchiveConfig,
    store: IndexStore,
    output: OutputFormat,
    term: Term,
    /// Cancelled by Ctrl-C
    cancel: CancellationToken,
}

impl Context {
    fn open(cli: &Cli) -> Result<Self> {
        let paths = match &cli.data_dir {
            Some(dir) => AppPaths::new(dir),
            None => AppPaths::default_location(),
        };
        paths.ensure()?;

        let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());
        let config = ArchiveConfig::load(&config_path)?;
        let store = IndexStore::open(&paths.store)?;
        tracing::debug!(data_dir = %paths.data_dir.display(), "archive opened");

        Ok(Self {
            paths,
            config,
            store,
            output: cli.output,
            term: Term::stderr(),
            cancel: interrupt_token(),
        })
    }

    fn pretty(&self) -> bool {
        matches!(self.output, OutputFormat::Pretty)
    }
}

/// Token cancelled by the first Ctrl-C; a second one exits at once
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if on_interrupt.is_cancelled() {
            std::process::exit(130);
        }
        Term::stderr()
            .write_line(&format!(
                "{} Stopping after the work in hand (Ctrl-C again to abort)",
                style("!").yellow().bold()
            ))
            .ok();
        on_interrupt.cancel();
    });
    if let Err(error) = installed {
        tracing::warn!(%error, "Ctrl-C handler not installed");
    }
    cancel
}

/// Run the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut ctx = Context::open(&cli)?;

    match cli.command {
        Commands::Scan {
            paths,
            include_hidden,
            workers,
            no_group,
        } => {
            if include_hidden {
                ctx.config.scan.include_hidden = true;
            }
            if let Some(workers) = workers {
                ctx.config.hashing.workers = workers;
            }
            run_scan(&ctx, paths, !no_group)
        }
        Commands::Duplicates { threshold } => {
            let threshold = threshold.unwrap_or(ctx.config.grouping.threshold);
            if threshold > 64 {
                return Err(ArchiveError::Config(format!(
                    "threshold {threshold} exceeds the 64-bit hash width"
                )));
            }
            run_duplicates(&ctx, threshold)
        }
        Commands::List(args) => run_list(&ctx, args),
        Commands::Faces { command } => run_faces(&ctx, command),
        Commands::Backup {
            destination,
            dry_run,
        } => run_backup(&ctx, destination, dry_run),
        Commands::Trash { command } => run_trash(&ctx, command),
        Commands::History { limit } => {
            let runs = HistoryRepository::new(&ctx.store).list(limit)?;
            output::print_history(&ctx.term, ctx.output, &runs)
        }
        Commands::Config => output::print_json(&ctx.config),
    }
}

fn progress_bar(template: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        pb.set_style(style.progress_chars("█▓░"));
    }
    pb
}

/// Drive a progress bar from pipeline events until the sender is dropped
fn follow_index_events(
    receiver: EventReceiver,
    pb: Option<ProgressBar>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in receiver.iter() {
            let Some(pb) = &pb else { continue };
            match event {
                Event::Pipeline(PipelineEvent::PhaseChanged { phase }) => {
                    pb.set_message(format!("{}", phase));
                }
                Event::Index(IndexEvent::Progress(p)) => {
                    pb.set_length((p.processed + p.remaining) as u64);
                    pb.set_position(p.processed as u64);
                }
                Event::Index(IndexEvent::Flagged { path, .. }) => {
                    pb.println(format!(
                        "  {} {}",
                        style("flagged").yellow(),
                        path.display()
                    ));
                }
                Event::Pipeline(PipelineEvent::Completed { .. }) => {
                    pb.finish_and_clear();
                }
                _ => {}
            }
        }
    })
}

fn run_scan(ctx: &Context, roots: Vec<PathBuf>, group: bool) -> Result<()> {
    if ctx.pretty() {
        output::print_header(&ctx.term);
    }

    let roots: Vec<PathBuf> = roots
        .into_iter()
        .map(|root| std::fs::canonicalize(&root).unwrap_or(root))
        .collect();

    let pipeline = Pipeline::builder()
        .roots(roots.clone())
        .config(ctx.config.clone())
        .exclude(ctx.paths.data_dir.clone())
        .group_after(group)
        .cancellation(ctx.cancel.clone())
        .build();

    let (sender, receiver) = EventChannel::new();
    let pb = ctx
        .pretty()
        .then(|| progress_bar("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}"));
    let event_thread = follow_index_events(receiver, pb);

    let started_at = Utc::now();
    let result = pipeline.run_with_events(&ctx.store, &sender);

    // Drop sender to signal event thread to finish
    drop(sender);
    event_thread.join().ok();
    let result = result?;

    HistoryRepository::new(&ctx.store).record(
        RunKind::Scan,
        started_at,
        &roots,
        &result.summary,
    )?;
    output::print_scan(&ctx.term, ctx.output, &result)
}

fn run_duplicates(ctx: &Context, threshold: u32) -> Result<()> {
    let query = ArchiveQuery::new(&ctx.store);
    let groups = query.get_duplicate_groups(threshold)?;
    let ids: Vec<i64> = groups.iter().flat_map(|g| g.members.iter().copied()).collect();
    let records = ctx.store.get_many(&ids)?;
    output::print_groups(&ctx.term, ctx.output, threshold, &groups, &records)
}

fn run_list(ctx: &Context, args: ListArgs) -> Result<()> {
    let filter = PhotoFilter {
        sort: args.sort.into(),
        descending: args.desc,
        include_missing: args.missing,
        backup_status: args.backup.map(Into::into),
        documents_only: args.documents,
        under: args.under,
        limit: args.limit,
        ..Default::default()
    };
    let photos = ArchiveQuery::new(&ctx.store).list_photos(&filter)?;
    output::print_photos(&ctx.term, ctx.output, &photos)
}

fn run_faces(ctx: &Context, command: FaceCommands) -> Result<()> {
    match command {
        FaceCommands::List => {
            let clusters = ArchiveQuery::new(&ctx.store).get_face_clusters()?;
            output::print_faces(&ctx.term, ctx.output, &clusters)
        }
        FaceCommands::Recluster => {
            let clusterer = FaceClusterer::from_settings(&ctx.config.faces);
            let outcome = clusterer.recluster_full(&ctx.store, &null_sender())?;
            if ctx.pretty() {
                ctx.term
                    .write_line(&format!(
                        "{} {} clusters merged, {} remain",
                        style("✓").green().bold(),
                        style(outcome.merges.len()).cyan(),
                        style(outcome.clusters).cyan()
                    ))
                    .ok();
            } else {
                output::print_json(&serde_json::json!({
                    "clusters": outcome.clusters,
                    "merges": outcome.merges,
                }))?;
            }
            Ok(())
        }
        FaceCommands::Label { id, name } => {
            ctx.store.set_person_label(id, name.as_deref())?;
            tracing::info!(face_id = id, label = ?name, "face cluster labelled");
            Ok(())
        }
    }
}

fn run_backup(ctx: &Context, destination: Option<PathBuf>, dry_run: bool) -> Result<()> {
    if dry_run {
        let queue = ArchiveQuery::new(&ctx.store).get_backup_queue()?;
        return output::print_photos(&ctx.term, ctx.output, &queue);
    }

    let destination = destination
        .or_else(|| ctx.config.backup.destination.clone())
        .ok_or_else(|| {
            ArchiveError::Config(
                "no backup destination: pass --destination or set backup.destination".to_string(),
            )
        })?;
    let sink = LocalFolderSink::new(&destination);
    let tracker = BackupTracker::new(&ctx.store, &sink);

    let (sender, receiver) = EventChannel::new();
    let pb = ctx
        .pretty()
        .then(|| progress_bar("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} backed up"));
    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            let Some(pb) = &pb else { continue };
            match event {
                Event::Backup(BackupEvent::Started { queued }) => pb.set_length(queued as u64),
                Event::Backup(BackupEvent::BackedUp { .. })
                | Event::Backup(BackupEvent::Failed { .. }) => pb.inc(1),
                Event::Backup(BackupEvent::Completed { .. }) => pb.finish_and_clear(),
                _ => {}
            }
        }
    });

    let started_at = Utc::now();
    let report = tracker.run_pass(&ctx.cancel, &sender);
    drop(sender);
    event_thread.join().ok();
    let report = report?;

    let summary = report.to_summary();
    HistoryRepository::new(&ctx.store).record(
        RunKind::Backup,
        started_at,
        &[destination],
        &summary,
    )?;
    output::print_backup(&ctx.term, ctx.output, &report)
}

fn run_trash(ctx: &Context, command: TrashCommands) -> Result<()> {
    let trash = Trash::new(&ctx.store, &ctx.paths.trash);
    let events = null_sender();

    match command {
        TrashCommands::Move { ids } => {
            for id in ids {
                let to = trash.move_to_trash(id, &events)?;
                report_line(ctx, "trashed", id, &to);
            }
            Ok(())
        }
        TrashCommands::Restore { ids } => {
            for id in ids {
                let path = trash.restore(id, &events)?;
                report_line(ctx, "restored", id, &path);
            }
            Ok(())
        }
        TrashCommands::List => output::print_photos(&ctx.term, ctx.output, &trash.list()?),
        TrashCommands::Purge { yes } => {
            if !yes {
                let pending = trash.list()?.len();
                ctx.term
                    .write_line(&format!(
                        "{} photos in the trash. Re-run with --yes to delete them permanently.",
                        style(pending).cyan()
                    ))
                    .ok();
                return Ok(());
            }
            let report = trash.purge(&events)?;
            ctx.term
                .write_line(&format!(
                    "{} {} photos purged",
                    style("✓").green().bold(),
                    report.purged
                ))
                .ok();
            for error in &report.errors {
                ctx.term
                    .write_line(&format!("  {} {}", style("✗").red(), error))
                    .ok();
            }
            Ok(())
        }
    }
}

fn report_line(ctx: &Context, verb: &str, id: i64, path: &std::path::Path) {
    if ctx.pretty() {
        ctx.term
            .write_line(&format!(
                "{} {} #{} → {}",
                style("✓").green().bold(),
                verb,
                id,
                output::display_path(path)
            ))
            .ok();
    } else {
        println!("{}", path.display());
    }
}
