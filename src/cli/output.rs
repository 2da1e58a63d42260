//! Rendering of command results: pretty, JSON or minimal.

use super::OutputFormat;
use console::{style, Term};
use photo_archive::core::backup::BackupReport;
use photo_archive::core::grouper::{DuplicateGroup, GroupKind};
use photo_archive::core::history::{RunRecord, RunStatus};
use photo_archive::core::pipeline::PipelineResult;
use photo_archive::core::query::FaceCluster;
use photo_archive::core::store::PhotoRecord;
use photo_archive::error::{ArchiveError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

pub fn print_header(term: &Term) {
    term.write_line(&format!(
        "{} {}",
        style("Photo Archive").bold().cyan(),
        style(concat!("v", env!("CARGO_PKG_VERSION"))).dim()
    ))
    .ok();
    term.write_line("").ok();
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ArchiveError::Config(format!("cannot render JSON: {e}")))?;
    println!("{json}");
    Ok(())
}

/// Shorten paths under the home directory to `~/...`
pub fn display_path(path: &Path) -> String {
    match dirs::home_dir().and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf)) {
        Some(relative) => format!("~/{}", relative.display()),
        None => path.display().to_string(),
    }
}

pub fn print_scan(term: &Term, format: OutputFormat, result: &PipelineResult) -> Result<()> {
    let summary = &result.summary;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "summary": summary,
            "faces_assigned": result.faces_assigned,
            "near_duplicate_groups": result.grouping.map(|g| g.groups),
        })),
        OutputFormat::Minimal => {
            for error in &summary.errors {
                println!("{error}");
            }
            Ok(())
        }
        OutputFormat::Pretty => {
            let heading = if summary.cancelled {
                format!("{} Scan cancelled", style("!").yellow().bold())
            } else {
                format!("{} Scan complete", style("✓").green().bold())
            };
            term.write_line(&heading).ok();
            term.write_line("").ok();
            term.write_line(&format!(
                "  {} files seen in {:.1}s",
                style(summary.total).cyan(),
                summary.duration_ms as f64 / 1000.0
            ))
            .ok();

            for (count, label) in [
                (summary.added, "added"),
                (summary.modified, "modified"),
                (summary.moved, "moved"),
                (summary.missing, "missing"),
                (summary.unchanged, "unchanged"),
            ] {
                if count > 0 {
                    term.write_line(&format!("  {} {}", style(count).cyan(), label)).ok();
                }
            }
            if result.faces_assigned > 0 {
                term.write_line(&format!(
                    "  {} faces clustered",
                    style(result.faces_assigned).cyan()
                ))
                .ok();
            }
            if let Some(grouping) = result.grouping {
                term.write_line(&format!(
                    "  {} near-duplicate groups ({} photos)",
                    style(grouping.groups).cyan(),
                    grouping.grouped_photos
                ))
                .ok();
            }

            if !summary.errors.is_empty() {
                term.write_line("").ok();
                term.write_line(&format!(
                    "{} ({})",
                    style("Needs review:").bold().yellow(),
                    summary.errors.len()
                ))
                .ok();
                for error in &summary.errors {
                    term.write_line(&format!("  {} {}", style("○").dim(), error)).ok();
                }
            }
            Ok(())
        }
    }
}

pub fn print_groups(
    term: &Term,
    format: OutputFormat,
    threshold: u32,
    groups: &[DuplicateGroup],
    records: &[PhotoRecord],
) -> Result<()> {
    let by_id: HashMap<i64, &PhotoRecord> = records.iter().map(|r| (r.id, r)).collect();
    let path_of = |id: i64| by_id.get(&id).map(|r| r.path.as_path());

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "threshold": threshold,
            "groups": groups.iter().map(|g| serde_json::json!({
                "kind": g.kind,
                "label": g.label,
                "representative": g.representative,
                "content_hash": g.content_hash,
                "photos": g.members.iter().map(|id| serde_json::json!({
                    "id": id,
                    "path": path_of(*id),
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })),
        OutputFormat::Minimal => {
            // Everything except the representatives: candidates for the trash
            for group in groups {
                for id in group.members.iter().filter(|id| **id != group.representative) {
                    if let Some(path) = path_of(*id) {
                        println!("{}", path.display());
                    }
                }
            }
            Ok(())
        }
        OutputFormat::Pretty => {
            if groups.is_empty() {
                term.write_line(&format!("  {} No duplicates found!", style("✓").green()))
                    .ok();
                return Ok(());
            }

            term.write_line(&format!(
                "{}",
                style("Duplicate Groups:").bold().underlined()
            ))
            .ok();
            term.write_line("").ok();

            for (i, group) in groups.iter().enumerate() {
                let kind = match group.kind {
                    GroupKind::Exact => style("identical".to_string()).yellow(),
                    GroupKind::Near => style(format!("similar (≤{threshold} bits)")).yellow(),
                };
                let wasted: u64 = group
                    .members
                    .iter()
                    .filter(|id| **id != group.representative)
                    .filter_map(|id| by_id.get(id).map(|r| r.size))
                    .sum();
                term.write_line(&format!(
                    "  {} {} ({} photos, {} reclaimable)",
                    style(format!("Group {}:", i + 1)).bold(),
                    kind,
                    group.members.len(),
                    format_bytes(wasted)
                ))
                .ok();

                for id in &group.members {
                    let marker = if *id == group.representative {
                        style("★").green().to_string()
                    } else {
                        style("○").dim().to_string()
                    };
                    let shown = path_of(*id).map(display_path).unwrap_or_default();
                    term.write_line(&format!("    {} #{:<6} {}", marker, id, shown)).ok();
                }
                term.write_line("").ok();
            }

            term.write_line(&format!(
                "{}",
                style("No files were touched. Use `trash move <id>` to remove a copy.").dim()
            ))
            .ok();
            Ok(())
        }
    }
}

pub fn print_photos(term: &Term, format: OutputFormat, photos: &[PhotoRecord]) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&photos),
        OutputFormat::Minimal => {
            for photo in photos {
                println!("{}", photo.path.display());
            }
            Ok(())
        }
        OutputFormat::Pretty => {
            for photo in photos {
                let taken = photo
                    .date_taken
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "----------".to_string());
                let mut flags = Vec::new();
                if photo.missing {
                    flags.push(style("missing").red().to_string());
                }
                if photo.review_note.is_some() {
                    flags.push(style("review").yellow().to_string());
                }
                if photo.is_document {
                    flags.push(style("document").dim().to_string());
                }
                term.write_line(&format!(
                    "  #{:<6} {} {:>9} {:<10} {} {}",
                    photo.id,
                    taken,
                    format_bytes(photo.size),
                    photo.backup_status.to_string(),
                    display_path(&photo.path),
                    flags.join(" ")
                ))
                .ok();
            }
            term.write_line(&format!("{}", style(format!("{} photos", photos.len())).dim()))
                .ok();
            Ok(())
        }
    }
}

pub fn print_faces(term: &Term, format: OutputFormat, clusters: &[FaceCluster]) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&clusters),
        OutputFormat::Minimal | OutputFormat::Pretty => {
            for cluster in clusters {
                let name = cluster
                    .face
                    .person_label
                    .clone()
                    .unwrap_or_else(|| "unnamed".to_string());
                term.write_line(&format!(
                    "  {} {} ({} faces on {} photos)",
                    style(format!("#{}", cluster.face.id)).bold(),
                    style(name).cyan(),
                    cluster.face.member_count,
                    cluster.photo_ids.len()
                ))
                .ok();
            }
            Ok(())
        }
    }
}

pub fn print_backup(term: &Term, format: OutputFormat, report: &BackupReport) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "queued": report.queued,
            "backed_up": report.backed_up,
            "deduplicated": report.deduplicated,
            "failed": report.failed,
            "errors": report.errors,
            "cancelled": report.cancelled,
            "duration_ms": report.duration_ms,
        })),
        OutputFormat::Minimal => {
            for error in &report.errors {
                println!("{error}");
            }
            Ok(())
        }
        OutputFormat::Pretty => {
            let mark = if report.cancelled {
                style("!").yellow().bold()
            } else {
                style("✓").green().bold()
            };
            term.write_line(&format!(
                "{} {} of {} backed up ({} already present), {} failed",
                mark,
                style(report.backed_up).cyan(),
                report.queued,
                report.deduplicated,
                style(report.failed).red()
            ))
            .ok();
            for error in &report.errors {
                term.write_line(&format!("  {} {}", style("○").dim(), error)).ok();
            }
            if report.cancelled {
                term.write_line(&format!(
                    "{}",
                    style("Backup stopped early; the next pass picks up the rest.").dim()
                ))
                .ok();
            }
            if report.failed > 0 {
                term.write_line(&format!(
                    "{}",
                    style("Failed photos are retried on the next backup pass.").dim()
                ))
                .ok();
            }
            Ok(())
        }
    }
}

pub fn print_history(term: &Term, format: OutputFormat, runs: &[RunRecord]) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&runs),
        OutputFormat::Minimal | OutputFormat::Pretty => {
            for run in runs {
                let status = match run.status {
                    RunStatus::Completed => style(run.status.as_str()).green(),
                    RunStatus::Cancelled => style(run.status.as_str()).yellow(),
                };
                term.write_line(&format!(
                    "  {} {:<6} {:<9} {} seen, {} written, {} errors  {}",
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.kind.display_name(),
                    status,
                    run.summary.total,
                    run.summary.writes(),
                    run.summary.errors.len(),
                    style(&run.id[..8.min(run.id.len())]).dim()
                ))
                .ok();
            }
            Ok(())
        }
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
