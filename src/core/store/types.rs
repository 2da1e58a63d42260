//! Record types persisted by the index store.

use crate::core::hasher::PerceptualHash;
use crate::core::metadata::{DateSource, GeoLocation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Backup state of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    NotBacked,
    BackedUp,
    Failed,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::NotBacked => "not_backed",
            BackupStatus::BackedUp => "backed_up",
            BackupStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_backed" => Some(BackupStatus::NotBacked),
            "backed_up" => Some(BackupStatus::BackedUp),
            "failed" => Some(BackupStatus::Failed),
            _ => None,
        }
    }

    /// Permitted edges of the backup state machine.
    ///
    /// `BackedUp -> NotBacked` is only legal when the content hash changed;
    /// the store checks that side condition itself.
    pub fn can_transition_to(&self, next: BackupStatus) -> bool {
        matches!(
            (self, next),
            (BackupStatus::NotBacked, BackupStatus::BackedUp)
                | (BackupStatus::NotBacked, BackupStatus::Failed)
                | (BackupStatus::Failed, BackupStatus::BackedUp)
                | (BackupStatus::BackedUp, BackupStatus::NotBacked)
        )
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of face cluster references held by a photo.
///
/// Only the store constructs these from rows, after the references were
/// checked against the `faces` table on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceIdSet(BTreeSet<i64>);

impl FaceIdSet {
    pub fn contains(&self, id: i64) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.0.iter().copied()
    }

    /// Parse the comma-separated list produced by `group_concat`
    pub(crate) fn from_concat(text: Option<String>) -> Self {
        Self(
            text.unwrap_or_default()
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect(),
        )
    }
}

impl FromIterator<i64> for FaceIdSet {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One indexed file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: i64,
    pub path: PathBuf,
    /// Kind of media (always "image" today)
    pub file_type: String,
    pub size: u64,
    pub mtime_ns: i64,
    pub content_hash: String,
    /// None when the file could not be decoded
    pub perceptual_hash: Option<PerceptualHash>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub date_taken: Option<DateTime<Utc>>,
    pub date_source: Option<DateSource>,
    pub location: Option<GeoLocation>,
    pub is_document: bool,
    pub face_ids: FaceIdSet,
    /// Moved to the trash area
    pub deleted: bool,
    pub trash_path: Option<PathBuf>,
    /// Path vanished on a rescan and no move explained it
    pub missing: bool,
    pub backup_status: BackupStatus,
    pub backup_attempts: u32,
    pub backup_error: Option<String>,
    /// Set when decoding failed; the file is excluded from grouping
    pub review_note: Option<String>,
    /// Persisted near-duplicate label (lowest member id)
    pub dup_group: Option<i64>,
}

impl PhotoRecord {
    /// Pixel count, for the representative tie-break
    pub fn resolution(&self) -> u64 {
        self.width.unwrap_or(0) as u64 * self.height.unwrap_or(0) as u64
    }

    /// Whether the record takes part in listings, grouping and backup
    pub fn is_live(&self) -> bool {
        !self.deleted && !self.missing
    }
}

/// Facts derived for a path by one pipeline pass
#[derive(Debug, Clone, PartialEq)]
pub struct NewPhoto {
    pub path: PathBuf,
    pub size: u64,
    pub mtime_ns: i64,
    pub content_hash: String,
    pub perceptual_hash: Option<PerceptualHash>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub date_taken: Option<DateTime<Utc>>,
    pub date_source: Option<DateSource>,
    pub location: Option<GeoLocation>,
    pub is_document: bool,
    pub review_note: Option<String>,
}

impl NewPhoto {
    /// A record with only filesystem facts and a content hash
    pub fn bare(path: impl Into<PathBuf>, size: u64, mtime_ns: i64, content_hash: &str) -> Self {
        Self {
            path: path.into(),
            size,
            mtime_ns,
            content_hash: content_hash.to_string(),
            perceptual_hash: None,
            width: None,
            height: None,
            date_taken: None,
            date_source: None,
            location: None,
            is_document: false,
            review_note: None,
        }
    }

    pub fn with_perceptual_hash(mut self, hash: PerceptualHash) -> Self {
        self.perceptual_hash = Some(hash);
        self
    }
}

/// Result of [`IndexStore::upsert`](super::IndexStore::upsert)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: i64,
    pub inserted: bool,
    /// The stored content hash differs from the previous one
    pub content_changed: bool,
    /// Other live records with byte-identical content
    pub same_content: Vec<i64>,
}

/// One identity cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: i64,
    pub person_label: Option<String>,
    /// Cluster centroid
    pub embedding: Vec<f32>,
    /// Embeddings folded into the centroid
    pub member_count: u32,
}

/// One detected face on one photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub id: i64,
    pub photo_id: i64,
    pub face_id: i64,
    pub embedding: Vec<f32>,
}

/// Sort key for listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Path,
    DateTaken,
    Size,
    Modified,
}

impl SortField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            SortField::Path => "p.path",
            SortField::DateTaken => "p.date_taken_ms",
            SortField::Size => "p.size",
            SortField::Modified => "p.mtime_ns",
        }
    }
}

/// Filter for [`IndexStore::list`](super::IndexStore::list)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhotoFilter {
    pub sort: SortField,
    pub descending: bool,
    /// Include records in the trash
    pub include_deleted: bool,
    /// Include records flagged missing
    pub include_missing: bool,
    pub backup_status: Option<BackupStatus>,
    pub documents_only: bool,
    pub taken_after: Option<DateTime<Utc>>,
    pub taken_before: Option<DateTime<Utc>>,
    /// Only photos under this directory
    pub under: Option<PathBuf>,
    pub limit: Option<usize>,
}
