//! Photo record reads and writes.
//!
//! Free functions take a `&Connection` so callers can compose several of
//! them inside one [`IndexStore::write`] transaction. The `IndexStore`
//! methods at the bottom wrap the common single-operation cases.

use super::bands::{band_radius, use_band_lookup, values_within};
use super::types::{
    BackupStatus, FaceIdSet, NewPhoto, PhotoFilter, PhotoRecord, UpsertOutcome,
};
use super::{mark_groups_dirty, now_millis, IndexStore};
use crate::core::hasher::{PerceptualHash, BAND_COUNT};
use crate::core::metadata::{DateSource, GeoLocation};
use crate::core::scanner::KnownFile;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

/// Largest `IN (...)` list sent in one statement
const IN_CHUNK: usize = 500;

const PHOTO_COLUMNS: &str = "p.id, p.path, p.file_type, p.size, p.mtime_ns, p.content_hash,
    p.perceptual_hash, p.width, p.height, p.date_taken_ms, p.date_source, p.latitude,
    p.longitude, p.is_document, p.deleted, p.trash_path, p.missing, p.backup_status,
    p.backup_attempts, p.backup_error, p.review_note, p.dup_group,
    (SELECT group_concat(DISTINCT o.face_id) FROM face_observations o WHERE o.photo_id = p.id)";

/// Live means neither trashed nor missing
const LIVE: &str = "p.deleted = 0 AND p.missing = 0";

/// A change the scan pipeline commits for one path
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoChange {
    /// Insert, or update the live record at the same path
    Upsert(NewPhoto),
    /// Same bytes, new size/mtime stamp
    Touch { id: i64, size: u64, mtime_ns: i64 },
    /// Same bytes found at a new path
    Move {
        id: i64,
        to: PathBuf,
        size: u64,
        mtime_ns: i64,
    },
    /// Path vanished and no move explained it
    MarkMissing { id: i64 },
    /// A missing record is back, unchanged
    Reappear { id: i64 },
}

/// Live records sharing one content hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentGroup {
    pub content_hash: String,
    pub ids: Vec<i64>,
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// `dir` with a trailing separator, for prefix matching
fn dir_prefix(dir: &Path) -> String {
    let mut text = path_text(dir);
    if !text.ends_with(MAIN_SEPARATOR) {
        text.push(MAIN_SEPARATOR);
    }
    text
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<PhotoRecord> {
    let latitude: Option<f64> = row.get(11)?;
    let longitude: Option<f64> = row.get(12)?;
    let status: String = row.get(17)?;

    Ok(PhotoRecord {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        file_type: row.get(2)?,
        size: row.get::<_, i64>(3)? as u64,
        mtime_ns: row.get(4)?,
        content_hash: row.get(5)?,
        perceptual_hash: row.get::<_, Option<i64>>(6)?.map(PerceptualHash::from_i64),
        width: row.get::<_, Option<i64>>(7)?.map(|v| v as u32),
        height: row.get::<_, Option<i64>>(8)?.map(|v| v as u32),
        date_taken: row
            .get::<_, Option<i64>>(9)?
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        date_source: row
            .get::<_, Option<String>>(10)?
            .and_then(|s| DateSource::parse(&s)),
        location: latitude
            .zip(longitude)
            .map(|(latitude, longitude)| GeoLocation {
                latitude,
                longitude,
            }),
        is_document: row.get(13)?,
        deleted: row.get(14)?,
        trash_path: row.get::<_, Option<String>>(15)?.map(PathBuf::from),
        missing: row.get(16)?,
        backup_status: BackupStatus::parse(&status).unwrap_or(BackupStatus::NotBacked),
        backup_attempts: row.get::<_, i64>(18)? as u32,
        backup_error: row.get(19)?,
        review_note: row.get(20)?,
        dup_group: row.get(21)?,
        face_ids: FaceIdSet::from_concat(row.get(22)?),
    })
}

fn query_records(
    conn: &Connection,
    sql: &str,
    values: Vec<Value>,
) -> Result<Vec<PhotoRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(values), row_to_record)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn photo_by_id(conn: &Connection, id: i64) -> Result<Option<PhotoRecord>, StoreError> {
    let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos p WHERE p.id = ?");
    Ok(conn.query_row(&sql, [id], row_to_record).optional()?)
}

fn require_photo(conn: &Connection, id: i64) -> Result<PhotoRecord, StoreError> {
    photo_by_id(conn, id)?.ok_or(StoreError::UnknownPhoto { id })
}

/// The non-deleted record at `path`, if any (including missing ones)
pub(crate) fn photo_by_path(
    conn: &Connection,
    path: &Path,
) -> Result<Option<PhotoRecord>, StoreError> {
    let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos p WHERE p.path = ? AND p.deleted = 0");
    Ok(conn
        .query_row(&sql, [path_text(path)], row_to_record)
        .optional()?)
}

/// Ids of other live records with the given content hash
pub(crate) fn same_content(
    conn: &Connection,
    content_hash: &str,
    except: i64,
) -> Result<Vec<i64>, StoreError> {
    let sql = format!(
        "SELECT p.id FROM photos p
         WHERE p.content_hash = ?1 AND p.id != ?2 AND {LIVE} ORDER BY p.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt.query_map(params![content_hash, except], |row| row.get(0))?;
    Ok(ids.collect::<Result<Vec<i64>, _>>()?)
}

fn bands_of(hash: Option<PerceptualHash>) -> [Option<i64>; BAND_COUNT] {
    match hash {
        Some(h) => h.bands().map(|b| Some(b as i64)),
        None => [None; BAND_COUNT],
    }
}

/// Insert or update by path, enforcing the content-hash policy.
///
/// Byte-identical records at other paths are kept and reported in
/// [`UpsertOutcome::same_content`], never merged.
pub(crate) fn upsert_photo(
    conn: &Connection,
    photo: &NewPhoto,
) -> Result<UpsertOutcome, StoreError> {
    let existing = photo_by_path(conn, &photo.path)?;
    let bands = bands_of(photo.perceptual_hash);
    let date_ms = photo.date_taken.map(|d| d.timestamp_millis());
    let date_source = photo.date_source.map(|s| s.as_str());
    let (latitude, longitude) = match photo.location {
        Some(loc) => (Some(loc.latitude), Some(loc.longitude)),
        None => (None, None),
    };

    let (id, inserted, content_changed) = match existing {
        None => {
            conn.execute(
                "INSERT INTO photos (path, size, mtime_ns, content_hash, perceptual_hash,
                    band0, band1, band2, band3, width, height, date_taken_ms, date_source,
                    latitude, longitude, is_document, review_note, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9,
                         ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    path_text(&photo.path),
                    photo.size as i64,
                    photo.mtime_ns,
                    photo.content_hash,
                    photo.perceptual_hash.map(|h| h.to_i64()),
                    bands[0],
                    bands[1],
                    bands[2],
                    bands[3],
                    photo.width,
                    photo.height,
                    date_ms,
                    date_source,
                    latitude,
                    longitude,
                    photo.is_document,
                    photo.review_note,
                    now_millis(),
                ],
            )?;
            (conn.last_insert_rowid(), true, false)
        }
        Some(record) => {
            let content_changed = record.content_hash != photo.content_hash;
            let hash_changed = record.perceptual_hash != photo.perceptual_hash;

            conn.execute(
                "UPDATE photos SET size = ?2, mtime_ns = ?3, content_hash = ?4,
                    perceptual_hash = ?5, band0 = ?6, band1 = ?7, band2 = ?8, band3 = ?9,
                    width = ?10, height = ?11, date_taken_ms = ?12, date_source = ?13,
                    latitude = ?14, longitude = ?15, is_document = ?16, review_note = ?17,
                    missing = 0, indexed_at = ?18
                 WHERE id = ?1",
                params![
                    record.id,
                    photo.size as i64,
                    photo.mtime_ns,
                    photo.content_hash,
                    photo.perceptual_hash.map(|h| h.to_i64()),
                    bands[0],
                    bands[1],
                    bands[2],
                    bands[3],
                    photo.width,
                    photo.height,
                    date_ms,
                    date_source,
                    latitude,
                    longitude,
                    photo.is_document,
                    photo.review_note,
                    now_millis(),
                ],
            )?;

            if content_changed {
                on_content_changed(conn, &record)?;
            }
            if content_changed || hash_changed || record.missing {
                set_dup_group(conn, record.id, None)?;
                mark_groups_dirty(conn)?;
            }
            (record.id, false, content_changed)
        }
    };

    Ok(UpsertOutcome {
        id,
        inserted,
        content_changed,
        same_content: same_content(conn, &photo.content_hash, id)?,
    })
}

/// The file at a record's path was replaced with different bytes
fn on_content_changed(conn: &Connection, record: &PhotoRecord) -> Result<(), StoreError> {
    // The one sanctioned way back from BackedUp
    if record.backup_status == BackupStatus::BackedUp {
        conn.execute(
            "UPDATE photos SET backup_status = ?2, backup_error = NULL WHERE id = ?1",
            params![record.id, BackupStatus::NotBacked.as_str()],
        )?;
    }

    // Faces on the old bytes no longer apply
    conn.execute(
        "UPDATE faces SET member_count = MAX(0, member_count - (
             SELECT COUNT(*) FROM face_observations o
             WHERE o.face_id = faces.id AND o.photo_id = ?1))
         WHERE id IN (SELECT face_id FROM face_observations WHERE photo_id = ?1)",
        [record.id],
    )?;
    conn.execute("DELETE FROM face_observations WHERE photo_id = ?1", [record.id])?;
    Ok(())
}

/// Apply one pipeline change; returns the affected record id
pub(crate) fn apply_change(conn: &Connection, change: &PhotoChange) -> Result<i64, StoreError> {
    match change {
        PhotoChange::Upsert(photo) => Ok(upsert_photo(conn, photo)?.id),
        PhotoChange::Touch { id, size, mtime_ns } => {
            let updated = conn.execute(
                "UPDATE photos SET size = ?2, mtime_ns = ?3 WHERE id = ?1",
                params![id, *size as i64, mtime_ns],
            )?;
            if updated == 0 {
                return Err(StoreError::UnknownPhoto { id: *id });
            }
            Ok(*id)
        }
        PhotoChange::Move {
            id,
            to,
            size,
            mtime_ns,
        } => {
            if let Some(existing) = photo_by_path(conn, to)? {
                if existing.id != *id {
                    return Err(StoreError::PathConflict {
                        path: to.clone(),
                        existing: existing.id,
                    });
                }
            }
            let record = require_photo(conn, *id)?;
            conn.execute(
                "UPDATE photos SET path = ?2, size = ?3, mtime_ns = ?4, missing = 0 WHERE id = ?1",
                params![id, path_text(to), *size as i64, mtime_ns],
            )?;
            if record.missing {
                set_dup_group(conn, *id, None)?;
            }
            Ok(*id)
        }
        PhotoChange::MarkMissing { id } => {
            conn.execute(
                "UPDATE photos SET missing = 1, dup_group = NULL WHERE id = ?1",
                [id],
            )?;
            mark_groups_dirty(conn)?;
            Ok(*id)
        }
        PhotoChange::Reappear { id } => {
            conn.execute(
                "UPDATE photos SET missing = 0, dup_group = NULL WHERE id = ?1",
                [id],
            )?;
            Ok(*id)
        }
    }
}

/// Non-deleted records under any of `roots`, as the scanner's baseline
pub(crate) fn known_files(
    conn: &Connection,
    roots: &[PathBuf],
) -> Result<Vec<KnownFile>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, path, size, mtime_ns, content_hash, missing FROM photos
         WHERE deleted = 0 AND substr(path, 1, length(?1)) = ?1",
    )?;

    let mut known: BTreeMap<i64, KnownFile> = BTreeMap::new();
    for root in roots {
        let rows = stmt.query_map([dir_prefix(root)], |row| {
            Ok(KnownFile {
                id: row.get(0)?,
                path: PathBuf::from(row.get::<_, String>(1)?),
                size: row.get::<_, i64>(2)? as u64,
                mtime_ns: row.get(3)?,
                content_hash: row.get(4)?,
                missing: row.get(5)?,
            })
        })?;
        for file in rows {
            let file = file?;
            known.insert(file.id, file);
        }
    }
    Ok(known.into_values().collect())
}

/// Live `(id, hash)` pairs within `max_distance` of `hash`, ascending id.
///
/// Uses the band columns when the bound is small enough; otherwise scans.
pub(crate) fn neighbours(
    conn: &Connection,
    hash: PerceptualHash,
    max_distance: u32,
) -> Result<Vec<(i64, PerceptualHash)>, StoreError> {
    let mut found: BTreeMap<i64, PerceptualHash> = BTreeMap::new();

    let mut collect = |sql: &str, values: Vec<Value>| -> Result<(), StoreError> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, i64>(0)?, PerceptualHash::from_i64(row.get(1)?)))
        })?;
        for row in rows {
            let (id, other) = row?;
            if hash.distance(&other) <= max_distance {
                found.insert(id, other);
            }
        }
        Ok(())
    };

    if use_band_lookup(max_distance) {
        let radius = band_radius(max_distance);
        for (band, value) in hash.bands().into_iter().enumerate() {
            let nearby = values_within(value, radius);
            for chunk in nearby.chunks(IN_CHUNK) {
                let placeholders = vec!["?"; chunk.len()].join(",");
                let sql = format!(
                    "SELECT p.id, p.perceptual_hash FROM photos p
                     WHERE p.band{band} IN ({placeholders})
                       AND p.perceptual_hash IS NOT NULL AND {LIVE}"
                );
                collect(&sql, chunk.iter().map(|v| Value::Integer(*v as i64)).collect())?;
            }
        }
    } else {
        let sql = format!(
            "SELECT p.id, p.perceptual_hash FROM photos p
             WHERE p.perceptual_hash IS NOT NULL AND {LIVE}"
        );
        collect(&sql, Vec::new())?;
    }

    Ok(found.into_iter().collect())
}

/// Every live record with a perceptual hash
pub(crate) fn live_hashes(conn: &Connection) -> Result<Vec<(i64, PerceptualHash)>, StoreError> {
    hash_rows(conn, "")
}

/// Live records with a perceptual hash but no near-duplicate label yet
pub(crate) fn ungrouped_hashes(
    conn: &Connection,
) -> Result<Vec<(i64, PerceptualHash)>, StoreError> {
    hash_rows(conn, "AND p.dup_group IS NULL")
}

fn hash_rows(conn: &Connection, extra: &str) -> Result<Vec<(i64, PerceptualHash)>, StoreError> {
    let sql = format!(
        "SELECT p.id, p.perceptual_hash FROM photos p
         WHERE p.perceptual_hash IS NOT NULL AND {LIVE} {extra} ORDER BY p.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, PerceptualHash::from_i64(row.get(1)?)))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub(crate) fn set_dup_group(
    conn: &Connection,
    id: i64,
    group: Option<i64>,
) -> Result<(), StoreError> {
    conn.execute("UPDATE photos SET dup_group = ?2 WHERE id = ?1", params![id, group])?;
    Ok(())
}

pub(crate) fn dup_group_of(conn: &Connection, id: i64) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row("SELECT dup_group FROM photos WHERE id = ?1", [id], |row| row.get(0))
        .optional()?
        .flatten())
}

/// Fold every member labelled `from` into `to`
pub(crate) fn relabel_dup_group(conn: &Connection, from: i64, to: i64) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE photos SET dup_group = ?2 WHERE dup_group = ?1",
        params![from, to],
    )?;
    Ok(())
}

/// Persisted near-duplicate labels with more than one live member
pub(crate) fn labelled_groups(conn: &Connection) -> Result<Vec<(i64, Vec<i64>)>, StoreError> {
    let sql = format!(
        "SELECT p.dup_group, group_concat(p.id) FROM photos p
         WHERE {LIVE} AND p.dup_group IS NOT NULL
         GROUP BY p.dup_group HAVING COUNT(*) > 1 ORDER BY p.dup_group"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut groups = Vec::new();
    for row in rows {
        let (label, ids) = row?;
        let mut ids: Vec<i64> = ids.split(',').filter_map(|s| s.parse().ok()).collect();
        ids.sort_unstable();
        groups.push((label, ids));
    }
    Ok(groups)
}

pub(crate) fn clear_dup_groups(conn: &Connection) -> Result<(), StoreError> {
    conn.execute("UPDATE photos SET dup_group = NULL WHERE dup_group IS NOT NULL", [])?;
    Ok(())
}

/// Live records sharing a content hash with at least one other
pub(crate) fn content_groups(conn: &Connection) -> Result<Vec<ContentGroup>, StoreError> {
    let sql = format!(
        "SELECT p.content_hash, group_concat(p.id) FROM photos p
         WHERE {LIVE} GROUP BY p.content_hash HAVING COUNT(*) > 1 ORDER BY MIN(p.id)"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        let hash: String = row.get(0)?;
        let ids: String = row.get(1)?;
        Ok((hash, ids))
    })?;

    let mut groups = Vec::new();
    for row in rows {
        let (content_hash, ids) = row?;
        let mut ids: Vec<i64> = ids.split(',').filter_map(|s| s.parse().ok()).collect();
        ids.sort_unstable();
        groups.push(ContentGroup { content_hash, ids });
    }
    Ok(groups)
}

/// Records by id, in the order requested (unknown ids are skipped)
pub(crate) fn photos_by_ids(
    conn: &Connection,
    ids: &[i64],
) -> Result<Vec<PhotoRecord>, StoreError> {
    let mut by_id = BTreeMap::new();
    for chunk in ids.chunks(IN_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos p WHERE p.id IN ({placeholders})");
        let values = chunk.iter().map(|id| Value::Integer(*id)).collect();
        for record in query_records(conn, &sql, values)? {
            by_id.insert(record.id, record);
        }
    }
    Ok(ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
}

pub(crate) fn list_photos(
    conn: &Connection,
    filter: &PhotoFilter,
) -> Result<Vec<PhotoRecord>, StoreError> {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if !filter.include_deleted {
        clauses.push("p.deleted = 0".into());
    }
    if !filter.include_missing {
        clauses.push("p.missing = 0".into());
    }
    if let Some(status) = filter.backup_status {
        clauses.push("p.backup_status = ?".into());
        values.push(Value::Text(status.as_str().to_string()));
    }
    if filter.documents_only {
        clauses.push("p.is_document = 1".into());
    }
    if let Some(after) = filter.taken_after {
        clauses.push("p.date_taken_ms >= ?".into());
        values.push(Value::Integer(after.timestamp_millis()));
    }
    if let Some(before) = filter.taken_before {
        clauses.push("p.date_taken_ms < ?".into());
        values.push(Value::Integer(before.timestamp_millis()));
    }
    if let Some(dir) = &filter.under {
        clauses.push("substr(p.path, 1, length(?)) = ?".into());
        let prefix = dir_prefix(dir);
        values.push(Value::Text(prefix.clone()));
        values.push(Value::Text(prefix));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let direction = if filter.descending { "DESC" } else { "ASC" };
    let limit = filter
        .limit
        .map(|n| format!("LIMIT {}", n))
        .unwrap_or_default();

    let sql = format!(
        "SELECT {PHOTO_COLUMNS} FROM photos p {where_sql}
         ORDER BY {} {direction}, p.id {direction} {limit}",
        filter.sort.column()
    );
    query_records(conn, &sql, values)
}

/// Live records a backup pass should pick up, oldest first
pub(crate) fn backup_queue(conn: &Connection) -> Result<Vec<PhotoRecord>, StoreError> {
    let sql = format!(
        "SELECT {PHOTO_COLUMNS} FROM photos p
         WHERE {LIVE} AND p.backup_status IN ('not_backed', 'failed') ORDER BY p.id"
    );
    query_records(conn, &sql, Vec::new())
}

/// Move a record along the backup state machine.
///
/// `BackedUp -> NotBacked` is refused here: only a content change (via
/// upsert) may take that edge.
pub(crate) fn set_backup_status(
    conn: &Connection,
    id: i64,
    next: BackupStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    let record = require_photo(conn, id)?;
    let current = record.backup_status;

    let permitted = current.can_transition_to(next)
        && !(current == BackupStatus::BackedUp && next == BackupStatus::NotBacked);
    if !permitted {
        return Err(StoreError::IllegalTransition {
            id,
            from: current.to_string(),
            to: next.to_string(),
        });
    }

    match next {
        BackupStatus::BackedUp => conn.execute(
            "UPDATE photos SET backup_status = ?2, backup_error = NULL, backed_up_at = ?3
             WHERE id = ?1",
            params![id, next.as_str(), now_millis()],
        )?,
        BackupStatus::Failed => conn.execute(
            "UPDATE photos SET backup_status = ?2, backup_error = ?3,
                backup_attempts = backup_attempts + 1
             WHERE id = ?1",
            params![id, next.as_str(), error],
        )?,
        BackupStatus::NotBacked => conn.execute(
            "UPDATE photos SET backup_status = ?2 WHERE id = ?1",
            params![id, next.as_str()],
        )?,
    };
    Ok(())
}

/// A failed record failing again: count the attempt, keep the status
pub(crate) fn record_backup_retry_failure(
    conn: &Connection,
    id: i64,
    error: &str,
) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE photos SET backup_error = ?2, backup_attempts = backup_attempts + 1
         WHERE id = ?1 AND backup_status = 'failed'",
        params![id, error],
    )?;
    if updated == 0 {
        return Err(StoreError::UnknownPhoto { id });
    }
    Ok(())
}

pub(crate) fn mark_trashed(
    conn: &Connection,
    id: i64,
    trash_path: &Path,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE photos SET deleted = 1, trash_path = ?2, deleted_at = ?3, dup_group = NULL
         WHERE id = ?1",
        params![id, path_text(trash_path), now_millis()],
    )?;
    mark_groups_dirty(conn)
}

pub(crate) fn mark_restored(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let record = require_photo(conn, id)?;
    if let Some(existing) = photo_by_path(conn, &record.path)? {
        return Err(StoreError::PathConflict {
            path: record.path,
            existing: existing.id,
        });
    }
    conn.execute(
        "UPDATE photos SET deleted = 0, trash_path = NULL, deleted_at = NULL, dup_group = NULL
         WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

pub(crate) fn trashed_photos(conn: &Connection) -> Result<Vec<PhotoRecord>, StoreError> {
    let sql = format!("SELECT {PHOTO_COLUMNS} FROM photos p WHERE p.deleted = 1 ORDER BY p.id");
    query_records(conn, &sql, Vec::new())
}

/// Hard-delete a trashed record. Face clusters are kept.
pub(crate) fn purge_record(conn: &Connection, id: i64) -> Result<(), StoreError> {
    let deleted = conn.execute("DELETE FROM photos WHERE id = ?1 AND deleted = 1", [id])?;
    if deleted == 0 {
        return Err(StoreError::UnknownPhoto { id });
    }
    Ok(())
}

impl IndexStore {
    /// Insert or update one record by path
    pub fn upsert(&self, photo: &NewPhoto) -> Result<UpsertOutcome, StoreError> {
        self.write(|tx| upsert_photo(tx, photo))
    }

    /// Apply a batch of pipeline changes in one transaction.
    ///
    /// Returns the affected id of each change, in order.
    pub fn apply(&self, changes: &[PhotoChange]) -> Result<Vec<i64>, StoreError> {
        self.write(|tx| changes.iter().map(|c| apply_change(tx, c)).collect())
    }

    pub fn get(&self, id: i64) -> Result<Option<PhotoRecord>, StoreError> {
        self.read(|conn| photo_by_id(conn, id))
    }

    /// The non-deleted record at `path`
    pub fn get_by_path(&self, path: &Path) -> Result<Option<PhotoRecord>, StoreError> {
        self.read(|conn| photo_by_path(conn, path))
    }

    pub fn get_many(&self, ids: &[i64]) -> Result<Vec<PhotoRecord>, StoreError> {
        self.read(|conn| photos_by_ids(conn, ids))
    }

    pub fn list(&self, filter: &PhotoFilter) -> Result<Vec<PhotoRecord>, StoreError> {
        self.read(|conn| list_photos(conn, filter))
    }

    /// Live records within `max_distance` bits of `hash`
    pub fn query_by_hash_neighborhood(
        &self,
        hash: PerceptualHash,
        max_distance: u32,
    ) -> Result<Vec<PhotoRecord>, StoreError> {
        self.read(|conn| {
            let ids: Vec<i64> = neighbours(conn, hash, max_distance)?
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            photos_by_ids(conn, &ids)
        })
    }

    /// Live records taken in `[from, to)`, oldest first
    pub fn query_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PhotoRecord>, StoreError> {
        self.list(&PhotoFilter {
            sort: super::SortField::DateTaken,
            taken_after: Some(from),
            taken_before: Some(to),
            ..Default::default()
        })
    }

    pub fn query_by_backup_status(
        &self,
        status: BackupStatus,
    ) -> Result<Vec<PhotoRecord>, StoreError> {
        self.list(&PhotoFilter {
            backup_status: Some(status),
            ..Default::default()
        })
    }

    /// Records currently in the trash
    pub fn query_deleted(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.read(trashed_photos)
    }

    /// Baseline for a rescan of `roots`
    pub fn known_files(&self, roots: &[PathBuf]) -> Result<Vec<KnownFile>, StoreError> {
        self.read(|conn| known_files(conn, roots))
    }

    /// Live records byte-identical to record `id`
    pub fn exact_duplicates_of(&self, id: i64) -> Result<Vec<i64>, StoreError> {
        self.read(|conn| {
            let record = require_photo(conn, id)?;
            same_content(conn, &record.content_hash, id)
        })
    }

    pub fn content_groups(&self) -> Result<Vec<ContentGroup>, StoreError> {
        self.read(content_groups)
    }

    pub fn backup_queue(&self) -> Result<Vec<PhotoRecord>, StoreError> {
        self.read(backup_queue)
    }

    pub fn set_backup_status(
        &self,
        id: i64,
        status: BackupStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        self.write(|tx| set_backup_status(tx, id, status, error))
    }

    /// Number of live records
    pub fn count(&self) -> Result<usize, StoreError> {
        self.read(|conn| {
            let sql = format!("SELECT COUNT(*) FROM photos p WHERE {LIVE}");
            Ok(conn.query_row(&sql, [], |row| row.get::<_, i64>(0))? as usize)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;
    use chrono::TimeZone;

    fn photo(path: &str, hash: &str) -> NewPhoto {
        NewPhoto::bare(path, 100, 1_000, hash)
    }

    #[test]
    fn upsert_inserts_then_updates_by_path() {
        let (_dir, store) = temp_store();
        let first = store.upsert(&photo("/p/a.jpg", "h1")).unwrap();
        assert!(first.inserted);

        let mut changed = photo("/p/a.jpg", "h1");
        changed.size = 200;
        let second = store.upsert(&changed).unwrap();

        assert_eq!(second.id, first.id);
        assert!(!second.inserted);
        assert!(!second.content_changed);
        assert_eq!(store.get(first.id).unwrap().unwrap().size, 200);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn same_bytes_at_two_paths_are_cross_referenced_not_merged() {
        let (_dir, store) = temp_store();
        let a = store.upsert(&photo("/p/a.jpg", "same")).unwrap();
        let b = store.upsert(&photo("/p/b.jpg", "same")).unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(b.same_content, vec![a.id]);
        assert_eq!(store.exact_duplicates_of(a.id).unwrap(), vec![b.id]);
        assert_eq!(
            store.content_groups().unwrap(),
            vec![ContentGroup {
                content_hash: "same".into(),
                ids: vec![a.id, b.id]
            }]
        );
    }

    #[test]
    fn ids_are_never_reused_after_purge() {
        let (dir, store) = temp_store();
        let first = store.upsert(&photo("/p/a.jpg", "h1")).unwrap().id;
        store
            .write(|tx| {
                mark_trashed(tx, first, &dir.path().join("trash/a.jpg"))?;
                purge_record(tx, first)
            })
            .unwrap();

        let second = store.upsert(&photo("/p/a.jpg", "h1")).unwrap().id;
        assert!(second > first);
    }

    #[test]
    fn trashed_path_can_be_indexed_again() {
        let (dir, store) = temp_store();
        let old = store.upsert(&photo("/p/a.jpg", "h1")).unwrap().id;
        store
            .write(|tx| mark_trashed(tx, old, &dir.path().join("trash/a.jpg")))
            .unwrap();

        let new = store.upsert(&photo("/p/a.jpg", "h2")).unwrap();
        assert!(new.inserted);
        assert_eq!(store.query_deleted().unwrap().len(), 1);
        assert_eq!(store.get_by_path(Path::new("/p/a.jpg")).unwrap().unwrap().id, new.id);
    }

    #[test]
    fn content_change_resets_backed_up_status() {
        let (_dir, store) = temp_store();
        let id = store.upsert(&photo("/p/a.jpg", "h1")).unwrap().id;
        store.set_backup_status(id, BackupStatus::BackedUp, None).unwrap();

        let outcome = store.upsert(&photo("/p/a.jpg", "h2")).unwrap();

        assert!(outcome.content_changed);
        assert_eq!(store.get(id).unwrap().unwrap().backup_status, BackupStatus::NotBacked);
    }

    #[test]
    fn backed_up_cannot_be_reset_directly() {
        let (_dir, store) = temp_store();
        let id = store.upsert(&photo("/p/a.jpg", "h1")).unwrap().id;
        store.set_backup_status(id, BackupStatus::BackedUp, None).unwrap();

        assert!(matches!(
            store.set_backup_status(id, BackupStatus::NotBacked, None),
            Err(StoreError::IllegalTransition { .. })
        ));
        assert!(matches!(
            store.set_backup_status(id, BackupStatus::Failed, Some("disk")),
            Err(StoreError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn failed_records_count_attempts() {
        let (_dir, store) = temp_store();
        let id = store.upsert(&photo("/p/a.jpg", "h1")).unwrap().id;
        store.set_backup_status(id, BackupStatus::Failed, Some("offline")).unwrap();
        store
            .write(|tx| record_backup_retry_failure(tx, id, "still offline"))
            .unwrap();

        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.backup_attempts, 2);
        assert_eq!(record.backup_error.as_deref(), Some("still offline"));
        assert_eq!(store.backup_queue().unwrap().len(), 1);
    }

    #[test]
    fn neighbourhood_query_respects_distance() {
        let (_dir, store) = temp_store();
        let base = 0x0F0F_0F0F_0F0F_0F0Fu64;
        let near = store
            .upsert(&photo("/p/near.jpg", "n").with_perceptual_hash(PerceptualHash(base ^ 0b111)))
            .unwrap()
            .id;
        store
            .upsert(&photo("/p/far.jpg", "f").with_perceptual_hash(PerceptualHash(!base)))
            .unwrap();
        store.upsert(&photo("/p/undecodable.jpg", "u")).unwrap();

        let hits = store.query_by_hash_neighborhood(PerceptualHash(base), 8).unwrap();
        assert_eq!(hits.iter().map(|r| r.id).collect::<Vec<_>>(), vec![near]);

        let wide = store.query_by_hash_neighborhood(PerceptualHash(base), 64).unwrap();
        assert_eq!(wide.len(), 2);
    }

    #[test]
    fn missing_records_leave_listings_and_neighbourhoods() {
        let (_dir, store) = temp_store();
        let id = store
            .upsert(&photo("/p/a.jpg", "h").with_perceptual_hash(PerceptualHash(7)))
            .unwrap()
            .id;
        store.apply(&[PhotoChange::MarkMissing { id }]).unwrap();

        assert!(store.list(&PhotoFilter::default()).unwrap().is_empty());
        assert!(store
            .query_by_hash_neighborhood(PerceptualHash(7), 0)
            .unwrap()
            .is_empty());
        assert_eq!(store.known_files(&[PathBuf::from("/p")]).unwrap().len(), 1);
    }

    #[test]
    fn move_conflicting_with_live_path_is_rejected() {
        let (_dir, store) = temp_store();
        let a = store.upsert(&photo("/p/a.jpg", "h1")).unwrap().id;
        store.upsert(&photo("/p/b.jpg", "h2")).unwrap();

        let result = store.apply(&[PhotoChange::Move {
            id: a,
            to: PathBuf::from("/p/b.jpg"),
            size: 100,
            mtime_ns: 1_000,
        }]);
        assert!(matches!(result, Err(StoreError::PathConflict { .. })));
        assert_eq!(store.get(a).unwrap().unwrap().path, PathBuf::from("/p/a.jpg"));
    }

    #[test]
    fn failed_batch_commits_nothing() {
        let (_dir, store) = temp_store();
        let result = store.apply(&[
            PhotoChange::Upsert(photo("/p/a.jpg", "h1")),
            PhotoChange::Touch {
                id: 999,
                size: 1,
                mtime_ns: 1,
            },
        ]);
        assert!(result.is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn list_sorts_and_filters() {
        let (_dir, store) = temp_store();
        let mut old = photo("/p/old.jpg", "h1");
        old.date_taken = Some(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap());
        old.size = 10;
        let mut new = photo("/p/new.jpg", "h2");
        new.date_taken = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        new.size = 20;
        store.upsert(&old).unwrap();
        store.upsert(&new).unwrap();
        store.upsert(&photo("/q/other.jpg", "h3")).unwrap();

        let by_size = store
            .list(&PhotoFilter {
                sort: super::super::SortField::Size,
                descending: true,
                under: Some(PathBuf::from("/p")),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_size[0].path, PathBuf::from("/p/new.jpg"));
        assert_eq!(by_size.len(), 2);

        let range = store
            .query_by_date_range(
                Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap(),
            )
            .unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(range[0].path, PathBuf::from("/p/old.jpg"));
    }
}
