//! Database operations for pass history.

use super::types::{RunKind, RunRecord, RunStatus};
use crate::core::store::IndexStore;
use crate::error::StoreError;
use crate::events::PassSummary;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use uuid::Uuid;

const RUN_COLUMNS: &str = "id, kind, started_at, roots, total, added, modified, unchanged,
     moved, missing, errors, duration_ms, status";

/// Repository for the `scan_runs` table of an [`IndexStore`]
pub struct HistoryRepository<'a> {
    store: &'a IndexStore,
}

impl<'a> HistoryRepository<'a> {
    pub fn new(store: &'a IndexStore) -> Self {
        Self { store }
    }

    /// Store the summary of a finished pass; returns the new run
    pub fn record(
        &self,
        kind: RunKind,
        started_at: DateTime<Utc>,
        roots: &[PathBuf],
        summary: &PassSummary,
    ) -> Result<RunRecord, StoreError> {
        let run = RunRecord {
            id: Self::generate_id(),
            kind,
            started_at,
            roots: roots.to_vec(),
            summary: summary.clone(),
            status: if summary.cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            },
        };

        let roots_json = to_json(&run.roots)?;
        let errors_json = to_json(&run.summary.errors)?;
        self.store.write(|tx| {
            tx.execute(
                "INSERT INTO scan_runs
                 (id, kind, started_at, roots, total, added, modified, unchanged,
                  moved, missing, errors, duration_ms, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    run.id,
                    run.kind.as_str(),
                    run.started_at.timestamp_millis(),
                    roots_json,
                    run.summary.total as i64,
                    run.summary.added as i64,
                    run.summary.modified as i64,
                    run.summary.unchanged as i64,
                    run.summary.moved as i64,
                    run.summary.missing as i64,
                    errors_json,
                    run.summary.duration_ms as i64,
                    run.status.as_str(),
                ],
            )?;
            Ok(())
        })?;

        tracing::debug!(id = %run.id, kind = run.kind.as_str(), "run recorded");
        Ok(run)
    }

    /// Most recent runs first
    pub fn list(&self, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
        self.store.read(|conn| list_runs(conn, limit))
    }

    pub fn get(&self, id: &str) -> Result<Option<RunRecord>, StoreError> {
        self.store.read(|conn| {
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM scan_runs WHERE id = ?1"),
                [id],
                run_from_row,
            )
            .optional()
            .map_err(StoreError::from)
        })
    }

    /// Generate a new unique ID
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}

fn list_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRecord>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RUN_COLUMNS} FROM scan_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1"
    ))?;
    let runs = stmt
        .query_map([limit as i64], run_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(runs)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::QueryFailed(e.to_string()))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let kind: String = row.get(1)?;
    let started_at: i64 = row.get(2)?;
    let roots: String = row.get(3)?;
    let errors: String = row.get(10)?;
    let status: String = row.get(12)?;
    let count =
        |index: usize| -> rusqlite::Result<usize> { Ok(row.get::<_, i64>(index)? as usize) };

    let status = RunStatus::parse(&status).unwrap_or(RunStatus::Completed);
    Ok(RunRecord {
        id: row.get(0)?,
        kind: RunKind::parse(&kind).unwrap_or(RunKind::Scan),
        started_at: Utc
            .timestamp_millis_opt(started_at)
            .single()
            .unwrap_or_default(),
        roots: serde_json::from_str(&roots).unwrap_or_default(),
        summary: PassSummary {
            total: count(4)?,
            added: count(5)?,
            modified: count(6)?,
            unchanged: count(7)?,
            moved: count(8)?,
            missing: count(9)?,
            errors: serde_json::from_str(&errors).unwrap_or_default(),
            cancelled: status == RunStatus::Cancelled,
            duration_ms: row.get::<_, i64>(11)? as u64,
        },
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_support::temp_store;
    use chrono::Duration;

    fn summary() -> PassSummary {
        PassSummary {
            total: 100,
            added: 5,
            unchanged: 95,
            errors: vec!["/photos/broken.jpg: not an image".into()],
            duration_ms: 1500,
            ..Default::default()
        }
    }

    #[test]
    fn record_and_get() {
        let (_dir, store) = temp_store();
        let history = HistoryRepository::new(&store);

        let run = history
            .record(RunKind::Scan, Utc::now(), &[PathBuf::from("/photos")], &summary())
            .unwrap();

        let loaded = history.get(&run.id).unwrap().unwrap();
        assert_eq!(loaded.kind, RunKind::Scan);
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.summary.total, 100);
        assert_eq!(loaded.summary.errors.len(), 1);
        assert_eq!(loaded.roots, vec![PathBuf::from("/photos")]);
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let (_dir, store) = temp_store();
        let history = HistoryRepository::new(&store);
        let now = Utc::now();

        for days_ago in [3, 1, 2] {
            history
                .record(RunKind::Backup, now - Duration::days(days_ago), &[], &summary())
                .unwrap();
        }

        let runs = history.list(2).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs[0].started_at > runs[1].started_at);
    }

    #[test]
    fn cancelled_pass_is_recorded_as_cancelled() {
        let (_dir, store) = temp_store();
        let history = HistoryRepository::new(&store);
        let cancelled = PassSummary {
            cancelled: true,
            ..summary()
        };

        let run = history.record(RunKind::Scan, Utc::now(), &[], &cancelled).unwrap();

        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(history.get(&run.id).unwrap().unwrap().summary.cancelled);
    }

    #[test]
    fn unknown_id_is_none() {
        let (_dir, store) = temp_store();
        assert!(HistoryRepository::new(&store).get("nope").unwrap().is_none());
    }
}
