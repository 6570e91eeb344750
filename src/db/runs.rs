//! Run history.

use crate::error::DatabaseError;
use crate::types::{RunId, RunOutcome, RunRecord};
use crate::{Error, Result};
use chrono::{TimeZone, Utc};

use super::{Database, RunRow};

impl Database {
    /// Highest recorded run id (0 when the history is empty)
    pub async fn max_run_id(&self) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM run_history")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query run ids: {}",
                    e
                )))
            })?;

        Ok(max.unwrap_or(0))
    }

    /// Record a finished run
    pub async fn insert_run(&self, record: &RunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO run_history (
                id, started_at, finished_at, outcome, instruments, docking_stations,
                pages_failed, rows_skipped, logged_in, error
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id)
        .bind(record.started_at.timestamp())
        .bind(record.finished_at.timestamp())
        .bind(record.outcome.as_str())
        .bind(record.instruments)
        .bind(record.docking_stations)
        .bind(record.pages_failed)
        .bind(record.rows_skipped)
        .bind(record.logged_in as i64)
        .bind(&record.error)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record run {}: {}",
                record.id, e
            )))
        })?;

        Ok(())
    }

    /// Most recent runs, newest first
    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<RunRecord>> {
        let rows: Vec<RunRow> = sqlx::query_as(
            r#"
            SELECT id, started_at, finished_at, outcome, instruments, docking_stations,
                   pages_failed, rows_skipped, logged_in, error
            FROM run_history
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to query run history: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(RunRecord::from).collect())
    }

    /// Drop all but the newest `keep` runs, returning how many were removed
    pub async fn prune_runs(&self, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM run_history
            WHERE id NOT IN (SELECT id FROM run_history ORDER BY id DESC LIMIT ?)
            "#,
        )
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to prune run history: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}

impl From<RunRow> for RunRecord {
    fn from(row: RunRow) -> Self {
        let at = |ts: i64| Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now);

        RunRecord {
            id: RunId(row.id),
            started_at: at(row.started_at),
            finished_at: at(row.finished_at),
            outcome: RunOutcome::from_str_lossy(&row.outcome),
            instruments: row.instruments,
            docking_stations: row.docking_stations,
            pages_failed: row.pages_failed,
            rows_skipped: row.rows_skipped,
            logged_in: row.logged_in != 0,
            error: row.error,
        }
    }
}
