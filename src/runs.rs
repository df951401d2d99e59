//! Indexing run records.
//!
//! Exactly one row per target in `indexing_runs`, holding the latest attempt.
//! Every write replaces the whole row in a single statement, so a concurrent
//! reader sees either the previous or the new progress, never a mix.
//!
//! The row doubles as the cross-process run lock: [`RunCatalog::claim`] only
//! replaces a row that is absent or finished, so two processes sharing the
//! catalog cannot both start a run for the same target. Rows orphaned by a
//! crash are released by [`RunCatalog::fail_in_progress`] or
//! [`RunCatalog::clear`].

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::db::{from_millis, to_millis};
use crate::error::Result;
use crate::models::{IndexingRun, RunStatus};

/// Message recorded on runs found unfinished at startup.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by shutdown";

#[derive(Clone)]
pub struct RunCatalog {
    pool: SqlitePool,
}

impl RunCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, target_id: &str) -> Result<Option<IndexingRun>> {
        let row = sqlx::query(
            r#"
            SELECT target_id, status, percentage, processed_files, total_files, files_failed,
                   chunks_stored, error_message, started_at, completed_at
            FROM indexing_runs WHERE target_id = ?
            "#,
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_run(&r)).transpose()
    }

    /// Record `run` as the target's new attempt unless an unfinished run
    /// already holds the row. Returns false when the row is taken.
    pub async fn claim(&self, run: &IndexingRun) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO indexing_runs (target_id, status, percentage, processed_files, total_files,
                                       files_failed, chunks_stored, error_message, started_at,
                                       completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(target_id) DO UPDATE SET
                status = excluded.status,
                percentage = excluded.percentage,
                processed_files = excluded.processed_files,
                total_files = excluded.total_files,
                files_failed = excluded.files_failed,
                chunks_stored = excluded.chunks_stored,
                error_message = excluded.error_message,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            WHERE indexing_runs.status NOT IN ('pending', 'indexing')
            "#,
        )
        .bind(&run.target_id)
        .bind(run.status.as_str())
        .bind(run.percentage as i64)
        .bind(run.processed_files as i64)
        .bind(run.total_files as i64)
        .bind(run.files_failed as i64)
        .bind(run.chunks_stored as i64)
        .bind(&run.error_message)
        .bind(to_millis(run.started_at))
        .bind(run.completed_at.map(to_millis))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically replace the run record for `run.target_id`.
    pub async fn save(&self, run: &IndexingRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO indexing_runs (target_id, status, percentage, processed_files, total_files,
                                       files_failed, chunks_stored, error_message, started_at,
                                       completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(target_id) DO UPDATE SET
                status = excluded.status,
                percentage = excluded.percentage,
                processed_files = excluded.processed_files,
                total_files = excluded.total_files,
                files_failed = excluded.files_failed,
                chunks_stored = excluded.chunks_stored,
                error_message = excluded.error_message,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&run.target_id)
        .bind(run.status.as_str())
        .bind(run.percentage as i64)
        .bind(run.processed_files as i64)
        .bind(run.total_files as i64)
        .bind(run.files_failed as i64)
        .bind(run.chunks_stored as i64)
        .bind(&run.error_message)
        .bind(to_millis(run.started_at))
        .bind(run.completed_at.map(to_millis))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Move an unfinished run for `target_id` to `error` with `message`.
    /// Returns false if there was no unfinished run.
    pub async fn clear(&self, target_id: &str, message: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE indexing_runs SET status = 'error', error_message = ?, completed_at = ?
            WHERE target_id = ? AND status IN ('pending', 'indexing')
            "#,
        )
        .bind(message)
        .bind(to_millis(now))
        .bind(target_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Targets whose recorded run is `pending` or `indexing`.
    pub async fn list_in_progress(&self) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT target_id FROM indexing_runs WHERE status IN ('pending', 'indexing')",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Turn every unfinished run into an `error` with `message`.
    /// Returns the number of rows changed.
    pub async fn fail_in_progress(&self, message: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE indexing_runs SET status = 'error', error_message = ?, completed_at = ?
            WHERE status IN ('pending', 'indexing')
            "#,
        )
        .bind(message)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_run(row: &SqliteRow) -> Result<IndexingRun> {
    let status: String = row.try_get("status")?;
    let percentage: i64 = row.try_get("percentage")?;
    let processed: i64 = row.try_get("processed_files")?;
    let total: i64 = row.try_get("total_files")?;
    let failed: i64 = row.try_get("files_failed")?;
    let chunks: i64 = row.try_get("chunks_stored")?;
    let started_at: i64 = row.try_get("started_at")?;
    let completed_at: Option<i64> = row.try_get("completed_at")?;

    Ok(IndexingRun {
        target_id: row.try_get("target_id")?,
        status: status.parse::<RunStatus>()?,
        processed_files: processed.max(0) as u64,
        total_files: total.max(0) as u64,
        percentage: percentage.clamp(0, 100) as u8,
        files_failed: failed.max(0) as u64,
        chunks_stored: chunks.max(0) as u64,
        error_message: row.try_get("error_message")?,
        started_at: from_millis(started_at),
        completed_at: completed_at.map(from_millis),
    })
}
