//! Catalog statistics.
//!
//! A quick summary of what is watched and what is indexed: target counts,
//! runs still in flight, and the number of chunks in the vector store. Used
//! by `dex stats` and `GET /stats`.

use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::runs::RunCatalog;
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub targets_total: u64,
    pub targets_enabled: u64,
    /// Targets with at least one completed run.
    pub targets_indexed: u64,
    /// Runs recorded as `pending` or `indexing`.
    pub runs_in_progress: u64,
    pub chunks: u64,
}

pub async fn gather(pool: &SqlitePool, runs: &RunCatalog, store: &dyn VectorStore) -> Result<IndexStats> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(enabled), 0) AS enabled,
               COUNT(last_indexed_at) AS indexed
        FROM watch_targets
        "#,
    )
    .fetch_one(pool)
    .await?;

    let total: i64 = row.try_get("total")?;
    let enabled: i64 = row.try_get("enabled")?;
    let indexed: i64 = row.try_get("indexed")?;

    Ok(IndexStats {
        targets_total: total.max(0) as u64,
        targets_enabled: enabled.max(0) as u64,
        targets_indexed: indexed.max(0) as u64,
        runs_in_progress: runs.list_in_progress().await?.len() as u64,
        chunks: store.count().await?,
    })
}
