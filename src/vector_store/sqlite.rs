//! SQLite-backed vector store over the `chunk_vectors` table.
//!
//! Vectors are stored as little-endian f32 BLOBs (see
//! [`crate::embedding::vec_to_blob`]). Queries load the rows that pass the
//! filter and rank them with a brute-force cosine scan.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{cosine_distance, nearest, ChunkFilter, ChunkMatch, ChunkMetadata, ChunkRecord, VectorStore};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{IndexError, Result};

const FILTER_CLAUSE: &str = "(? IS NULL OR target_id = ?) \
     AND (? IS NULL OR target_path = ?) \
     AND (? IS NULL OR source_path = ?)";

#[derive(Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Bind each filter field twice, matching [`FILTER_CLAUSE`].
fn bind_filter<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    filter: &'q ChunkFilter,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(filter.target_id.as_deref())
        .bind(filter.target_id.as_deref())
        .bind(filter.target_path.as_deref())
        .bind(filter.target_path.as_deref())
        .bind(filter.source_path.as_deref())
        .bind(filter.source_path.as_deref())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (id, target_id, target_path, source_path, chunk_index,
                                           total_chunks, text, tags_json, dims, vector)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    target_id = excluded.target_id,
                    target_path = excluded.target_path,
                    source_path = excluded.source_path,
                    chunk_index = excluded.chunk_index,
                    total_chunks = excluded.total_chunks,
                    text = excluded.text,
                    tags_json = excluded.tags_json,
                    dims = excluded.dims,
                    vector = excluded.vector
                "#,
            )
            .bind(&record.id)
            .bind(&record.metadata.target_id)
            .bind(&record.metadata.target_path)
            .bind(&record.metadata.source_path)
            .bind(record.metadata.chunk_index as i64)
            .bind(record.metadata.total_chunks as i64)
            .bind(&record.text)
            .bind(serde_json::to_string(&record.metadata.tags)?)
            .bind(record.vector.len() as i64)
            .bind(vec_to_blob(&record.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize, filter: &ChunkFilter) -> Result<Vec<ChunkMatch>> {
        let sql = format!(
            "SELECT id, target_id, target_path, source_path, chunk_index, total_chunks, text, \
             tags_json, vector FROM chunk_vectors WHERE {}",
            FILTER_CLAUSE
        );
        let rows = bind_filter(sqlx::query(&sql), filter)
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("vector")?;
            let stored = blob_to_vec(&blob);
            matches.push(ChunkMatch {
                id: row.try_get("id")?,
                text: row.try_get("text")?,
                metadata: row_to_metadata(row)?,
                distance: cosine_distance(vector, &stored),
            });
        }
        Ok(nearest(matches, k))
    }

    async fn delete(&self, filter: &ChunkFilter) -> Result<u64> {
        if filter.is_empty() {
            return Err(IndexError::Store(
                "refusing to delete with an empty filter".to_string(),
            ));
        }
        let sql = format!("DELETE FROM chunk_vectors WHERE {}", FILTER_CLAUSE);
        let result = bind_filter(sqlx::query(&sql), filter)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_metadata(row: &SqliteRow) -> Result<ChunkMetadata> {
    let chunk_index: i64 = row.try_get("chunk_index")?;
    let total_chunks: i64 = row.try_get("total_chunks")?;
    let tags: String = row.try_get("tags_json")?;
    Ok(ChunkMetadata {
        source_path: row.try_get("source_path")?,
        target_id: row.try_get("target_id")?,
        target_path: row.try_get("target_path")?,
        chunk_index: chunk_index.max(0) as usize,
        total_chunks: total_chunks.max(0) as usize,
        tags: serde_json::from_str(&tags)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};

    async fn store(dir: &tempfile::TempDir) -> SqliteVectorStore {
        let pool = db::connect_path(&dir.path().join("dex.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        SqliteVectorStore::new(pool)
    }

    fn record(target: &str, source: &str, index: usize, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: format!("{}#{}", source, index),
            text: format!("chunk {} of {}", index, source),
            metadata: ChunkMetadata {
                source_path: source.to_string(),
                target_id: target.to_string(),
                target_path: format!("/{}", target),
                chunk_index: index,
                total_chunks: 2,
                tags: vec!["work".to_string()],
            },
            vector,
        }
    }

    #[tokio::test]
    async fn test_upsert_query_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store(&tmp).await;
        store
            .upsert(&[
                record("t1", "/t1/a.txt", 0, vec![1.0, 0.0]),
                record("t1", "/t1/a.txt", 1, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        // Same id again overwrites.
        store
            .upsert(&[record("t1", "/t1/a.txt", 1, vec![0.6, 0.8])])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let hits = store
            .query(&[0.0, 1.0], 1, &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "/t1/a.txt#1");
        assert_eq!(hits[0].metadata.tags, vec!["work"]);
        assert!((hits[0].distance - 0.2).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_filtered_query_and_delete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = store(&tmp).await;
        store
            .upsert(&[
                record("t1", "/t1/a.txt", 0, vec![1.0, 0.0]),
                record("t2", "/t2/b.txt", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query(&[1.0, 0.0], 10, &ChunkFilter::target("t2"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.target_id, "t2");

        let by_path = ChunkFilter {
            target_path: Some("/t1".to_string()),
            ..Default::default()
        };
        assert_eq!(store.delete(&by_path).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(store.delete(&ChunkFilter::default()).await.is_err());
    }
}
