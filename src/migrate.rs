use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Watch targets; `seq` gives the stable registration order.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watch_targets (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            recursive INTEGER NOT NULL DEFAULT 1,
            file_types_json TEXT NOT NULL DEFAULT '[]',
            tags_json TEXT NOT NULL DEFAULT '[]',
            enabled INTEGER NOT NULL DEFAULT 1,
            reindex_on_change INTEGER NOT NULL DEFAULT 1,
            last_indexed_at INTEGER,
            next_scheduled_at INTEGER,
            file_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Single row per target: the latest attempt
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexing_runs (
            target_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            percentage INTEGER NOT NULL DEFAULT 0,
            processed_files INTEGER NOT NULL DEFAULT 0,
            total_files INTEGER NOT NULL DEFAULT 0,
            files_failed INTEGER NOT NULL DEFAULT 0,
            chunks_stored INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            FOREIGN KEY (target_id) REFERENCES watch_targets(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedule_config (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            window_start TEXT NOT NULL,
            window_end TEXT NOT NULL,
            idle_only INTEGER NOT NULL,
            cpu_threshold REAL NOT NULL,
            ram_threshold REAL NOT NULL,
            enabled INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Default vector store backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            target_path TEXT NOT NULL,
            source_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            total_chunks INTEGER NOT NULL,
            text TEXT NOT NULL,
            tags_json TEXT NOT NULL DEFAULT '[]',
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_vectors_target ON chunk_vectors(target_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_target_path ON chunk_vectors(target_path)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_source ON chunk_vectors(source_path)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_indexing_runs_status ON indexing_runs(status)")
        .execute(pool)
        .await?;

    Ok(())
}
