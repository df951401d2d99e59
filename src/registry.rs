//! Watch target registry.
//!
//! Stores the set of watched files and folders in the `watch_targets` table.
//! Paths are canonicalised on registration and kept unique; the UNIQUE
//! constraint on `path` backs the duplicate check so that two concurrent
//! registrations of the same path cannot both succeed. Targets may not nest
//! either: chunk ids are derived from file paths, so a file reachable from
//! two targets would have its chunks overwritten by whichever ran last.
//!
//! Deleting a target cascades to its `indexing_runs` row. Chunks held by the
//! vector store are removed by the caller ([`crate::context::AppContext::remove_target`]),
//! since the registry does not own the store.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::db::{from_millis, to_millis};
use crate::error::{IndexError, Result};
use crate::models::{NewWatchTarget, TargetKind, WatchTarget, WatchTargetUpdate};

const SELECT_COLUMNS: &str = "id, path, name, kind, recursive, file_types_json, tags_json, \
     enabled, reindex_on_change, last_indexed_at, next_scheduled_at, file_count, created_at";

pub struct TargetRegistry {
    pool: SqlitePool,
    default_file_types: Vec<String>,
}

impl TargetRegistry {
    pub fn new(pool: SqlitePool, default_file_types: &[String]) -> Self {
        Self {
            pool,
            default_file_types: normalize_extensions(default_file_types),
        }
    }

    /// Register a new target.
    ///
    /// Fails with [`IndexError::PathNotFound`] if the path does not exist,
    /// with [`IndexError::DuplicatePath`] if it is already registered and
    /// with [`IndexError::OverlappingPath`] if it nests with another target.
    pub async fn create(&self, new: NewWatchTarget) -> Result<WatchTarget> {
        let path = resolve_path(&new.path, new.kind)?;
        let path_str = path.display().to_string();

        if self.find_by_path(&path_str).await?.is_some() {
            return Err(IndexError::DuplicatePath(path_str));
        }
        self.ensure_disjoint(&path, None).await?;

        let now = Utc::now();
        let target = WatchTarget {
            id: Uuid::new_v4().to_string(),
            name: new
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| default_name(&path)),
            kind: new.kind,
            recursive: new.recursive.unwrap_or(true),
            file_types: new
                .file_types
                .map(|f| normalize_extensions(&f))
                .unwrap_or_else(|| self.default_file_types.clone()),
            tags: new.tags,
            enabled: new.enabled.unwrap_or(true),
            reindex_on_change: new.reindex_on_change.unwrap_or(true),
            last_indexed_at: None,
            next_scheduled_at: None,
            file_count: 0,
            created_at: now,
            path,
        };

        sqlx::query(
            r#"
            INSERT INTO watch_targets (id, path, name, kind, recursive, file_types_json, tags_json,
                                       enabled, reindex_on_change, file_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&target.id)
        .bind(&path_str)
        .bind(&target.name)
        .bind(target.kind.as_str())
        .bind(target.recursive)
        .bind(serde_json::to_string(&target.file_types)?)
        .bind(serde_json::to_string(&target.tags)?)
        .bind(target.enabled)
        .bind(target.reindex_on_change)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, &path_str))?;

        info!(id = %target.id, path = %path_str, kind = target.kind.as_str(), "registered watch target");
        Ok(target)
    }

    pub async fn get(&self, id: &str) -> Result<WatchTarget> {
        self.find(id)
            .await?
            .ok_or_else(|| IndexError::NotFound(id.to_string()))
    }

    pub async fn find(&self, id: &str) -> Result<Option<WatchTarget>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM watch_targets WHERE id = ?",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_target(&r)).transpose()
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<WatchTarget>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM watch_targets WHERE path = ?",
            SELECT_COLUMNS
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_target(&r)).transpose()
    }

    /// Reject `path` if it lies inside another target or contains one.
    async fn ensure_disjoint(&self, path: &Path, except_id: Option<&str>) -> Result<()> {
        for other in self.list().await? {
            if Some(other.id.as_str()) == except_id {
                continue;
            }
            if path.starts_with(&other.path) || other.path.starts_with(path) {
                return Err(IndexError::OverlappingPath {
                    path: path.display().to_string(),
                    existing: other.path_str(),
                });
            }
        }
        Ok(())
    }

    /// All targets in registration order.
    pub async fn list(&self) -> Result<Vec<WatchTarget>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM watch_targets ORDER BY seq ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_target).collect()
    }

    /// Enabled targets in registration order.
    pub async fn list_enabled(&self) -> Result<Vec<WatchTarget>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM watch_targets WHERE enabled = 1 ORDER BY seq ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_target).collect()
    }

    /// Apply a partial update. The whole update is validated before anything
    /// is written; a path change is re-resolved and checked for collisions.
    pub async fn update(&self, id: &str, update: WatchTargetUpdate) -> Result<WatchTarget> {
        let mut target = self.get(id).await?;

        if let Some(path) = update.path {
            let resolved = resolve_path(&path, target.kind)?;
            if resolved != target.path {
                let resolved_str = resolved.display().to_string();
                if let Some(other) = self.find_by_path(&resolved_str).await? {
                    if other.id != target.id {
                        return Err(IndexError::DuplicatePath(resolved_str));
                    }
                }
                self.ensure_disjoint(&resolved, Some(&target.id)).await?;
                target.path = resolved;
                // Forget the old bookkeeping so the new path is picked up.
                target.last_indexed_at = None;
                target.next_scheduled_at = None;
                target.file_count = 0;
            }
        }
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(IndexError::InvalidInput("name must not be empty".to_string()));
            }
            target.name = name;
        }
        if let Some(recursive) = update.recursive {
            target.recursive = recursive;
        }
        if let Some(file_types) = update.file_types {
            target.file_types = normalize_extensions(&file_types);
        }
        if let Some(tags) = update.tags {
            target.tags = tags;
        }
        if let Some(enabled) = update.enabled {
            target.enabled = enabled;
        }
        if let Some(reindex) = update.reindex_on_change {
            target.reindex_on_change = reindex;
        }

        let path_str = target.path_str();
        let result = sqlx::query(
            r#"
            UPDATE watch_targets SET
                path = ?, name = ?, recursive = ?, file_types_json = ?, tags_json = ?,
                enabled = ?, reindex_on_change = ?, last_indexed_at = ?, next_scheduled_at = ?,
                file_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&path_str)
        .bind(&target.name)
        .bind(target.recursive)
        .bind(serde_json::to_string(&target.file_types)?)
        .bind(serde_json::to_string(&target.tags)?)
        .bind(target.enabled)
        .bind(target.reindex_on_change)
        .bind(target.last_indexed_at.map(to_millis))
        .bind(target.next_scheduled_at.map(to_millis))
        .bind(target.file_count as i64)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, &path_str))?;

        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(id.to_string()));
        }
        Ok(target)
    }

    /// Remove a target and its run record.
    pub async fn delete(&self, id: &str) -> Result<WatchTarget> {
        let target = self.get(id).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM indexing_runs WHERE target_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM watch_targets WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(id = %id, path = %target.path.display(), "removed watch target");
        Ok(target)
    }

    /// Scheduling bookkeeping written after a successful run.
    pub async fn record_success(
        &self,
        id: &str,
        last_indexed_at: DateTime<Utc>,
        next_scheduled_at: Option<DateTime<Utc>>,
        file_count: u64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE watch_targets SET
                last_indexed_at = ?, next_scheduled_at = ?, file_count = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(to_millis(last_indexed_at))
        .bind(next_scheduled_at.map(to_millis))
        .bind(file_count as i64)
        .bind(to_millis(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(IndexError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

/// Canonicalise a registration path and check it matches the declared kind.
fn resolve_path(path: &Path, kind: TargetKind) -> Result<PathBuf> {
    let resolved = std::fs::canonicalize(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => IndexError::PathNotFound(path.display().to_string()),
        _ => IndexError::Io(e),
    })?;

    let matches_kind = match kind {
        TargetKind::File => resolved.is_file(),
        TargetKind::Folder => resolved.is_dir(),
    };
    if !matches_kind {
        return Err(IndexError::InvalidInput(format!(
            "{} is not a {}",
            resolved.display(),
            kind.as_str()
        )));
    }
    Ok(resolved)
}

fn default_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Lowercase, dot-prefixed, deduplicated extensions.
pub fn normalize_extensions(exts: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(exts.len());
    for ext in exts {
        let trimmed = ext.trim().trim_start_matches('*').to_lowercase();
        if trimmed.is_empty() || trimmed == "." {
            continue;
        }
        let normalized = if trimmed.starts_with('.') {
            trimmed
        } else {
            format!(".{}", trimmed)
        };
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    out
}

fn duplicate_or(err: sqlx::Error, path: &str) -> IndexError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return IndexError::DuplicatePath(path.to_string());
        }
    }
    IndexError::Database(err)
}

fn row_to_target(row: &SqliteRow) -> Result<WatchTarget> {
    let kind: String = row.try_get("kind")?;
    let file_types: String = row.try_get("file_types_json")?;
    let tags: String = row.try_get("tags_json")?;
    let path: String = row.try_get("path")?;
    let last_indexed_at: Option<i64> = row.try_get("last_indexed_at")?;
    let next_scheduled_at: Option<i64> = row.try_get("next_scheduled_at")?;
    let file_count: i64 = row.try_get("file_count")?;
    let created_at: i64 = row.try_get("created_at")?;

    Ok(WatchTarget {
        id: row.try_get("id")?,
        path: PathBuf::from(path),
        name: row.try_get("name")?,
        kind: kind.parse()?,
        recursive: row.try_get("recursive")?,
        file_types: serde_json::from_str(&file_types)?,
        tags: serde_json::from_str(&tags)?,
        enabled: row.try_get("enabled")?,
        reindex_on_change: row.try_get("reindex_on_change")?,
        last_indexed_at: last_indexed_at.map(from_millis),
        next_scheduled_at: next_scheduled_at.map(from_millis),
        file_count: file_count.max(0) as u64,
        created_at: from_millis(created_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_extensions() {
        let input = vec![
            "PDF".to_string(),
            ".Txt".to_string(),
            "*.md".to_string(),
            " ".to_string(),
            ".pdf".to_string(),
        ];
        assert_eq!(normalize_extensions(&input), vec![".pdf", ".txt", ".md"]);
    }

    #[test]
    fn test_resolve_missing_path() {
        let err = resolve_path(Path::new("/definitely/not/here"), TargetKind::Folder).unwrap_err();
        assert!(matches!(err, IndexError::PathNotFound(_)));
    }

    async fn registry(dir: &tempfile::TempDir) -> TargetRegistry {
        let pool = crate::db::connect_path(&dir.path().join("dex.sqlite")).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        TargetRegistry::new(pool, &[])
    }

    #[tokio::test]
    async fn test_nested_targets_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = registry(&tmp).await;
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(docs.join("inner")).unwrap();
        std::fs::write(docs.join("a.txt"), "alpha").unwrap();
        let sibling = tmp.path().join("docs-old");
        std::fs::create_dir_all(&sibling).unwrap();

        let parent = registry.create(NewWatchTarget::folder(&docs)).await.unwrap();

        let inner = registry.create(NewWatchTarget::folder(docs.join("inner"))).await;
        assert!(matches!(inner, Err(IndexError::OverlappingPath { .. })));
        let file = registry.create(NewWatchTarget::file(docs.join("a.txt"))).await;
        assert!(matches!(file, Err(IndexError::OverlappingPath { .. })));
        let outer = registry.create(NewWatchTarget::folder(tmp.path())).await;
        assert!(matches!(outer, Err(IndexError::OverlappingPath { .. })));

        // A name prefix is not containment.
        let other = registry.create(NewWatchTarget::folder(&sibling)).await.unwrap();
        let moved = registry
            .update(
                &other.id,
                WatchTargetUpdate {
                    path: Some(docs.join("inner")),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(moved, Err(IndexError::OverlappingPath { .. })));

        // Updating a target in place does not collide with itself.
        registry
            .update(
                &parent.id,
                WatchTargetUpdate {
                    path: Some(docs.clone()),
                    name: Some("docs".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[test]
    fn test_resolve_kind_mismatch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = resolve_path(tmp.path(), TargetKind::File).unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));
    }
}
