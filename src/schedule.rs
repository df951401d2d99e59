//! Persisted schedule configuration.
//!
//! The catalog holds a single `schedule_config` row. On first start it is
//! seeded from the `[schedule]` section of the config file; afterwards the
//! row wins. [`ScheduleHandle`] keeps an in-memory copy that the scheduler
//! snapshots at the top of every cycle, so an update takes effect on the
//! next cycle and never mid-run.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::db::to_millis;
use crate::error::{IndexError, Result};
use crate::models::{ScheduleConfig, ScheduleConfigUpdate};
use crate::window::validate_time_of_day;

#[derive(Clone)]
pub struct ScheduleHandle {
    pool: SqlitePool,
    current: Arc<RwLock<ScheduleConfig>>,
}

impl ScheduleHandle {
    /// Load the stored schedule, writing `seed` first if none exists.
    pub async fn load_or_seed(pool: SqlitePool, seed: ScheduleConfig) -> Result<Self> {
        let row = sqlx::query(
            r#"
            SELECT window_start, window_end, idle_only, cpu_threshold, ram_threshold, enabled
            FROM schedule_config WHERE id = 1
            "#,
        )
        .fetch_optional(&pool)
        .await?;

        let config = match row {
            Some(r) => {
                let cpu: f64 = r.try_get("cpu_threshold")?;
                let ram: f64 = r.try_get("ram_threshold")?;
                ScheduleConfig {
                    window_start: r.try_get("window_start")?,
                    window_end: r.try_get("window_end")?,
                    idle_only: r.try_get("idle_only")?,
                    cpu_threshold: cpu as f32,
                    ram_threshold: ram as f32,
                    enabled: r.try_get("enabled")?,
                }
            }
            None => {
                persist(&pool, &seed).await?;
                seed
            }
        };

        Ok(Self {
            pool,
            current: Arc::new(RwLock::new(config)),
        })
    }

    /// A copy of the schedule as of now.
    pub async fn snapshot(&self) -> ScheduleConfig {
        self.current.read().await.clone()
    }

    /// Validate and apply a partial update. Nothing is written if any field
    /// is invalid.
    pub async fn update(&self, update: ScheduleConfigUpdate) -> Result<ScheduleConfig> {
        let mut guard = self.current.write().await;
        let mut next = guard.clone();

        if let Some(start) = update.window_start {
            validate_time_of_day(&start)?;
            next.window_start = start.trim().to_string();
        }
        if let Some(end) = update.window_end {
            validate_time_of_day(&end)?;
            next.window_end = end.trim().to_string();
        }
        if let Some(cpu) = update.cpu_threshold {
            next.cpu_threshold = check_threshold("cpu_threshold", cpu)?;
        }
        if let Some(ram) = update.ram_threshold {
            next.ram_threshold = check_threshold("ram_threshold", ram)?;
        }
        if let Some(idle_only) = update.idle_only {
            next.idle_only = idle_only;
        }
        if let Some(enabled) = update.enabled {
            next.enabled = enabled;
        }

        persist(&self.pool, &next).await?;
        *guard = next.clone();
        info!(
            window_start = %next.window_start,
            window_end = %next.window_end,
            idle_only = next.idle_only,
            enabled = next.enabled,
            "schedule updated"
        );
        Ok(next)
    }

    /// Pause or resume background indexing.
    pub async fn set_enabled(&self, enabled: bool) -> Result<ScheduleConfig> {
        self.update(ScheduleConfigUpdate {
            enabled: Some(enabled),
            ..Default::default()
        })
        .await
    }
}

fn check_threshold(name: &str, value: f32) -> Result<f32> {
    if !(0.0..=100.0).contains(&value) {
        return Err(IndexError::InvalidConfig(format!(
            "{} must be in [0, 100], got {}",
            name, value
        )));
    }
    Ok(value)
}

async fn persist(pool: &SqlitePool, config: &ScheduleConfig) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO schedule_config (id, window_start, window_end, idle_only, cpu_threshold,
                                     ram_threshold, enabled, updated_at)
        VALUES (1, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            window_start = excluded.window_start,
            window_end = excluded.window_end,
            idle_only = excluded.idle_only,
            cpu_threshold = excluded.cpu_threshold,
            ram_threshold = excluded.ram_threshold,
            enabled = excluded.enabled,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&config.window_start)
    .bind(&config.window_end)
    .bind(config.idle_only)
    .bind(config.cpu_threshold as f64)
    .bind(config.ram_threshold as f64)
    .bind(config.enabled)
    .bind(to_millis(Utc::now()))
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleSettings;
    use crate::{db, migrate};

    async fn pool(dir: &tempfile::TempDir) -> SqlitePool {
        let pool = db::connect_path(&dir.path().join("dex.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_seed_then_stored_row_wins() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = pool(&tmp).await;

        let handle = ScheduleHandle::load_or_seed(pool.clone(), ScheduleSettings::default().seed())
            .await
            .unwrap();
        handle
            .update(ScheduleConfigUpdate {
                window_start: Some("01:30".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        // A different seed on restart is ignored.
        let mut other = ScheduleSettings::default().seed();
        other.window_start = "12:00".to_string();
        let reloaded = ScheduleHandle::load_or_seed(pool, other).await.unwrap();
        assert_eq!(reloaded.snapshot().await.window_start, "01:30");
    }

    #[tokio::test]
    async fn test_invalid_update_changes_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let handle = ScheduleHandle::load_or_seed(pool(&tmp).await, ScheduleSettings::default().seed())
            .await
            .unwrap();
        let before = handle.snapshot().await;

        let err = handle
            .update(ScheduleConfigUpdate {
                window_start: Some("02:00".to_string()),
                cpu_threshold: Some(140.0),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidConfig(_)));
        assert_eq!(handle.snapshot().await, before);

        assert!(handle
            .update(ScheduleConfigUpdate {
                window_end: Some("7am".to_string()),
                ..Default::default()
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let tmp = tempfile::TempDir::new().unwrap();
        let handle = ScheduleHandle::load_or_seed(pool(&tmp).await, ScheduleSettings::default().seed())
            .await
            .unwrap();
        assert!(!handle.set_enabled(false).await.unwrap().enabled);
        assert!(!handle.snapshot().await.enabled);
        assert!(handle.set_enabled(true).await.unwrap().enabled);
    }
}
