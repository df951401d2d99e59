//! Application context.
//!
//! [`AppContext`] is built once at startup and owns every long-lived
//! component: the catalog pool, the target registry, the run catalog, the
//! shared schedule, the collaborators a run talks to, and the scheduler.
//! The CLI and the HTTP server both drive the system through its methods.
//!
//! [`AppContext::recover_interrupted`] is the startup recovery step: runs
//! left `pending` or `indexing` by a previous process are closed as errors.
//! Nothing is re-queued explicitly; the change detector picks the targets
//! up again.

use chrono::{Local, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chunk::TextSplitter;
use crate::config::{self, Config};
use crate::discover::FileFilter;
use crate::embedding::create_embedder;
use crate::error::{IndexError, Result};
use crate::extract::FileExtractor;
use crate::models::{
    IndexingRun, NewWatchTarget, RunReport, ScheduleConfig, ScheduleConfigUpdate, SystemStatus,
    WatchTarget, WatchTargetUpdate,
};
use crate::pipeline::{Collaborators, Indexer, Pacing};
use crate::probe::{is_idle, SysinfoProbe};
use crate::registry::TargetRegistry;
use crate::runs::{RunCatalog, INTERRUPTED_MESSAGE};
use crate::schedule::ScheduleHandle;
use crate::scheduler::{RunGuard, Scheduler};
use crate::search::{self, SearchHit};
use crate::stats::{self, IndexStats};
use crate::vector_store::{ChunkFilter, SqliteVectorStore, VectorStore};
use crate::window::window_open;
use crate::{db, migrate};

pub const CLEARED_MESSAGE: &str = "cleared by operator";

/// Schedule settings together with what they mean right now.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    #[serde(flatten)]
    pub config: ScheduleConfig,
    pub window: String,
    pub scheduler_running: bool,
    /// `None` when the load probe failed.
    pub system: Option<SystemStatus>,
    pub may_run_now: bool,
}

pub struct AppContext {
    config: Config,
    pool: SqlitePool,
    registry: Arc<TargetRegistry>,
    runs: RunCatalog,
    schedule: ScheduleHandle,
    parts: Collaborators,
    scheduler: Scheduler,
}

impl AppContext {
    /// Open the catalog and wire the default collaborators.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        // Disk usage is reported for the volume holding the catalog.
        let probe = match config.db.path.parent().map(std::fs::canonicalize) {
            Some(Ok(data_dir)) => SysinfoProbe::with_disk_mount(data_dir),
            _ => SysinfoProbe::new(),
        };
        let parts = Collaborators {
            extractor: Arc::new(FileExtractor::new(&config.indexing.supported_extensions)),
            embedder: create_embedder(&config.embedding)?,
            store: Arc::new(SqliteVectorStore::new(pool.clone())),
            probe: Arc::new(probe),
        };
        Self::with_components(config, pool, parts).await
    }

    /// Build a context around an existing pool and collaborators.
    pub async fn with_components(config: Config, pool: SqlitePool, parts: Collaborators) -> Result<Self> {
        config::validate(&config).map_err(|e| IndexError::InvalidConfig(format!("{:#}", e)))?;
        migrate::run_migrations(&pool).await?;

        let runs = RunCatalog::new(pool.clone());
        let schedule = ScheduleHandle::load_or_seed(pool.clone(), config.schedule.seed()).await?;
        let extractor = Arc::clone(&parts.extractor);
        let filter = Arc::new(
            FileFilter::new(&config.indexing)?.restrict(|ext| extractor.supports(ext)),
        );
        let registry = Arc::new(TargetRegistry::new(
            pool.clone(),
            &config.indexing.default_file_types,
        ));
        let indexer = Arc::new(Indexer::new(
            runs.clone(),
            Arc::clone(&filter),
            TextSplitter::from_config(&config.chunking),
            schedule.clone(),
            Pacing::from_settings(&config.schedule),
            parts.clone(),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&registry),
            runs.clone(),
            indexer,
            schedule.clone(),
            Arc::clone(&parts.probe),
            filter,
            Duration::from_secs(config.schedule.poll_interval_secs),
        );

        Ok(Self {
            config,
            pool,
            registry,
            runs,
            schedule,
            parts,
            scheduler,
        })
    }

    /// Close runs a previous process left `pending` or `indexing`.
    ///
    /// Only the process that owns the scheduler may call this; a second
    /// process sharing the catalog would otherwise fail live runs.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let recovered = self
            .runs
            .fail_in_progress(INTERRUPTED_MESSAGE, Utc::now())
            .await?;
        if recovered > 0 {
            warn!(runs = recovered, "closed runs interrupted by a previous shutdown");
        }
        Ok(recovered)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ---- targets ----

    pub async fn add_target(&self, new: NewWatchTarget) -> Result<WatchTarget> {
        self.registry.create(new).await
    }

    pub async fn list_targets(&self) -> Result<Vec<WatchTarget>> {
        self.registry.list().await
    }

    pub async fn get_target(&self, id: &str) -> Result<WatchTarget> {
        self.registry.get(id).await
    }

    /// Apply a partial update. Moving a target to a new path drops the
    /// chunks indexed under the old one.
    pub async fn update_target(&self, id: &str, update: WatchTargetUpdate) -> Result<WatchTarget> {
        if update.is_empty() {
            return Err(IndexError::InvalidInput("no fields to update".to_string()));
        }
        let _guard = self.lock_idle(id).await?;
        let before = self.registry.get(id).await?;
        let after = self.registry.update(id, update).await?;

        if after.path != before.path {
            let removed = self
                .parts
                .store
                .delete(&ChunkFilter {
                    target_path: Some(before.path_str()),
                    ..Default::default()
                })
                .await?;
            info!(id = %id, chunks = removed, "target moved, old chunks removed");
        }
        Ok(after)
    }

    /// Unregister a target, dropping its run record and every chunk indexed
    /// under its path.
    pub async fn remove_target(&self, id: &str) -> Result<WatchTarget> {
        let _guard = self.lock_idle(id).await?;
        let target = self.registry.get(id).await?;
        let removed = self
            .parts
            .store
            .delete(&ChunkFilter {
                target_path: Some(target.path_str()),
                ..Default::default()
            })
            .await?;
        let target = self.registry.delete(id).await?;
        info!(id = %id, chunks = removed, "target removed");
        Ok(target)
    }

    // ---- runs ----

    /// Start a background run and return its `pending` record.
    pub async fn trigger_index(&self, id: &str) -> Result<RunReport> {
        self.scheduler.trigger(id).await?;
        self.run_status(id).await
    }

    /// Run the pipeline for `id` and wait for the terminal record.
    pub async fn index_now(&self, id: &str) -> Result<IndexingRun> {
        self.scheduler.index_now(id).await
    }

    pub async fn run_status(&self, id: &str) -> Result<RunReport> {
        let target = self.registry.get(id).await?;
        Ok(match self.runs.get(&target.id).await? {
            Some(run) => run.into(),
            None => RunReport::not_started(&target.id),
        })
    }

    /// Close a run orphaned in `pending` or `indexing`.
    ///
    /// Refused while this process runs the target. A row held by another
    /// process cannot be told apart from an orphan and is cleared.
    pub async fn clear_run(&self, id: &str) -> Result<RunReport> {
        let _guard = self.lock(id)?;
        let target = self.registry.get(id).await?;
        if self
            .runs
            .clear(&target.id, CLEARED_MESSAGE, Utc::now())
            .await?
        {
            info!(id = %id, "cleared orphaned run");
        } else {
            return Err(IndexError::InvalidInput(format!(
                "target {} has no unfinished run",
                id
            )));
        }
        self.run_status(id).await
    }

    // ---- schedule ----

    pub async fn get_schedule(&self) -> ScheduleConfig {
        self.schedule.snapshot().await
    }

    pub async fn update_schedule(&self, update: ScheduleConfigUpdate) -> Result<ScheduleConfig> {
        self.schedule.update(update).await
    }

    pub async fn pause(&self) -> Result<ScheduleConfig> {
        self.schedule.set_enabled(false).await
    }

    pub async fn resume(&self) -> Result<ScheduleConfig> {
        self.schedule.set_enabled(true).await
    }

    pub async fn system_status(&self) -> Result<SystemStatus> {
        let config = self.schedule.snapshot().await;
        let sample = self.parts.probe.sample().await?;
        let is_idle = is_idle(
            sample.cpu_percent,
            sample.ram_percent,
            config.cpu_threshold,
            config.ram_threshold,
        );
        Ok(SystemStatus { sample, is_idle })
    }

    pub async fn schedule_status(&self) -> ScheduleStatus {
        let config = self.schedule.snapshot().await;
        let system = match self.system_status().await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(error = %e, "load sample failed");
                None
            }
        };
        let idle = system.as_ref().is_some_and(|s| s.is_idle);
        let may_run_now =
            window_open(&config, Local::now().time()) && (!config.idle_only || idle);

        ScheduleStatus {
            window: format!("{}-{}", config.window_start, config.window_end),
            scheduler_running: self.scheduler.is_running().await,
            system,
            may_run_now,
            config,
        }
    }

    /// One scheduler cycle in the background, gated like the polling loop.
    pub fn run_cycle(&self) {
        self.scheduler.spawn_cycle();
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        stats::gather(&self.pool, &self.runs, self.parts.store.as_ref()).await
    }

    // ---- search ----

    pub async fn search(&self, query: &str, limit: usize, filter: &ChunkFilter) -> Result<Vec<SearchHit>> {
        search::search(
            self.parts.embedder.as_ref(),
            self.parts.store.as_ref(),
            query,
            limit,
            filter,
        )
        .await
    }

    // ---- lifecycle ----

    pub async fn start_scheduler(&self) -> bool {
        self.scheduler.start().await
    }

    pub async fn stop_scheduler(&self) {
        self.scheduler.stop().await
    }

    /// Stop the scheduler, wait for in-flight runs, and close the pool.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.pool.close().await;
    }

    /// Hold the target's run lock for an administrative change.
    fn lock(&self, id: &str) -> Result<RunGuard> {
        self.scheduler
            .locks()
            .try_acquire(id)
            .ok_or_else(|| IndexError::AlreadyRunning(id.to_string()))
    }

    /// Like [`Self::lock`], but also refuse while the catalog shows an
    /// unfinished run, which may belong to another process.
    async fn lock_idle(&self, id: &str) -> Result<RunGuard> {
        let guard = self.lock(id)?;
        if let Some(run) = self.runs.get(id).await? {
            if !run.status.is_terminal() {
                return Err(IndexError::AlreadyRunning(id.to_string()));
            }
        }
        Ok(guard)
    }
}
