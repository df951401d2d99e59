//! Fakes and fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use dex_indexer::config::Config;
use dex_indexer::context::AppContext;
use dex_indexer::db;
use dex_indexer::embedding::Embedder;
use dex_indexer::error::{IndexError, Result};
use dex_indexer::extract::TextExtractor;
use dex_indexer::models::{RunReport, ReportedStatus, ScheduleConfigUpdate, SystemSample};
use dex_indexer::pipeline::Collaborators;
use dex_indexer::probe::LoadProbe;
use dex_indexer::vector_store::InMemoryVectorStore;

/// Reads `.txt` files; a file whose text starts with `BROKEN` fails.
pub struct FakeExtractor;

#[async_trait]
impl TextExtractor for FakeExtractor {
    fn supports(&self, extension: &str) -> bool {
        extension == ".txt"
    }

    async fn extract(&self, path: &Path) -> Result<String> {
        let text = tokio::fs::read_to_string(path).await?;
        if text.starts_with("BROKEN") {
            return Err(IndexError::ExtractionFailed {
                path: path.display().to_string(),
                reason: "corrupt test file".to_string(),
            });
        }
        Ok(text)
    }
}

/// Deterministic 3-d vectors. When built with [`FakeEmbedder::gated`], every
/// call waits for a permit first.
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }

    fn dims(&self) -> usize {
        3
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| IndexError::ProviderUnavailable(e.to_string()))?;
            permit.forget();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| vec![t.len() as f32, 1.0, 0.5])
            .collect())
    }
}

/// Reports 5% load, or 95% while `busy` is set. Counts its samples.
#[derive(Default)]
pub struct FakeProbe {
    pub busy: AtomicBool,
    pub samples: AtomicUsize,
}

#[async_trait]
impl LoadProbe for FakeProbe {
    async fn sample(&self) -> Result<SystemSample> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        let load = if self.busy.load(Ordering::SeqCst) { 95.0 } else { 5.0 };
        Ok(SystemSample {
            cpu_percent: load,
            ram_percent: load,
            disk_percent: 40.0,
            timestamp: Utc::now(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub ctx: AppContext,
    pub store: Arc<InMemoryVectorStore>,
    pub embedder: Arc<FakeEmbedder>,
    pub probe: Arc<FakeProbe>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(FakeEmbedder::new(), |_| {}).await
    }

    pub async fn build(embedder: FakeEmbedder, tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_db_path(dir.path().join("data/dex.sqlite"));
        config.schedule.busy_backoff_secs = 0;
        config.schedule.max_busy_waits = 1;
        tweak(&mut config);

        let store = Arc::new(InMemoryVectorStore::new());
        let embedder = Arc::new(embedder);
        let probe = Arc::new(FakeProbe::default());
        let pool = db::connect(&config).await.unwrap();
        let parts = Collaborators {
            extractor: Arc::new(FakeExtractor),
            embedder: embedder.clone(),
            store: store.clone(),
            probe: probe.clone(),
        };
        let ctx = AppContext::with_components(config, pool, parts).await.unwrap();

        Self {
            dir,
            ctx,
            store,
            embedder,
            probe,
        }
    }

    /// A second context on the same catalog file, as another process
    /// would open it.
    pub async fn second_context(&self) -> AppContext {
        let config = self.ctx.config().clone();
        let pool = db::connect(&config).await.unwrap();
        let parts = Collaborators {
            extractor: Arc::new(FakeExtractor),
            embedder: Arc::new(FakeEmbedder::new()),
            store: Arc::new(InMemoryVectorStore::new()),
            probe: Arc::new(FakeProbe::default()),
        };
        AppContext::with_components(config, pool, parts).await.unwrap()
    }

    /// Create `rel` under the temp dir with `content`, returning its path.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn folder(&self, rel: &str) -> PathBuf {
        let path = self.dir.path().join(rel);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    /// Open the window for the next hour around now.
    pub async fn open_window(&self, idle_only: bool) {
        let now = Local::now();
        let start = (now - ChronoDuration::hours(1)).format("%H:%M").to_string();
        let end = (now + ChronoDuration::hours(1)).format("%H:%M").to_string();
        self.ctx
            .update_schedule(ScheduleConfigUpdate {
                window_start: Some(start),
                window_end: Some(end),
                idle_only: Some(idle_only),
                enabled: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    /// Poll until the target's run reaches a terminal state.
    pub async fn wait_terminal(&self, id: &str) -> RunReport {
        for _ in 0..500 {
            let report = self.ctx.run_status(id).await.unwrap();
            if matches!(report.status, ReportedStatus::Completed | ReportedStatus::Error) {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run for {} did not finish", id);
    }

    /// Poll until the target's run is recorded as `indexing`.
    pub async fn wait_indexing(&self, id: &str) -> RunReport {
        for _ in 0..500 {
            let report = self.ctx.run_status(id).await.unwrap();
            if report.status == ReportedStatus::Indexing {
                return report;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run for {} never started", id);
    }

    /// Poll until this process no longer holds the target's run lock.
    pub async fn wait_unlocked(&self, id: &str) {
        for _ in 0..500 {
            if !self.ctx.scheduler().locks().is_locked(id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lock for {} was never released", id);
    }
}

/// Chunk id the pipeline assigns to `file`'s chunk `index`.
pub fn chunk_id_of(file: &Path, index: usize) -> String {
    format!("{}#{}", std::fs::canonicalize(file).unwrap().display(), index)
}

/// Push `path`'s modification time a minute into the future.
pub fn touch_future(path: &Path) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(std::time::SystemTime::now() + Duration::from_secs(60))
        .unwrap();
}
