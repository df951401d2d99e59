//! Incremental indexing pipeline.
//!
//! [`Indexer::run`] brings one watch target's chunks up to date and records
//! the attempt in the run catalog. The run moves `indexing → completed` or
//! `indexing → error`; the terminal write is its last act.
//!
//! ```text
//! enumerate ──▶ for each file: extract ─▶ split ─▶ embed ─▶ replace chunks
//!                     │                                         │
//!                     └── error: warn, count as failed ◀────────┘
//!                     save progress after every file
//! ```
//!
//! Files are processed one at a time. A failing file never fails the run;
//! only enumeration, catalog writes and cancellation do. During scheduled
//! runs with `idle_only`, the pipeline pauses between files while the
//! machine is busy instead of aborting.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chunk::{chunk_id, TextSplitter};
use crate::config::ScheduleSettings;
use crate::discover::FileFilter;
use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::extract::TextExtractor;
use crate::models::{IndexingRun, WatchTarget};
use crate::probe::{is_idle, LoadProbe};
use crate::runs::RunCatalog;
use crate::schedule::ScheduleHandle;
use crate::vector_store::{ChunkFilter, ChunkMetadata, ChunkRecord, VectorStore};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// Chosen by the scheduler loop inside the idle window.
    Scheduled,
    /// Requested by a caller; not window-gated and not paced.
    Manual,
}

/// Pause policy between files while the machine is busy.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    pub busy_backoff: Duration,
    pub max_busy_waits: u32,
}

impl Pacing {
    pub fn from_settings(settings: &ScheduleSettings) -> Self {
        Self {
            busy_backoff: Duration::from_secs(settings.busy_backoff_secs),
            max_busy_waits: settings.max_busy_waits,
        }
    }
}

/// The collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub probe: Arc<dyn LoadProbe>,
}

pub struct Indexer {
    runs: RunCatalog,
    filter: Arc<FileFilter>,
    splitter: TextSplitter,
    schedule: ScheduleHandle,
    pacing: Pacing,
    parts: Collaborators,
}

impl Indexer {
    pub fn new(
        runs: RunCatalog,
        filter: Arc<FileFilter>,
        splitter: TextSplitter,
        schedule: ScheduleHandle,
        pacing: Pacing,
        parts: Collaborators,
    ) -> Self {
        Self {
            runs,
            filter,
            splitter,
            schedule,
            pacing,
            parts,
        }
    }

    /// Index `target` and return the terminal run.
    ///
    /// Returns `Err` only when the catalog cannot record the run at all;
    /// every other failure is reported through the run's `error` status.
    pub async fn run(
        &self,
        target: &WatchTarget,
        trigger: RunTrigger,
        cancel: &CancellationToken,
    ) -> Result<IndexingRun> {
        let mut run = IndexingRun::begin(&target.id, Utc::now());
        self.runs.save(&run).await?;
        info!(target = %target.id, path = %target.path.display(), ?trigger, "indexing started");

        match self.process(target, trigger, cancel, &mut run).await {
            Ok(()) => {
                run.complete(Utc::now());
                info!(
                    target = %target.id,
                    files = run.total_files,
                    failed = run.files_failed,
                    chunks = run.chunks_stored,
                    "indexing completed"
                );
            }
            Err(e) => {
                error!(target = %target.id, error = %e, "indexing failed");
                run.fail(e.to_string(), Utc::now());
            }
        }

        self.runs.save(&run).await?;
        Ok(run)
    }

    async fn process(
        &self,
        target: &WatchTarget,
        trigger: RunTrigger,
        cancel: &CancellationToken,
        run: &mut IndexingRun,
    ) -> Result<()> {
        let filter = self.filter.clone();
        let walk_target = target.clone();
        let candidates = tokio::task::spawn_blocking(move || filter.enumerate(&walk_target))
            .await
            .map_err(|e| IndexError::Io(std::io::Error::other(e)))??;

        if candidates.is_empty() {
            debug!(target = %target.id, "no candidate files");
            return Ok(());
        }

        run.set_total(candidates.len() as u64);
        self.runs.save(run).await?;

        let target_path = target.path_str();
        for (position, path) in candidates.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(IndexError::Cancelled);
            }
            if trigger == RunTrigger::Scheduled && position > 0 {
                self.wait_for_idle(cancel).await?;
            }

            match self.index_file(target, &target_path, path).await {
                Ok(chunks) => {
                    debug!(path = %path.display(), chunks, "indexed file");
                    run.record_file(chunks as u64, false);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    run.record_file(0, true);
                }
            }
            self.runs.save(run).await?;
        }

        Ok(())
    }

    /// Replace the stored chunks of one file. Returns the number stored.
    async fn index_file(&self, target: &WatchTarget, target_path: &str, path: &Path) -> Result<usize> {
        let text = self.parts.extractor.extract(path).await?;
        let source_path = path.display().to_string();
        let previous = ChunkFilter::file(&target.id, &source_path);

        let chunks = self.splitter.split(&text);
        if chunks.is_empty() {
            // Nothing to embed; drop whatever an earlier version left behind.
            self.parts.store.delete(&previous).await?;
            return Ok(0);
        }

        let vectors = self.parts.embedder.embed(&chunks).await?;
        if vectors.len() != chunks.len() {
            return Err(IndexError::ProviderError(format!(
                "provider returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let total_chunks = chunks.len();
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (text, vector))| ChunkRecord {
                id: chunk_id(&source_path, chunk_index),
                text,
                metadata: ChunkMetadata {
                    source_path: source_path.clone(),
                    target_id: target.id.clone(),
                    target_path: target_path.to_string(),
                    chunk_index,
                    total_chunks,
                    tags: target.tags.clone(),
                },
                vector,
            })
            .collect();

        self.parts.store.delete(&previous).await?;
        self.parts.store.upsert(&records).await?;
        Ok(total_chunks)
    }

    /// Pause while the machine is busy, up to `max_busy_waits` backoffs.
    async fn wait_for_idle(&self, cancel: &CancellationToken) -> Result<()> {
        let config = self.schedule.snapshot().await;
        if !config.idle_only {
            return Ok(());
        }

        for attempt in 0..self.pacing.max_busy_waits {
            let idle = match self.parts.probe.sample().await {
                Ok(sample) => is_idle(
                    sample.cpu_percent,
                    sample.ram_percent,
                    config.cpu_threshold,
                    config.ram_threshold,
                ),
                Err(e) => {
                    warn!(error = %e, "load sample failed, treating system as busy");
                    false
                }
            };
            if idle {
                return Ok(());
            }

            debug!(attempt, "system busy, pausing between files");
            tokio::select! {
                _ = cancel.cancelled() => return Err(IndexError::Cancelled),
                _ = tokio::time::sleep(self.pacing.busy_backoff) => {}
            }
        }

        info!(
            waits = self.pacing.max_busy_waits,
            "system still busy, continuing with next file"
        );
        Ok(())
    }
}
