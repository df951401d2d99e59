//! Background scheduler and manual triggers.
//!
//! The scheduler owns one polling task. Each cycle it snapshots the schedule,
//! asks the window evaluator whether indexing may run, and if so walks the
//! enabled targets in registration order, indexing every target the change
//! detector reports as due. Targets are indexed one after another, never in
//! parallel, and only one cycle runs at a time however it was started.
//!
//! Every run, scheduled or manual, first takes the target's entry in
//! [`RunLocks`] and then claims the target's row in the run catalog, which
//! other processes sharing the catalog also see. A manual trigger for a
//! held target fails with [`IndexError::AlreadyRunning`]; the loop skips it.
//!
//! Shutdown: [`Scheduler::stop`] cancels the loop and waits for it. Runs
//! notice cancellation between files and finish in `error`.
//! [`Scheduler::shutdown`] also cancels and waits for manual runs; a
//! scheduler that was shut down cannot be started again.

use chrono::{DateTime, Duration as ChronoDuration, Local, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::change::needs_reindex;
use crate::discover::FileFilter;
use crate::error::{IndexError, Result};
use crate::models::{IndexingRun, RunStatus, WatchTarget};
use crate::pipeline::{Indexer, RunTrigger};
use crate::probe::LoadProbe;
use crate::registry::TargetRegistry;
use crate::runs::RunCatalog;
use crate::schedule::ScheduleHandle;
use crate::window::{may_run_now, next_window_start};

/// Target ids with a run in flight.
#[derive(Default)]
pub struct RunLocks {
    active: Mutex<HashSet<String>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `target_id`, or `None` if a run already holds it.
    pub fn try_acquire(self: &Arc<Self>, target_id: &str) -> Option<RunGuard> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(target_id.to_string()) {
            return None;
        }
        Some(RunGuard {
            locks: Arc::clone(self),
            target_id: target_id.to_string(),
        })
    }

    pub fn is_locked(&self, target_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(target_id)
    }
}

/// Releases the target's lock when dropped.
pub struct RunGuard {
    locks: Arc<RunLocks>,
    target_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.target_id);
    }
}

/// State shared between the scheduler handle, its loop and spawned runs.
struct Shared {
    registry: Arc<TargetRegistry>,
    runs: RunCatalog,
    indexer: Arc<Indexer>,
    schedule: ScheduleHandle,
    probe: Arc<dyn LoadProbe>,
    filter: Arc<FileFilter>,
    locks: Arc<RunLocks>,
    /// Held for the duration of a cycle.
    cycle: tokio::sync::Mutex<()>,
    poll_interval: Duration,
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<LoopHandle>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TargetRegistry>,
        runs: RunCatalog,
        indexer: Arc<Indexer>,
        schedule: ScheduleHandle,
        probe: Arc<dyn LoadProbe>,
        filter: Arc<FileFilter>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                runs,
                indexer,
                schedule,
                probe,
                filter,
                locks: Arc::new(RunLocks::new()),
                cycle: tokio::sync::Mutex::new(()),
                poll_interval,
            }),
            running: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn locks(&self) -> &Arc<RunLocks> {
        &self.shared.locks
    }

    /// Start the polling loop. Returns false if it was already running or
    /// the scheduler has been shut down.
    pub async fn start(&self) -> bool {
        if self.shutdown.is_cancelled() {
            warn!("scheduler is shut down, not starting");
            return false;
        }
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|h| !h.task.is_finished()) {
            return false;
        }

        let cancel = self.shutdown.child_token();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let task = tokio::spawn(async move { shared.poll_loop(token).await });
        *running = Some(LoopHandle { cancel, task });

        info!(interval_secs = self.shared.poll_interval.as_secs(), "scheduler started");
        true
    }

    /// Cancel the polling loop and wait until its in-flight run has ended.
    pub async fn stop(&self) {
        let handle = self.running.lock().await.take();
        let Some(handle) = handle else {
            return;
        };
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            error!(error = %e, "scheduler loop panicked");
        }
        info!("scheduler stopped");
    }

    /// Stop the loop and every manually triggered run.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Index one target in the background, bypassing the window.
    ///
    /// Returns once the run is accepted and recorded as `pending`.
    pub async fn trigger(&self, target_id: &str) -> Result<()> {
        let target = self.shared.registry.get(target_id).await?;
        let guard = self
            .shared
            .claim(&target.id)
            .await?
            .ok_or_else(|| IndexError::AlreadyRunning(target.id.clone()))?;

        let shared = Arc::clone(&self.shared);
        let cancel = self.shutdown.child_token();
        self.tasks.spawn(async move {
            let _guard = guard;
            if let Err(e) = shared.execute(&target, RunTrigger::Manual, &cancel).await {
                error!(target = %target.id, error = %e, "manual run could not be recorded");
            }
        });
        Ok(())
    }

    /// Index one target now and wait for the terminal run.
    pub async fn index_now(&self, target_id: &str) -> Result<IndexingRun> {
        let target = self.shared.registry.get(target_id).await?;
        let _guard = self
            .shared
            .claim(&target.id)
            .await?
            .ok_or_else(|| IndexError::AlreadyRunning(target.id.clone()))?;
        let cancel = self.shutdown.child_token();
        self.shared
            .execute(&target, RunTrigger::Manual, &cancel)
            .await
    }

    /// Run one polling cycle inline. Returns the number of targets indexed.
    pub async fn run_cycle(&self) -> usize {
        let cancel = self.shutdown.child_token();
        self.shared.run_cycle(&cancel).await
    }

    /// Run one polling cycle in the background.
    pub fn spawn_cycle(&self) {
        let shared = Arc::clone(&self.shared);
        let cancel = self.shutdown.child_token();
        self.tasks.spawn(async move {
            shared.run_cycle(&cancel).await;
        });
    }
}

impl Shared {
    async fn poll_loop(&self, cancel: CancellationToken) {
        loop {
            let ran = self.run_cycle(&cancel).await;
            if ran > 0 {
                info!(targets = ran, "scheduler cycle finished");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> usize {
        let Ok(_cycle) = self.cycle.try_lock() else {
            debug!("a cycle is already running, skipping");
            return 0;
        };
        let targets = match self.registry.list_enabled().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "could not list targets");
                return 0;
            }
        };

        let mut ran = 0;
        for target in targets {
            if cancel.is_cancelled() {
                break;
            }
            // Re-evaluated per target so a long cycle stops at the window end.
            let config = self.schedule.snapshot().await;
            if !may_run_now(&config, self.probe.as_ref()).await {
                debug!("indexing not permitted now");
                break;
            }
            if !needs_reindex(&target, Arc::clone(&self.filter), Utc::now()).await {
                continue;
            }
            let _guard = match self.claim(&target.id).await {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    info!(target = %target.id, "run already in progress, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(target = %target.id, error = %e, "could not claim run");
                    continue;
                }
            };

            match self.execute(&target, RunTrigger::Scheduled, cancel).await {
                Ok(_) => ran += 1,
                Err(e) => error!(target = %target.id, error = %e, "scheduled run could not be recorded"),
            }
        }
        ran
    }

    /// Take the target's in-process lock and claim its catalog row as a
    /// `pending` run. `None` if either is held.
    async fn claim(&self, target_id: &str) -> Result<Option<RunGuard>> {
        let Some(guard) = self.locks.try_acquire(target_id) else {
            return Ok(None);
        };
        if !self
            .runs
            .claim(&IndexingRun::pending(target_id, Utc::now()))
            .await?
        {
            debug!(target = %target_id, "run row held by another process");
            return Ok(None);
        }
        Ok(Some(guard))
    }

    /// Run the pipeline and, on success, update the target's bookkeeping.
    async fn execute(
        &self,
        target: &WatchTarget,
        trigger: RunTrigger,
        cancel: &CancellationToken,
    ) -> Result<IndexingRun> {
        let run = match self.indexer.run(target, trigger, cancel).await {
            Ok(run) => run,
            Err(e) => {
                // Release the claimed row so the target is not stuck.
                if let Err(clear_err) = self.runs.clear(&target.id, &e.to_string(), Utc::now()).await {
                    warn!(target = %target.id, error = %clear_err, "could not release run");
                }
                return Err(e);
            }
        };
        if run.status == RunStatus::Completed {
            let config = self.schedule.snapshot().await;
            let next = next_scheduled_at(&config.window_start);
            if let Err(e) = self
                .registry
                .record_success(&target.id, run.started_at, Some(next), run.total_files)
                .await
            {
                warn!(target = %target.id, error = %e, "could not record successful run");
            }
        }
        Ok(run)
    }
}

/// Next local occurrence of the window start, as UTC.
pub fn next_scheduled_at(window_start: &str) -> DateTime<Utc> {
    let next = next_window_start(Local::now().naive_local(), window_start);
    Local
        .from_local_datetime(&next)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| Utc::now() + ChronoDuration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lock_is_exclusive_and_released_on_drop() {
        let locks = Arc::new(RunLocks::new());
        let guard = locks.try_acquire("t1").unwrap();
        assert!(locks.is_locked("t1"));
        assert!(locks.try_acquire("t1").is_none());
        assert!(locks.try_acquire("t2").is_some());
        drop(guard);
        assert!(!locks.is_locked("t1"));
        assert!(locks.try_acquire("t1").is_some());
    }

    #[test]
    fn test_next_scheduled_is_in_the_future() {
        let next = next_scheduled_at("03:00");
        assert!(next > Utc::now());
        assert!(next <= Utc::now() + ChronoDuration::hours(25));
    }
}
