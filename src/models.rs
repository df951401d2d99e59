//! Core data models used throughout the indexer.
//!
//! These types represent the watch targets, schedule, indexing runs and
//! stored chunks that flow between the scheduler, the pipeline and the
//! catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::IndexError;

/// Whether a watch target is a single file or a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    File,
    Folder,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::File => "file",
            TargetKind::Folder => "folder",
        }
    }
}

impl FromStr for TargetKind {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(TargetKind::File),
            "folder" => Ok(TargetKind::Folder),
            other => Err(IndexError::InvalidInput(format!(
                "unknown target kind '{}', expected file or folder",
                other
            ))),
        }
    }
}

/// A registered file or folder to keep indexed.
#[derive(Debug, Clone, Serialize)]
pub struct WatchTarget {
    pub id: String,
    /// Canonical absolute path; unique across targets.
    pub path: PathBuf,
    pub name: String,
    pub kind: TargetKind,
    pub recursive: bool,
    /// Lowercase extensions with a leading dot. Empty means every supported type.
    pub file_types: Vec<String>,
    pub tags: Vec<String>,
    pub enabled: bool,
    pub reindex_on_change: bool,
    pub last_indexed_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub file_count: u64,
    pub created_at: DateTime<Utc>,
}

impl WatchTarget {
    /// Path as stored in chunk metadata.
    pub fn path_str(&self) -> String {
        self.path.display().to_string()
    }
}

/// Registration request. Unset policy fields take the registry defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWatchTarget {
    pub path: PathBuf,
    pub kind: TargetKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recursive: Option<bool>,
    #[serde(default)]
    pub file_types: Option<Vec<String>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub reindex_on_change: Option<bool>,
}

impl NewWatchTarget {
    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), TargetKind::Folder)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::new(path.into(), TargetKind::File)
    }

    fn new(path: PathBuf, kind: TargetKind) -> Self {
        Self {
            path,
            kind,
            name: None,
            recursive: None,
            file_types: None,
            tags: Vec::new(),
            enabled: None,
            reindex_on_change: None,
        }
    }
}

/// The mutable fields of a [`WatchTarget`]. Scheduling bookkeeping is not
/// part of it; only the scheduler writes those.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchTargetUpdate {
    pub path: Option<PathBuf>,
    pub name: Option<String>,
    pub recursive: Option<bool>,
    pub file_types: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub enabled: Option<bool>,
    pub reindex_on_change: Option<bool>,
}

impl WatchTargetUpdate {
    pub fn is_empty(&self) -> bool {
        self.path.is_none()
            && self.name.is_none()
            && self.recursive.is_none()
            && self.file_types.is_none()
            && self.tags.is_none()
            && self.enabled.is_none()
            && self.reindex_on_change.is_none()
    }
}

/// Process-wide schedule. Times are `HH:MM` wall-clock strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub window_start: String,
    pub window_end: String,
    pub idle_only: bool,
    pub cpu_threshold: f32,
    pub ram_threshold: f32,
    pub enabled: bool,
}

/// Partial schedule update; see [`crate::schedule::ScheduleHandle::update`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleConfigUpdate {
    pub window_start: Option<String>,
    pub window_end: Option<String>,
    pub idle_only: Option<bool>,
    pub cpu_threshold: Option<f32>,
    pub ram_threshold: Option<f32>,
    pub enabled: Option<bool>,
}

/// Lifecycle state of an [`IndexingRun`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Indexing,
    Completed,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Indexing => "indexing",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }
}

impl FromStr for RunStatus {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "indexing" => Ok(RunStatus::Indexing),
            "completed" => Ok(RunStatus::Completed),
            "error" => Ok(RunStatus::Error),
            other => Err(IndexError::Store(format!("unknown run status '{}'", other))),
        }
    }
}

/// The latest indexing attempt for a target. One record per target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexingRun {
    pub target_id: String,
    pub status: RunStatus,
    pub processed_files: u64,
    pub total_files: u64,
    /// `floor(processed / total * 100)`, forced to 100 on completion.
    pub percentage: u8,
    pub files_failed: u64,
    pub chunks_stored: u64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IndexingRun {
    /// A fresh run, already in `indexing` state with 0/0 progress.
    pub fn begin(target_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            target_id: target_id.to_string(),
            status: RunStatus::Indexing,
            processed_files: 0,
            total_files: 0,
            percentage: 0,
            files_failed: 0,
            chunks_stored: 0,
            error_message: None,
            started_at: now,
            completed_at: None,
        }
    }

    /// A run accepted by a manual trigger but not started yet.
    pub fn pending(target_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Pending,
            ..Self::begin(target_id, now)
        }
    }

    pub fn set_total(&mut self, total: u64) {
        self.total_files = total;
        self.percentage = progress_percentage(self.processed_files, total);
    }

    /// Count one processed file, whether it succeeded or was skipped.
    pub fn record_file(&mut self, chunks: u64, failed: bool) {
        self.processed_files += 1;
        self.chunks_stored += chunks;
        if failed {
            self.files_failed += 1;
        }
        self.percentage = progress_percentage(self.processed_files, self.total_files);
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.percentage = 100;
        self.error_message = None;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = RunStatus::Error;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
    }
}

/// Integer percentage; 0 while the total is unknown.
pub fn progress_percentage(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((processed.min(total) * 100) / total) as u8
}

/// Status as seen by API callers, including the `not_started` pseudo-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    NotStarted,
    Pending,
    Indexing,
    Completed,
    Error,
}

/// A read of a target's current run, safe to hand to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub target_id: String,
    pub status: ReportedStatus,
    pub progress: u8,
    pub processed_files: u64,
    pub total_files: u64,
    pub files_failed: u64,
    pub chunks_stored: u64,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn not_started(target_id: &str) -> Self {
        Self {
            target_id: target_id.to_string(),
            status: ReportedStatus::NotStarted,
            progress: 0,
            processed_files: 0,
            total_files: 0,
            files_failed: 0,
            chunks_stored: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

impl From<IndexingRun> for RunReport {
    fn from(run: IndexingRun) -> Self {
        let status = match run.status {
            RunStatus::Pending => ReportedStatus::Pending,
            RunStatus::Indexing => ReportedStatus::Indexing,
            RunStatus::Completed => ReportedStatus::Completed,
            RunStatus::Error => ReportedStatus::Error,
        };
        Self {
            target_id: run.target_id,
            status,
            progress: run.percentage,
            processed_files: run.processed_files,
            total_files: run.total_files,
            files_failed: run.files_failed,
            chunks_stored: run.chunks_stored,
            error_message: run.error_message,
            started_at: Some(run.started_at),
            completed_at: run.completed_at,
        }
    }
}

/// A single OS load reading.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSample {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub disk_percent: f32,
    pub timestamp: DateTime<Utc>,
}

/// A load reading together with the idle verdict under the current thresholds.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    #[serde(flatten)]
    pub sample: SystemSample,
    pub is_idle: bool,
}
