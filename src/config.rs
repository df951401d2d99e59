//! TOML configuration parsing.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! The `[schedule]` section only seeds the persisted schedule on first
//! start; after that the catalog row is authoritative (see [`crate::schedule`]).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::ScheduleConfig;
use crate::window::validate_time_of_day;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// A configuration with every optional section at its default.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            schedule: ScheduleSettings::default(),
            indexing: IndexingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Chunk sizes are measured in characters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// HTTP client timeout for a single request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on one `embed` call, retries included.
    #[serde(default = "default_call_deadline_secs")]
    pub call_deadline_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            call_deadline_secs: default_call_deadline_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_call_deadline_secs() -> u64 {
    120
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// `[schedule]`: seed values for the persisted schedule plus loop pacing.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleSettings {
    #[serde(default = "default_window_start")]
    pub window_start: String,
    #[serde(default = "default_window_end")]
    pub window_end: String,
    #[serde(default = "default_true")]
    pub idle_only: bool,
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f32,
    #[serde(default = "default_ram_threshold")]
    pub ram_threshold: f32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Pause between files while the machine is busy during a scheduled run.
    #[serde(default = "default_busy_backoff_secs")]
    pub busy_backoff_secs: u64,
    /// Consecutive busy pauses tolerated before the next file is processed anyway.
    #[serde(default = "default_max_busy_waits")]
    pub max_busy_waits: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            window_start: default_window_start(),
            window_end: default_window_end(),
            idle_only: true,
            cpu_threshold: default_cpu_threshold(),
            ram_threshold: default_ram_threshold(),
            enabled: true,
            poll_interval_secs: default_poll_interval_secs(),
            busy_backoff_secs: default_busy_backoff_secs(),
            max_busy_waits: default_max_busy_waits(),
        }
    }
}

impl ScheduleSettings {
    /// The schedule stored in the catalog when none exists yet.
    pub fn seed(&self) -> ScheduleConfig {
        ScheduleConfig {
            window_start: self.window_start.clone(),
            window_end: self.window_end.clone(),
            idle_only: self.idle_only,
            cpu_threshold: self.cpu_threshold,
            ram_threshold: self.ram_threshold,
            enabled: self.enabled,
        }
    }
}

fn default_window_start() -> String {
    "23:00".to_string()
}
fn default_window_end() -> String {
    "07:00".to_string()
}
fn default_true() -> bool {
    true
}
fn default_cpu_threshold() -> f32 {
    30.0
}
fn default_ram_threshold() -> f32 {
    50.0
}
fn default_poll_interval_secs() -> u64 {
    60
}
fn default_busy_backoff_secs() -> u64 {
    5
}
fn default_max_busy_waits() -> u32 {
    12
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Extensions the text extractor is asked to handle.
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    /// Allow-list given to new targets that do not specify one.
    #[serde(default = "default_file_types")]
    pub default_file_types: Vec<String>,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            supported_extensions: default_supported_extensions(),
            default_file_types: default_file_types(),
            exclude_globs: default_exclude_globs(),
            follow_symlinks: false,
        }
    }
}

fn default_supported_extensions() -> Vec<String> {
    [
        ".txt", ".md", ".pdf", ".docx", ".py", ".js", ".html", ".css", ".json", ".xml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_file_types() -> Vec<String> {
    vec![".pdf".to_string(), ".docx".to_string(), ".txt".to_string()]
}

fn default_exclude_globs() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8765".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if matches!(config.embedding.provider.as_str(), "openai" | "ollama") {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate schedule seed
    let schedule = &config.schedule;
    validate_time_of_day(&schedule.window_start).context("schedule.window_start")?;
    validate_time_of_day(&schedule.window_end).context("schedule.window_end")?;
    for (name, value) in [
        ("cpu_threshold", schedule.cpu_threshold),
        ("ram_threshold", schedule.ram_threshold),
    ] {
        if !(0.0..=100.0).contains(&value) {
            anyhow::bail!("schedule.{} must be in [0, 100]", name);
        }
    }
    if schedule.poll_interval_secs == 0 {
        anyhow::bail!("schedule.poll_interval_secs must be > 0");
    }

    if config.indexing.supported_extensions.is_empty() {
        anyhow::bail!("indexing.supported_extensions must not be empty");
    }

    Ok(())
}
