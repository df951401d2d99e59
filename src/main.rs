//! # dex CLI
//!
//! The `dex` binary manages watch targets, the indexing schedule and the
//! background scheduler.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dex init` | Create the SQLite catalog and run schema migrations |
//! | `dex target add <path>` | Register a file or folder |
//! | `dex target list\|show\|update\|remove\|clear` | Manage targets |
//! | `dex index <id>` | Index one target now, ignoring the window |
//! | `dex status <id>` | Show a target's current run |
//! | `dex schedule show\|set\|pause\|resume\|status` | Manage the schedule |
//! | `dex system` | Sample CPU, RAM and disk load |
//! | `dex stats` | Summarise targets, runs and stored chunks |
//! | `dex search "<query>"` | Semantic search over indexed chunks |
//! | `dex serve` | Run the scheduler and the HTTP API until Ctrl-C |
//!
//! Logs go to stderr and honour `RUST_LOG` (default `dex_indexer=info`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dex_indexer::config;
use dex_indexer::context::AppContext;
use dex_indexer::models::{NewWatchTarget, ScheduleConfigUpdate, TargetKind, WatchTargetUpdate};
use dex_indexer::search::DEFAULT_LIMIT;
use dex_indexer::server;
use dex_indexer::vector_store::ChunkFilter;

/// Idle-aware document indexer.
#[derive(Parser)]
#[command(name = "dex", version, about = "Idle-aware scheduled document indexer")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/dex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the catalog schema. Idempotent.
    Init,

    /// Manage watch targets.
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Index one target now and wait for the run to finish.
    Index {
        /// Target id.
        id: String,
    },

    /// Show the current run of a target.
    Status {
        /// Target id.
        id: String,
    },

    /// Inspect or change the indexing schedule.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Print a fresh CPU/RAM/disk sample and the idle verdict.
    System,

    /// Show target, run and chunk counts.
    Stats {
        /// Print JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Search indexed chunks.
    Search {
        /// Query text.
        query: String,

        /// Maximum number of results (1-50).
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,

        /// Only search chunks of this target.
        #[arg(long)]
        target: Option<String>,
    },

    /// Run the scheduler and the HTTP server until interrupted.
    Serve,
}

#[derive(Subcommand)]
enum TargetAction {
    /// Register a file or folder.
    Add {
        path: PathBuf,

        /// Register a single file instead of a folder.
        #[arg(long)]
        file: bool,

        #[arg(long)]
        name: Option<String>,

        /// Only index the folder's top level.
        #[arg(long)]
        no_recursive: bool,

        /// Comma-separated extension allow-list, e.g. `.pdf,.txt`.
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<String>>,

        /// Tag copied into every chunk's metadata. Repeatable.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Register without scheduling it.
        #[arg(long)]
        disabled: bool,

        /// Reindex on the fixed schedule only, not when files change.
        #[arg(long)]
        no_reindex_on_change: bool,
    },
    /// List all targets.
    List,
    /// Show one target.
    Show { id: String },
    /// Change fields of a target.
    Update {
        id: String,
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        recursive: Option<bool>,
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<String>>,
        #[arg(long, value_delimiter = ',')]
        tags: Option<Vec<String>>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        reindex_on_change: Option<bool>,
    },
    /// Remove a target, its run record and its chunks.
    Remove { id: String },
    /// Close a run left behind in `pending` or `indexing`.
    Clear { id: String },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Print the persisted schedule.
    Show,
    /// Change schedule fields. Unset flags keep their value.
    Set {
        /// Window start, `HH:MM`.
        #[arg(long)]
        start: Option<String>,
        /// Window end, `HH:MM`.
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        idle_only: Option<bool>,
        /// CPU threshold in percent.
        #[arg(long)]
        cpu: Option<f32>,
        /// RAM threshold in percent.
        #[arg(long)]
        ram: Option<f32>,
    },
    /// Disable scheduled indexing.
    Pause,
    /// Enable scheduled indexing.
    Resume,
    /// Show the schedule with the current load and verdict.
    Status,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dex_indexer=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    let ctx = AppContext::new(cfg)
        .await
        .context("failed to open the catalog")?;

    match cli.command {
        Commands::Init => {
            println!("Catalog initialized at {}", ctx.config().db.path.display());
        }
        Commands::Target { action } => run_target(&ctx, action).await?,
        Commands::Index { id } => {
            let run = ctx.index_now(&id).await?;
            println!(
                "{}: {} ({}/{} files, {} failed, {} chunks)",
                id,
                run.status.as_str(),
                run.processed_files,
                run.total_files,
                run.files_failed,
                run.chunks_stored
            );
            if let Some(message) = &run.error_message {
                println!("error: {}", message);
            }
        }
        Commands::Status { id } => print_json(&ctx.run_status(&id).await?)?,
        Commands::Schedule { action } => run_schedule(&ctx, action).await?,
        Commands::System => print_json(&ctx.system_status().await?)?,
        Commands::Stats { json } => {
            let stats = ctx.stats().await?;
            if json {
                print_json(&stats)?;
            } else {
                println!("dex catalog stats");
                println!("=================");
                println!();
                println!("  Catalog:     {}", ctx.config().db.path.display());
                println!(
                    "  Targets:     {} ({} enabled, {} indexed)",
                    stats.targets_total, stats.targets_enabled, stats.targets_indexed
                );
                println!("  Running:     {}", stats.runs_in_progress);
                println!("  Chunks:      {}", stats.chunks);
            }
        }
        Commands::Search {
            query,
            limit,
            target,
        } => {
            let filter = ChunkFilter {
                target_id: target,
                ..Default::default()
            };
            let hits = ctx.search(&query, limit, &filter).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (rank, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} (chunk {})",
                    rank + 1,
                    hit.score,
                    hit.source_path,
                    hit.chunk_index
                );
                println!("    {}", snippet(&hit.text, 160));
            }
        }
        Commands::Serve => {
            let ctx = Arc::new(ctx);
            ctx.recover_interrupted().await?;
            ctx.start_scheduler().await;
            let served = server::serve(Arc::clone(&ctx), shutdown_signal()).await;
            ctx.shutdown().await;
            served?;
            return Ok(());
        }
    }

    ctx.shutdown().await;
    Ok(())
}

async fn run_target(ctx: &AppContext, action: TargetAction) -> anyhow::Result<()> {
    match action {
        TargetAction::Add {
            path,
            file,
            name,
            no_recursive,
            types,
            tags,
            disabled,
            no_reindex_on_change,
        } => {
            let new = NewWatchTarget {
                path,
                kind: if file { TargetKind::File } else { TargetKind::Folder },
                name,
                recursive: Some(!no_recursive),
                file_types: types,
                tags,
                enabled: Some(!disabled),
                reindex_on_change: Some(!no_reindex_on_change),
            };
            let target = ctx.add_target(new).await?;
            println!("{}", target.id);
        }
        TargetAction::List => {
            let targets = ctx.list_targets().await?;
            if targets.is_empty() {
                println!("No targets.");
            }
            for t in targets {
                let last = t
                    .last_indexed_at
                    .map(|ts| ts.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {:<6} {:<8} {}  (last indexed: {}, files: {})",
                    t.id,
                    t.kind.as_str(),
                    if t.enabled { "enabled" } else { "disabled" },
                    t.path.display(),
                    last,
                    t.file_count
                );
            }
        }
        TargetAction::Show { id } => print_json(&ctx.get_target(&id).await?)?,
        TargetAction::Update {
            id,
            path,
            name,
            recursive,
            types,
            tags,
            enabled,
            reindex_on_change,
        } => {
            let update = WatchTargetUpdate {
                path,
                name,
                recursive,
                file_types: types,
                tags,
                enabled,
                reindex_on_change,
            };
            print_json(&ctx.update_target(&id, update).await?)?;
        }
        TargetAction::Remove { id } => {
            let target = ctx.remove_target(&id).await?;
            println!("Removed {}", target.path.display());
        }
        TargetAction::Clear { id } => print_json(&ctx.clear_run(&id).await?)?,
    }
    Ok(())
}

async fn run_schedule(ctx: &AppContext, action: ScheduleAction) -> anyhow::Result<()> {
    match action {
        ScheduleAction::Show => print_json(&ctx.get_schedule().await)?,
        ScheduleAction::Set {
            start,
            end,
            idle_only,
            cpu,
            ram,
        } => {
            let update = ScheduleConfigUpdate {
                window_start: start,
                window_end: end,
                idle_only,
                cpu_threshold: cpu,
                ram_threshold: ram,
                enabled: None,
            };
            print_json(&ctx.update_schedule(update).await?)?;
        }
        ScheduleAction::Pause => {
            ctx.pause().await?;
            println!("Scheduled indexing paused.");
        }
        ScheduleAction::Resume => {
            ctx.resume().await?;
            println!("Scheduled indexing resumed.");
        }
        ScheduleAction::Status => print_json(&ctx.schedule_status().await)?,
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!(error = %e, "cannot listen for Ctrl-C; run until killed");
            std::future::pending::<()>().await;
        }
    }
}
