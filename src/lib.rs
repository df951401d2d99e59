//! # dex-indexer
//!
//! An idle-aware background indexer. Registered files and folders are kept
//! searchable by extracting their text, splitting it into chunks, embedding
//! the chunks and storing the vectors. Indexing runs only inside a daily
//! time window and, optionally, only while the machine is idle.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────┐   poll    ┌───────────┐  due?  ┌──────────────┐
//!  │ Registry │──────────▶│ Scheduler │───────▶│ Change       │
//!  └──────────┘           └─────┬─────┘        │ Detector     │
//!        ▲        window+idle?  │              └──────────────┘
//!        │        ┌─────────────┘
//!        │        ▼
//!  ┌─────┴────────────┐   ┌─────────────────────────────────────┐
//!  │ Run catalog      │◀──│ Pipeline: extract → chunk → embed → │
//!  │ (progress)       │   │           replace chunks in store   │
//!  └──────────────────┘   └─────────────────────────────────────┘
//!                  ▲                        ▲
//!            ┌─────┴────┐             ┌─────┴────┐
//!            │   CLI    │             │   HTTP   │
//!            │  (dex)   │             │  (axum)  │
//!            └──────────┘             └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dex init
//! dex target add ~/Documents --types .pdf,.docx,.txt
//! dex schedule set --start 23:00 --end 07:00 --idle-only true
//! dex serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error type shared by every operation |
//! | [`db`] / [`migrate`] | Catalog connection and schema |
//! | [`registry`] | Watch target registry |
//! | [`runs`] | Indexing run catalog |
//! | [`schedule`] | Persisted, shared schedule |
//! | [`probe`] | CPU/RAM/disk load sampling |
//! | [`window`] | Window and idle evaluation |
//! | [`discover`] | Candidate file enumeration |
//! | [`change`] | Reindex decision per target |
//! | [`extract`] | Text extraction (text, PDF, DOCX) |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Chunk vector storage and k-NN |
//! | [`pipeline`] | One indexing run |
//! | [`scheduler`] | Background loop and manual triggers |
//! | [`search`] | Semantic search |
//! | [`stats`] | Catalog statistics |
//! | [`context`] | Application context |
//! | [`server`] | HTTP API |

pub mod change;
pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod discover;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod probe;
pub mod registry;
pub mod runs;
pub mod schedule;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod stats;
pub mod vector_store;
pub mod window;
