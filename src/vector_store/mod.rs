//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is what the pipeline, search and target
//! deletion need from nearest-neighbour storage: upsert by id, k-NN query,
//! delete by metadata filter, and a count. Two backends are provided:
//!
//! - [`SqliteVectorStore`]: the `chunk_vectors` table in the catalog
//!   database, queried by a brute-force cosine scan.
//! - [`InMemoryVectorStore`]: a `BTreeMap` behind a `RwLock`, for tests
//!   and embedding the library.
//!
//! Distances are cosine distances (`1 − cosine similarity`), so smaller is
//! closer and identical directions score 0.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Payload stored next to every chunk vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub source_path: String,
    pub target_id: String,
    pub target_path: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub tags: Vec<String>,
}

/// A chunk ready to be written.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// `"{source_path}#{chunk_index}"`, see [`crate::chunk::chunk_id`].
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub vector: Vec<f32>,
}

/// A query hit.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMatch {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

/// Metadata filter. Set fields are AND-ed; an empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub target_id: Option<String>,
    pub target_path: Option<String>,
    pub source_path: Option<String>,
}

impl ChunkFilter {
    pub fn target(target_id: &str) -> Self {
        Self {
            target_id: Some(target_id.to_string()),
            ..Default::default()
        }
    }

    /// Every chunk of one file within one target.
    pub fn file(target_id: &str, source_path: &str) -> Self {
        Self {
            target_id: Some(target_id.to_string()),
            source_path: Some(source_path.to_string()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.target_id.is_none() && self.target_path.is_none() && self.source_path.is_none()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        fn field(want: &Option<String>, have: &str) -> bool {
            want.as_deref().map_or(true, |w| w == have)
        }
        field(&self.target_id, &metadata.target_id)
            && field(&self.target_path, &metadata.target_path)
            && field(&self.source_path, &metadata.source_path)
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or overwrite records by id.
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()>;

    /// The `k` nearest chunks to `vector` that pass `filter`, closest first.
    async fn query(&self, vector: &[f32], k: usize, filter: &ChunkFilter) -> Result<Vec<ChunkMatch>>;

    /// Remove every chunk matching `filter`; returns how many were removed.
    /// An empty filter is rejected rather than wiping the store.
    async fn delete(&self, filter: &ChunkFilter) -> Result<u64>;

    async fn count(&self) -> Result<u64>;
}

pub(crate) fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - crate::embedding::cosine_similarity(a, b)
}

/// Sort ascending by distance (ties by id) and keep the first `k`.
pub(crate) fn nearest(mut matches: Vec<ChunkMatch>, k: usize) -> Vec<ChunkMatch> {
    matches.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(k);
    matches
}
