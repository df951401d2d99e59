//! Semantic search over indexed chunks.
//!
//! The query is embedded with the configured provider and ranked against the
//! vector store by cosine distance. Scores are `1 - distance`, so identical
//! directions score 1.0.

use serde::{Deserialize, Serialize};

use crate::embedding::{embed_query, Embedder};
use crate::error::{IndexError, Result};
use crate::vector_store::{ChunkFilter, ChunkMetadata, VectorStore};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;

/// A search request as accepted by the HTTP surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl SearchRequest {
    pub fn filter(&self) -> ChunkFilter {
        ChunkFilter {
            target_id: self.target_id.clone(),
            target_path: None,
            source_path: self.source_path.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub source_path: String,
    pub target_id: String,
    pub chunk_index: usize,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Top `limit` chunks for `query`, best first.
pub async fn search(
    embedder: &dyn Embedder,
    store: &dyn VectorStore,
    query: &str,
    limit: usize,
    filter: &ChunkFilter,
) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(IndexError::InvalidInput("query must not be empty".to_string()));
    }
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(IndexError::InvalidInput(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    let vector = embed_query(embedder, query).await?;
    let matches = store.query(&vector, limit, filter).await?;

    let mut hits: Vec<SearchHit> = matches
        .into_iter()
        .map(|m| SearchHit {
            source_path: m.metadata.source_path.clone(),
            target_id: m.metadata.target_id.clone(),
            chunk_index: m.metadata.chunk_index,
            score: 1.0 - m.distance,
            id: m.id,
            text: m.text,
            metadata: m.metadata,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(hits)
}
