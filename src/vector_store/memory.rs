//! In-memory vector store.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`, so iteration order and
//! therefore tie-breaking is deterministic.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{cosine_distance, nearest, ChunkFilter, ChunkMatch, ChunkRecord, VectorStore};
use crate::error::{IndexError, Result};

#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<BTreeMap<String, ChunkRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids currently stored, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.keys().cloned().collect())
    }

    /// A stored record by id.
    pub fn get(&self, id: &str) -> Result<Option<ChunkRecord>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(id).cloned())
    }
}

fn poisoned() -> IndexError {
    IndexError::Store("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: &[ChunkRecord]) -> Result<()> {
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize, filter: &ChunkFilter) -> Result<Vec<ChunkMatch>> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        let matches = stored
            .values()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| ChunkMatch {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: cosine_distance(vector, &r.vector),
            })
            .collect();
        Ok(nearest(matches, k))
    }

    async fn delete(&self, filter: &ChunkFilter) -> Result<u64> {
        if filter.is_empty() {
            return Err(IndexError::Store("refusing to delete with an empty filter".to_string()));
        }
        let mut stored = self.records.write().map_err(|_| poisoned())?;
        let before = stored.len();
        stored.retain(|_, r| !filter.matches(&r.metadata));
        Ok((before - stored.len()) as u64)
    }

    async fn count(&self) -> Result<u64> {
        let stored = self.records.read().map_err(|_| poisoned())?;
        Ok(stored.len() as u64)
    }
}
