//! Wraps [`crate::vector_cache::VectorCache`] behind the uniform
//! [`SourceAdapter`] contract, so the Orchestrator fans out to
//! `vector_cache` exactly like every network source, participating in
//! the same parallel fan-out rather than as a special-cased pre-check.

use std::sync::Arc;

use async_trait::async_trait;

use crate::embedder::Embedder;
use crate::errors::SourceError;
use crate::types::{Document, SourceId};
use crate::vector_cache::{VectorCache, DEFAULT_MIN_SCORE};

use super::SourceAdapter;

pub struct VectorCacheAdapter {
    cache: Arc<VectorCache>,
    embedder: Arc<Embedder>,
}

impl VectorCacheAdapter {
    pub fn new(cache: Arc<VectorCache>, embedder: Arc<Embedder>) -> Self {
        Self { cache, embedder }
    }
}

#[async_trait]
impl SourceAdapter for VectorCacheAdapter {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>, SourceError> {
        let query_vector = self.embedder.embed_one(query);
        let hits = self
            .cache
            .query(&query_vector, limit, DEFAULT_MIN_SCORE)
            .await
            .map_err(|e| SourceError::Permanent(format!("vector cache: {e}")))?;

        let now = chrono::Utc::now();
        Ok(hits
            .into_iter()
            .map(|entry| Document {
                id: entry.chunk.doc_id,
                source: SourceId::VectorCache,
                title: entry.chunk.title,
                url: entry.chunk.url,
                body: entry.chunk.text,
                fetched_at: now,
                score: None,
            })
            .collect())
    }

    async fn healthy(&self) -> bool {
        true
    }

    fn id(&self) -> SourceId {
        SourceId::VectorCache
    }
}
