//! Parallel fan-out to selected sources
//!
//! Every selected source is wrapped by its own `RateGate` + `CircuitBreaker`
//! (held in the [`crate::sources::SourceRegistry`]) and raced against the
//! query deadline via `tokio::select!`. A successful fetch schedules a
//! fire-and-forget chunk+embed+insert job into the
//! [`crate::vector_cache::VectorCache`] so a similar future query can
//! short-circuit the external call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::chunker::{self, ChunkerConfig};
use crate::circuit_breaker::CircuitState;
use crate::embedder::{Embedder, MAX_BATCH_SIZE};
use crate::errors::SourceError;
use crate::router::SourceAvailability;
use crate::sources::SourceRegistry;
use crate::types::{Document, SourceId};
use crate::vector_cache::VectorCache;

/// One source's fan-out outcome, in Router-selected order.
#[derive(Debug, Clone)]
pub struct SourceResult {
    pub source: SourceId,
    pub documents: Vec<Document>,
    pub error: Option<String>,
}

/// Per-source deadline budget: `min(per_source_deadline, query_deadline)`.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub per_source_deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { per_source_deadline: Duration::from_secs(8) }
    }
}

pub struct Orchestrator {
    registry: Arc<SourceRegistry>,
    embedder: Arc<Embedder>,
    vector_cache: Arc<VectorCache>,
    chunker_config: ChunkerConfig,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        embedder: Arc<Embedder>,
        vector_cache: Arc<VectorCache>,
        chunker_config: ChunkerConfig,
        config: OrchestratorConfig,
    ) -> Self {
        Self { registry, embedder, vector_cache, chunker_config, config }
    }

    /// Snapshot every registered source's `healthy()` probe and circuit
    /// state, for [`crate::router::Router`] to consult right before a
    /// fan-out. Probing is async (adapters may do real I/O); the Router
    /// itself stays a pure, synchronous function over this snapshot.
    pub async fn availability_snapshot(&self) -> SourceAvailabilitySnapshot {
        let mut healthy = std::collections::HashMap::new();
        let mut circuit_open = std::collections::HashMap::new();
        for source in self.registry.configured_ids() {
            if let Some(entry) = self.registry.get(source) {
                healthy.insert(source, entry.adapter.healthy().await);
                circuit_open.insert(source, entry.circuit_breaker.state() == CircuitState::Open);
            }
        }
        SourceAvailabilitySnapshot { healthy, circuit_open }
    }

    /// Fan out to every source in `sources`, in parallel, returning
    /// results reordered back to the Router's selection order — the
    /// downstream ordering must be deterministic, not completion order.
    pub async fn run(
        &self,
        sources: &[SourceId],
        query_text: &str,
        per_source_limit: usize,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Vec<SourceResult> {
        let mut handles = Vec::with_capacity(sources.len());

        for &source in sources {
            let registry = Arc::clone(&self.registry);
            let query_text = query_text.to_string();
            let sub_deadline = deadline.min(Instant::now() + self.config.per_source_deadline);
            let cancel = cancel.clone();
            let embedder = Arc::clone(&self.embedder);
            let vector_cache = Arc::clone(&self.vector_cache);
            let chunker_config = self.chunker_config;

            handles.push(tokio::spawn(async move {
                let result = fetch_one(&registry, source, &query_text, per_source_limit, sub_deadline, &cancel).await;
                if let Ok(docs) = &result {
                    if source != SourceId::VectorCache && !docs.is_empty() {
                        spawn_cache_write(vector_cache, embedder, chunker_config, docs.clone());
                    }
                }
                (source, result)
            }));
        }

        // Aggregation ends at the first of: all sources reported, or the
        // query deadline elapsed. Sources that report before the deadline
        // are kept even if others are still in flight when it fires; a
        // late source's join is simply dropped here, though the spawned
        // task (and its fire-and-forget cache write) keeps running to
        // completion in the background.
        let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
        tokio::pin!(sleep);

        let mut remaining: futures::stream::FuturesUnordered<_> = handles.into_iter().collect();
        let mut outcomes: Vec<(SourceId, Result<Vec<Document>, SourceError>)> = Vec::new();
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                next = remaining.next() => {
                    match next {
                        Some(Ok(outcome)) => outcomes.push(outcome),
                        Some(Err(_)) => {}
                        None => break,
                    }
                }
            }
        }

        // Re-order into the Router's selection order regardless of
        // completion order.
        sources
            .iter()
            .filter_map(|&source| outcomes.iter().find(|(s, _)| *s == source))
            .map(|(source, result)| match result {
                Ok(documents) => SourceResult { source: *source, documents: documents.clone(), error: None },
                Err(e) => SourceResult { source: *source, documents: Vec::new(), error: Some(e.to_string()) },
            })
            .collect()
    }
}

async fn fetch_one(
    registry: &SourceRegistry,
    source: SourceId,
    query_text: &str,
    limit: usize,
    sub_deadline: Instant,
    cancel: &CancellationToken,
) -> Result<Vec<Document>, SourceError> {
    let Some(entry) = registry.get(source) else {
        return Ok(Vec::new());
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        result = run_gated(entry, query_text, limit, sub_deadline) => result,
    }
}

async fn run_gated(
    entry: &crate::sources::SourceEntry,
    query_text: &str,
    limit: usize,
    sub_deadline: Instant,
) -> Result<Vec<Document>, SourceError> {
    entry.rate_gate.acquire(sub_deadline).await?;

    let admission = entry.circuit_breaker.admit()?;
    match entry.adapter.search(query_text, limit).await {
        Ok(docs) => {
            entry.circuit_breaker.report(admission, true);
            Ok(docs)
        }
        Err(SourceError::TooManyRequests { retry_after_secs }) => {
            // 429 drives RateGate, not the breaker
            entry.rate_gate.penalize(Duration::from_secs(retry_after_secs));
            entry.circuit_breaker.report_permanent_error(admission);
            Ok(Vec::new())
        }
        Err(SourceError::Permanent(msg)) => {
            // A non-429 4xx is a client bug; never counts toward the breaker.
            entry.circuit_breaker.report_permanent_error(admission);
            Err(SourceError::Permanent(msg))
        }
        Err(e) => {
            entry.circuit_breaker.report(admission, false);
            Err(e)
        }
    }
}

/// Fire-and-forget: chunk, embed, and insert into the vector cache.
/// Failures are logged and otherwise swallowed — this write never affects
/// the current query's outcome.
fn spawn_cache_write(vector_cache: Arc<VectorCache>, embedder: Arc<Embedder>, chunker_config: ChunkerConfig, docs: Vec<Document>) {
    tokio::spawn(async move {
        let chunks: Vec<_> = docs.iter().flat_map(|d| chunker::chunk_document(d, &chunker_config)).collect();
        if chunks.is_empty() {
            return;
        }
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(MAX_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            for (chunk, vector) in batch.iter().zip(embedder.embed_batch(&texts)) {
                embeddings.push(crate::types::Embedding { chunk_id: chunk.id.clone(), vector });
            }
        }
        if let Err(e) = vector_cache.insert(&chunks, &embeddings).await {
            tracing::warn!(error = %e, "vector cache insert failed after source fetch");
        }
    });
}

/// A point-in-time snapshot of every source's health and circuit state,
/// handed to [`crate::router::Router::select`] as a [`SourceAvailability`].
pub struct SourceAvailabilitySnapshot {
    healthy: std::collections::HashMap<SourceId, bool>,
    circuit_open: std::collections::HashMap<SourceId, bool>,
}

impl SourceAvailability for SourceAvailabilitySnapshot {
    fn is_healthy(&self, source: SourceId) -> bool {
        self.healthy.get(&source).copied().unwrap_or(false)
    }

    fn is_circuit_open(&self, source: SourceId) -> bool {
        self.circuit_open.get(&source).copied().unwrap_or(true)
    }
}
