//! Token-budgeted context assembly
//!
//! Chunks every fetched document, scores each chunk against the query by
//! cosine similarity (blended with the source's native score when one is
//! provided), deduplicates per document, and greedily packs the highest
//! scoring chunks under the caller's token budget.

use std::collections::HashSet;

use crate::chunker::{self, ChunkerConfig};
use crate::embedder::{cosine, Embedder, MAX_BATCH_SIZE};
use crate::errors::ContextError;
use crate::orchestrator::SourceResult;
use crate::types::{Chunk, SourceId};

/// Token cost of the separator emitted between packed chunks in the
/// assembled prompt.
pub const SEPARATOR_OVERHEAD: usize = 8;
/// Max additional chunks kept from the same document beyond the top one.
pub const DEFAULT_MAX_CHUNKS_PER_DOC: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct ContextBuilderConfig {
    pub max_chunks_per_doc: usize,
    pub separator_overhead: usize,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self { max_chunks_per_doc: DEFAULT_MAX_CHUNKS_PER_DOC, separator_overhead: SEPARATOR_OVERHEAD }
    }
}

/// One document's provenance, as emitted on the wire in the `context`/`done`
/// events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub source: SourceId,
    pub title: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ContextPack {
    pub chunks: Vec<Chunk>,
    pub used_sources: Vec<SourceId>,
    pub documents: Vec<DocumentRef>,
    pub total_tokens: usize,
}

pub struct ContextBuilder {
    embedder: std::sync::Arc<Embedder>,
    chunker_config: ChunkerConfig,
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(embedder: std::sync::Arc<Embedder>, chunker_config: ChunkerConfig, config: ContextBuilderConfig) -> Self {
        Self { embedder, chunker_config, config }
    }

    /// Build a token-budgeted context pack from the Orchestrator's
    /// aggregated per-source results steps 1-7.
    pub fn build(&self, query_text: &str, results: &[SourceResult], token_budget: usize) -> Result<ContextPack, ContextError> {
        // Step 1: chunk every returned document.
        let mut candidates: Vec<(Chunk, Option<f64>)> = Vec::new();
        for result in results {
            for doc in &result.documents {
                for chunk in chunker::chunk_document(doc, &self.chunker_config) {
                    candidates.push((chunk, doc.score));
                }
            }
        }

        if candidates.is_empty() {
            return Ok(ContextPack { chunks: Vec::new(), used_sources: Vec::new(), documents: Vec::new(), total_tokens: 0 });
        }

        // Step 2: embed the query and all new chunks in one batched call.
        let query_vector = self.embedder.embed_one(query_text);
        let mut chunk_vectors = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(MAX_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            chunk_vectors.extend(self.embedder.embed_batch(&texts));
        }

        // Step 3: score. Native scores are min-max normalized across this
        // batch before being blended in, since sources report scores on
        // arbitrary scales.
        let native_scores: Vec<f64> = candidates.iter().map(|(_, s)| s.unwrap_or(0.0)).collect();
        let (native_min, native_max) = native_scores.iter().fold((f64::MAX, f64::MIN), |(lo, hi), &s| (lo.min(s), hi.max(s)));
        let native_span = (native_max - native_min).max(1e-9);

        let mut scored: Vec<(f64, Chunk)> = candidates
            .into_iter()
            .zip(chunk_vectors)
            .map(|((chunk, native), vector)| {
                let semantic = cosine(&query_vector, &vector);
                let score = match native {
                    Some(native_score) => {
                        let normalized = (native_score - native_min) / native_span;
                        0.7 * semantic + 0.3 * normalized
                    }
                    None => semantic,
                };
                (score, chunk)
            })
            .collect();

        // Step 4: stable-sort descending by score.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        // Step 5: dedupe by (source, doc_id): keep the highest scoring
        // chunk, plus up to `max_chunks_per_doc` more, in ordinal order.
        let mut per_doc_count: std::collections::HashMap<(SourceId, String), usize> = std::collections::HashMap::new();
        let mut kept: Vec<(f64, Chunk)> = Vec::new();
        for (score, chunk) in scored {
            let key = (chunk.source, chunk.doc_id.clone());
            let count = per_doc_count.entry(key).or_insert(0);
            if *count >= self.config.max_chunks_per_doc {
                continue;
            }
            *count += 1;
            kept.push((score, chunk));
        }

        // Re-sort per-document kept chunks by ordinal within their score
        // bucket is unnecessary for packing order; packing walks `kept` in
        // score order, but provenance dedup already guarantees at most
        // `max_chunks_per_doc` per document regardless of ordinal order.

        // Step 6: greedily pack under the token budget.
        let mut packed: Vec<Chunk> = Vec::new();
        let mut total_tokens = 0usize;
        let mut used_sources: HashSet<SourceId> = HashSet::new();
        let mut documents: Vec<DocumentRef> = Vec::new();
        let mut seen_docs: HashSet<(SourceId, String)> = HashSet::new();

        for (_, chunk) in kept {
            let cost = chunk.token_count + self.config.separator_overhead;
            if total_tokens + cost > token_budget {
                continue;
            }
            total_tokens += cost;
            used_sources.insert(chunk.source);
            let doc_key = (chunk.source, chunk.doc_id.clone());
            if seen_docs.insert(doc_key) {
                documents.push(DocumentRef { source: chunk.source, title: chunk.title.clone(), url: chunk.url.clone() });
            }
            packed.push(chunk);
        }

        Ok(ContextPack {
            chunks: packed,
            used_sources: used_sources.into_iter().collect(),
            documents,
            total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Document;
    use std::sync::Arc;

    fn doc(source: SourceId, id: &str, title: &str, body: &str, score: Option<f64>) -> Document {
        Document { id: id.into(), source, title: title.into(), url: None, body: body.into(), fetched_at: chrono::Utc::now(), score }
    }

    fn builder() -> ContextBuilder {
        ContextBuilder::new(Arc::new(Embedder::new()), ChunkerConfig::default(), ContextBuilderConfig::default())
    }

    #[test]
    fn packs_within_token_budget() {
        let cb = ContextBuilder::new(
            Arc::new(Embedder::new()),
            ChunkerConfig { chunk_max_tokens: 50, chunk_overlap: 10 },
            ContextBuilderConfig::default(),
        );
        let results = vec![SourceResult {
            source: SourceId::Jira,
            documents: vec![doc(SourceId::Jira, "D1", "t", &"word ".repeat(200), None)],
            error: None,
        }];
        let pack = cb.build("word", &results, 60).unwrap();
        assert!(pack.total_tokens <= 60);
        assert!(!pack.chunks.is_empty());
    }

    #[test]
    fn dedupes_by_doc_keeping_top_n_chunks() {
        let cb = builder();
        let body = "deploy production release ".repeat(200);
        let results = vec![SourceResult {
            source: SourceId::Confluence,
            documents: vec![doc(SourceId::Confluence, "D1", "Deploy Guide", &body, None)],
            error: None,
        }];
        let pack = cb.build("deploy production", &results, 100_000).unwrap();
        let from_d1 = pack.chunks.iter().filter(|c| c.doc_id == "D1").count();
        assert!(from_d1 <= ContextBuilderConfig::default().max_chunks_per_doc);
    }

    #[test]
    fn used_sources_only_includes_contributors() {
        let cb = builder();
        let results = vec![
            SourceResult { source: SourceId::Jira, documents: vec![doc(SourceId::Jira, "D1", "t1", "hello world", None)], error: None },
            SourceResult { source: SourceId::Slack, documents: vec![], error: Some("boom".into()) },
        ];
        let pack = cb.build("hello", &results, 10_000).unwrap();
        assert_eq!(pack.used_sources, vec![SourceId::Jira]);
    }

    #[test]
    fn empty_results_yield_empty_pack() {
        let cb = builder();
        let pack = cb.build("anything", &[], 1000).unwrap();
        assert!(pack.chunks.is_empty());
        assert!(pack.used_sources.is_empty());
        assert_eq!(pack.total_tokens, 0);
    }

    #[test]
    fn scores_are_non_increasing_after_sort() {
        let cb = builder();
        let results = vec![SourceResult {
            source: SourceId::Web,
            documents: vec![
                doc(SourceId::Web, "A", "a", "completely unrelated text about cats", None),
                doc(SourceId::Web, "B", "b", "how to deploy to production safely", None),
            ],
            error: None,
        }];
        let pack = cb.build("how do I deploy to production", &results, 100_000).unwrap();
        // The chunk from document B (on-topic) should be packed first.
        assert_eq!(pack.chunks.first().unwrap().doc_id, "B");
    }
}
