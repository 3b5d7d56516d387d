//! Token-aware document splitter
//!
//! No external tokenizer dependency: token count is approximated by
//! splitting on whitespace and punctuation. No provider in this crate
//! exposes an exact counter, so the heuristic is always taken (recorded
//! as an Open Question resolution in DESIGN.md).

use sha2::{Digest, Sha256};

use crate::types::{Chunk, Document};

/// Default maximum tokens per chunk
pub const DEFAULT_CHUNK_MAX_TOKENS: usize = 512;
/// Default overlap between adjacent windows
pub const DEFAULT_CHUNK_OVERLAP: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_max_tokens: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_max_tokens: DEFAULT_CHUNK_MAX_TOKENS,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split a document's body into whitespace-delimited tokens.
fn tokenize(body: &str) -> Vec<&str> {
    body.split_whitespace().collect()
}

fn chunk_id(source: &str, doc_id: &str, ordinal: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b":");
    hasher.update(doc_id.as_bytes());
    hasher.update(b":");
    hasher.update(ordinal.to_le_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Split `doc` into one or more overlapping [`Chunk`]s
///
/// A document whose body is within `chunk_max_tokens` yields exactly one
/// chunk. Windows advance by `chunk_max_tokens - chunk_overlap` tokens so
/// that re-joining non-overlapping spans reconstructs the token sequence.
pub fn chunk_document(doc: &Document, config: &ChunkerConfig) -> Vec<Chunk> {
    let tokens = tokenize(&doc.body);
    if tokens.is_empty() {
        return Vec::new();
    }

    let stride = config.chunk_max_tokens.saturating_sub(config.chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut ordinal: u32 = 0;
    let mut start = 0usize;

    while start < tokens.len() {
        let end = (start + config.chunk_max_tokens).min(tokens.len());
        let text = tokens[start..end].join(" ");
        let token_count = end - start;

        chunks.push(Chunk {
            id: chunk_id(doc.source.as_str(), &doc.id, ordinal),
            doc_id: doc.id.clone(),
            source: doc.source,
            title: doc.title.clone(),
            url: doc.url.clone(),
            text,
            token_count,
            ordinal,
        });

        ordinal += 1;
        if end == tokens.len() {
            break;
        }
        start += stride;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceId;

    fn doc_with_words(n: usize) -> Document {
        let body = (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        Document {
            id: "D1".into(),
            source: SourceId::Confluence,
            title: "Doc".into(),
            url: None,
            body,
            fetched_at: chrono::Utc::now(),
            score: None,
        }
    }

    #[test]
    fn short_document_yields_one_chunk() {
        let doc = doc_with_words(10);
        let chunks = chunk_document(&doc, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert!(chunks[0].token_count <= ChunkerConfig::default().chunk_max_tokens);
    }

    #[test]
    fn long_document_overlaps_and_is_ordered() {
        let config = ChunkerConfig { chunk_max_tokens: 10, chunk_overlap: 3 };
        let doc = doc_with_words(25);
        let chunks = chunk_document(&doc, &config);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i as u32);
            assert!(c.token_count <= config.chunk_max_tokens);
            assert_eq!(c.doc_id, "D1");
        }
    }

    #[test]
    fn stride_reconstructs_full_token_sequence() {
        let config = ChunkerConfig { chunk_max_tokens: 10, chunk_overlap: 3 };
        let doc = doc_with_words(25);
        let chunks = chunk_document(&doc, &config);
        let stride = config.chunk_max_tokens - config.chunk_overlap;

        // Taking the first `stride` tokens of every non-final chunk, plus
        // the whole final chunk, must reconstruct the original sequence.
        let mut reconstructed: Vec<&str> = Vec::new();
        for (i, c) in chunks.iter().enumerate() {
            let words: Vec<&str> = c.text.split(' ').collect();
            if i + 1 == chunks.len() {
                reconstructed.extend_from_slice(&words);
            } else {
                reconstructed.extend_from_slice(&words[..stride.min(words.len())]);
            }
        }
        assert_eq!(reconstructed, tokenize(&doc.body));
    }

    #[test]
    fn empty_body_yields_no_chunks() {
        let doc = doc_with_words(0);
        assert!(chunk_document(&doc, &ChunkerConfig::default()).is_empty());
    }

    #[test]
    fn chunk_ids_are_stable_and_unique_per_ordinal() {
        let doc = doc_with_words(30);
        let config = ChunkerConfig { chunk_max_tokens: 10, chunk_overlap: 2 };
        let a = chunk_document(&doc, &config);
        let b = chunk_document(&doc, &config);
        assert_eq!(a.iter().map(|c| &c.id).collect::<Vec<_>>(), b.iter().map(|c| &c.id).collect::<Vec<_>>());
        let ids: std::collections::HashSet<_> = a.iter().map(|c| &c.id).collect();
        assert_eq!(ids.len(), a.len());
    }
}
