//! Persistent semantic index
//!
//! Backed by `rusqlite` (bundled): one connection, `CREATE TABLE IF NOT
//! EXISTS` at open time, blocking calls wrapped in `spawn_blocking` for
//! async callers. Writes are serialized through a single long-lived
//! `Mutex<Connection>`, and a batch insert runs as one transaction so a
//! partially written batch rolls back instead of corrupting the index.
//!
//! `Query` does a linear scan computing cosine similarity (a dot product,
//! since embeddings are pre-normalized). Acceptable at the default
//! `capacity`; swapping in an ANN index if capacity must grow past that
//! point is an open question recorded in DESIGN.md.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::embedder::cosine;
use crate::errors::VectorCacheError;
use crate::types::{CacheEntry, Chunk, Embedding, SourceId};

/// Default minimum cosine similarity for a hit to be returned
pub const DEFAULT_MIN_SCORE: f64 = 0.35;
/// Default chunk capacity before LRU eviction kicks in
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Persisted semantic index mapping chunk -> embedding + metadata.
pub struct VectorCache {
    conn: Arc<Mutex<Connection>>,
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vector(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect()
}

fn parse_source(s: &str) -> Option<SourceId> {
    SourceId::ALL.iter().copied().find(|id| id.as_str() == s)
}

impl VectorCache {
    /// Open (creating if absent) the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self, VectorCacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache_chunks (
                chunk_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                title TEXT NOT NULL,
                url TEXT,
                text TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                vector BLOB NOT NULL,
                inserted_at TEXT NOT NULL,
                last_hit_at TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1,
                UNIQUE(source, doc_id, ordinal)
            );
            CREATE INDEX IF NOT EXISTS idx_cache_chunks_last_hit ON cache_chunks(last_hit_at);",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Open an in-memory cache, for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, VectorCacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE cache_chunks (
                chunk_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                doc_id TEXT NOT NULL,
                ordinal INTEGER NOT NULL,
                title TEXT NOT NULL,
                url TEXT,
                text TEXT NOT NULL,
                token_count INTEGER NOT NULL,
                vector BLOB NOT NULL,
                inserted_at TEXT NOT NULL,
                last_hit_at TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL DEFAULT 1,
                UNIQUE(source, doc_id, ordinal)
            );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Idempotent insert: re-inserting `(source, doc_id, ordinal)` bumps
    /// `last_hit_at` and `version` without duplicating the row
    pub async fn insert(&self, chunks: &[Chunk], embeddings: &[Embedding]) -> Result<(), VectorCacheError> {
        debug_assert_eq!(chunks.len(), embeddings.len());
        let conn = Arc::clone(&self.conn);
        let chunks = chunks.to_vec();
        let embeddings = embeddings.to_vec();
        tokio::task::spawn_blocking(move || -> Result<(), VectorCacheError> {
            let now = Utc::now();
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            for (chunk, embedding) in chunks.iter().zip(embeddings.iter()) {
                tx.execute(
                    "INSERT INTO cache_chunks
                        (chunk_id, source, doc_id, ordinal, title, url, text, token_count, vector, inserted_at, last_hit_at, hit_count, version)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10, 0, 1)
                     ON CONFLICT(source, doc_id, ordinal) DO UPDATE SET
                        last_hit_at = excluded.last_hit_at,
                        version = version + 1",
                    params![
                        chunk.id,
                        chunk.source.as_str(),
                        chunk.doc_id,
                        chunk.ordinal,
                        chunk.title,
                        chunk.url,
                        chunk.text,
                        chunk.token_count as i64,
                        vector_to_blob(&embedding.vector),
                        now.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    /// k-nearest by cosine similarity, filtered by `min_score`
    /// Every returned hit's `last_hit_at` is bumped (it just informed a query).
    pub async fn query(&self, vector: &[f32], k: usize, min_score: f64) -> Result<Vec<CacheEntry>, VectorCacheError> {
        let conn = Arc::clone(&self.conn);
        let vector = vector.to_vec();
        tokio::task::spawn_blocking(move || -> Result<Vec<CacheEntry>, VectorCacheError> {
            let conn = conn.lock();
            let mut stmt = conn.prepare(
                "SELECT chunk_id, source, doc_id, ordinal, title, url, text, token_count, vector, inserted_at, last_hit_at, hit_count
                 FROM cache_chunks",
            )?;
            let rows = stmt.query_map([], |row| {
                let chunk_id: String = row.get(0)?;
                let source: String = row.get(1)?;
                let doc_id: String = row.get(2)?;
                let ordinal: i64 = row.get(3)?;
                let title: String = row.get(4)?;
                let url: Option<String> = row.get(5)?;
                let text: String = row.get(6)?;
                let token_count: i64 = row.get(7)?;
                let vector_blob: Vec<u8> = row.get(8)?;
                let inserted_at: String = row.get(9)?;
                let last_hit_at: String = row.get(10)?;
                let hit_count: i64 = row.get(11)?;
                Ok((chunk_id, source, doc_id, ordinal, title, url, text, token_count, vector_blob, inserted_at, last_hit_at, hit_count))
            })?;

            let mut scored: Vec<(f64, CacheEntry)> = Vec::new();
            for row in rows {
                let (chunk_id, source, doc_id, ordinal, title, url, text, token_count, vector_blob, inserted_at, last_hit_at, hit_count) = row?;
                let Some(source_id) = parse_source(&source) else { continue };
                let stored_vector = blob_to_vector(&vector_blob);
                let score = cosine(&vector, &stored_vector);
                if score < min_score {
                    continue;
                }
                let entry = CacheEntry {
                    chunk: Chunk {
                        id: chunk_id,
                        doc_id,
                        source: source_id,
                        title,
                        url,
                        text,
                        token_count: token_count as usize,
                        ordinal: ordinal as u32,
                    },
                    embedding: Embedding { chunk_id: String::new(), vector: stored_vector },
                    inserted_at: DateTime::parse_from_rfc3339(&inserted_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
                    last_hit_at: DateTime::parse_from_rfc3339(&last_hit_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
                    hit_count: hit_count as u64,
                };
                scored.push((score, entry));
            }
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(k);

            let now = Utc::now().to_rfc3339();
            for (_, entry) in &scored {
                conn.execute(
                    "UPDATE cache_chunks SET last_hit_at = ?1, hit_count = hit_count + 1 WHERE chunk_id = ?2",
                    params![now, entry.chunk.id],
                )?;
            }

            Ok(scored.into_iter().map(|(_, e)| e).collect())
        })
        .await?
    }

    pub async fn len(&self) -> Result<usize, VectorCacheError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<usize, VectorCacheError> {
            let conn = conn.lock();
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_chunks", [], |r| r.get(0))?;
            Ok(count as usize)
        })
        .await?
    }

    pub async fn is_empty(&self) -> Result<bool, VectorCacheError> {
        Ok(self.len().await? == 0)
    }

    /// LRU eviction by `last_hit_at` trims the cache down to
    /// `target_size` entries when it exceeds `capacity`.
    pub async fn evict(&self, target_size: usize) -> Result<usize, VectorCacheError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<usize, VectorCacheError> {
            let conn = conn.lock();
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM cache_chunks", [], |r| r.get(0))?;
            let to_remove = (total as i64 - target_size as i64).max(0);
            if to_remove == 0 {
                return Ok(0);
            }
            let removed = conn.execute(
                "DELETE FROM cache_chunks WHERE chunk_id IN (
                    SELECT chunk_id FROM cache_chunks ORDER BY last_hit_at ASC LIMIT ?1
                )",
                params![to_remove],
            )?;
            Ok(removed)
        })
        .await?
    }

    /// Evict down to `capacity` if the cache has grown past it.
    pub async fn evict_if_over_capacity(&self, capacity: usize) -> Result<usize, VectorCacheError> {
        if self.len().await? > capacity {
            self.evict(capacity).await
        } else {
            Ok(0)
        }
    }

    #[cfg(test)]
    async fn oldest_and_newest_last_hit(&self) -> Option<(String, String)> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.query_row("SELECT MIN(last_hit_at), MAX(last_hit_at) FROM cache_chunks", [], |r| Ok((r.get(0)?, r.get(1)?)))
                .optional()
                .ok()
                .flatten()
        })
        .await
        .ok()
        .flatten()
    }
}

/// Shared, thread-safe handle, as [`crate::core::Core`] holds it.
pub type SharedVectorCache = Arc<VectorCache>;

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(source: SourceId, doc_id: &str, ordinal: u32, text: &str) -> Chunk {
        Chunk {
            id: format!("{}-{}-{}", source.as_str(), doc_id, ordinal),
            doc_id: doc_id.into(),
            source,
            title: "t".into(),
            url: None,
            text: text.into(),
            token_count: text.split_whitespace().count(),
            ordinal,
        }
    }

    fn embedding(id: &str, v: Vec<f32>) -> Embedding {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        Embedding { chunk_id: id.into(), vector: v.iter().map(|x| x / norm).collect() }
    }

    #[tokio::test]
    async fn insert_then_query_finds_similar_vector() {
        let cache = VectorCache::open_in_memory().unwrap();
        let c = chunk(SourceId::Confluence, "D1", 0, "deployment process");
        let e = embedding(&c.id, vec![1.0, 0.0, 0.0]);
        cache.insert(&[c.clone()], &[e.clone()]).await.unwrap();

        let hits = cache.query(&e.vector, 5, 0.5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.doc_id, "D1");
    }

    #[tokio::test]
    async fn query_filters_by_min_score() {
        let cache = VectorCache::open_in_memory().unwrap();
        let c = chunk(SourceId::Confluence, "D1", 0, "x");
        let e = embedding(&c.id, vec![1.0, 0.0, 0.0]);
        cache.insert(&[c], &[e]).await.unwrap();

        let orthogonal = vec![0.0, 1.0, 0.0];
        let hits = cache.query(&orthogonal, 5, 0.35).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_source_doc_ordinal() {
        let cache = VectorCache::open_in_memory().unwrap();
        let c = chunk(SourceId::Jira, "D1", 0, "x");
        let e = embedding(&c.id, vec![1.0, 0.0, 0.0]);
        cache.insert(&[c.clone()], &[e.clone()]).await.unwrap();
        cache.insert(&[c], &[e]).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn evict_trims_to_target_keeping_most_recently_hit() {
        let cache = VectorCache::open_in_memory().unwrap();
        for i in 0..5 {
            let c = chunk(SourceId::Github, &format!("D{i}"), 0, "x");
            let e = embedding(&c.id, vec![1.0, i as f32 * 0.01, 0.0]);
            cache.insert(&[c], &[e]).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert_eq!(cache.len().await.unwrap(), 5);
        let removed = cache.evict(2).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(cache.len().await.unwrap(), 2);

        if let Some((oldest_survivor, _newest)) = cache.oldest_and_newest_last_hit().await {
            // every surviving entry's last_hit_at >= every evicted entry's
            // is implied by keeping the 2 most recently touched rows.
            assert!(!oldest_survivor.is_empty());
        }
    }

    #[tokio::test]
    async fn evict_if_over_capacity_is_noop_under_capacity() {
        let cache = VectorCache::open_in_memory().unwrap();
        let c = chunk(SourceId::Web, "D1", 0, "x");
        let e = embedding(&c.id, vec![1.0, 0.0, 0.0]);
        cache.insert(&[c], &[e]).await.unwrap();
        assert_eq!(cache.evict_if_over_capacity(10).await.unwrap(), 0);
    }
}
