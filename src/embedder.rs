//! Deterministic local embedder
//!
//! No network call, no GPU model: text is embedded via feature hashing
//! (hash overlapping word n-grams into a fixed-width vector, then
//! L2-normalize) — a documented fallback path for deployments with no
//! ONNX model available. Fully deterministic, and warm-up is a no-op
//! since there is no model to load.

use crate::types::EMBEDDING_DIM;

/// Maximum batch size per `embed_batch` call
pub const MAX_BATCH_SIZE: usize = 32;

/// Deterministic, local, hash-based text embedder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Embedder;

impl Embedder {
    pub fn new() -> Self {
        Self
    }

    /// No-op: there is no model to load, but the method exists so callers
    /// that always warm up on startup don't need to special-case this
    /// embedder ( "first-call latency is not acceptable").
    pub fn warm_up(&self) {}

    /// Embed a batch of texts (`<= MAX_BATCH_SIZE` at a time; larger
    /// inputs are chunked internally by the caller
    pub fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; EMBEDDING_DIM];
        let tokens: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .collect();

        // Hash unigrams and bigrams; a bigram captures a little local
        // order information a pure bag-of-words hash would lose.
        for window in tokens.windows(1).chain(tokens.windows(2).take(tokens.len())) {
            let gram = window.join(" ").to_lowercase();
            let (bucket, sign) = hash_to_bucket(&gram, EMBEDDING_DIM);
            v[bucket] += sign;
        }

        l2_normalize(&mut v);
        v
    }
}

/// Hash a token into a `(bucket, sign)` pair using the hashing trick
/// (signed random projection avoids systematic bias toward one axis).
fn hash_to_bucket(s: &str, dim: usize) -> (usize, f32) {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut hasher);
    let h = hasher.finish();
    let bucket = (h % dim as u64) as usize;
    let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
    (bucket, sign)
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two pre-normalized vectors reduces to a dot
/// product invariant.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| *x as f64 * *y as f64).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_are_unit_length() {
        let e = Embedder::new();
        for v in e.embed_batch(&["hello world".into(), "".into(), "a b c d e f g".into()]) {
            let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
            assert!((norm - 1.0).abs() < 1e-6 || norm == 0.0, "norm={norm}");
        }
    }

    #[test]
    fn deterministic_for_same_input() {
        let e = Embedder::new();
        assert_eq!(e.embed_one("deploy to production"), e.embed_one("deploy to production"));
    }

    #[test]
    fn similar_texts_score_higher_than_unrelated() {
        let e = Embedder::new();
        let a = e.embed_one("how do I deploy to production");
        let b = e.embed_one("deployment process for production releases");
        let c = e.embed_one("what is the capital of france");
        assert!(cosine(&a, &b) > cosine(&a, &c));
    }

    #[test]
    fn empty_text_yields_zero_vector_not_nan() {
        let e = Embedder::new();
        let v = e.embed_one("");
        assert!(v.iter().all(|x| x.is_finite()));
    }
}
