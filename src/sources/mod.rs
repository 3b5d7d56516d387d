//! Source adapters
//!
//! Every external knowledge source exposes the same `Search/Healthy/Id`
//! contract. Adapters own wire calls and shape normalization
//! only; rate limiting and circuit breaking live one layer up, in
//! [`crate::orchestrator::Orchestrator`], which wraps every registry entry
//! with its own `RateGate` + `CircuitBreaker`.

mod http_sources;
mod registry;
mod vector_cache_adapter;
mod web;

pub use registry::{SourceEntry, SourceRegistry};
pub use vector_cache_adapter::VectorCacheAdapter;

use async_trait::async_trait;

use crate::errors::SourceError;
use crate::types::{Document, SourceId};

/// Uniform contract every integration satisfies
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Search this source, returning at most `limit` documents.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>, SourceError>;

    /// Cheap readiness probe; Router uses this to avoid dead sources.
    async fn healthy(&self) -> bool {
        true
    }

    fn id(&self) -> SourceId;
}

pub use http_sources::{
    ConfluenceAdapter, GithubAdapter, JiraAdapter, NotionAdapter, SlackAdapter,
    UnconfiguredAdapter,
};
pub use web::WebSearchAdapter;
