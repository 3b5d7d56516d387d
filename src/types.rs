//! Core data model
//!
//! `Query`, `SourceId`, `Document`, `Chunk`, `Embedding`, `CacheEntry`,
//! `SelectionResult` and `Stage`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Opaque source identifier, drawn from the closed enumeration in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Confluence,
    Jira,
    Slack,
    Github,
    Google,
    Notion,
    Linear,
    Figma,
    Microsoft365,
    Devtools,
    Productivity,
    Web,
    VectorCache,
}

impl SourceId {
    /// All variants, in a stable, arbitrary enumeration order.
    pub const ALL: &'static [SourceId] = &[
        SourceId::Confluence,
        SourceId::Jira,
        SourceId::Slack,
        SourceId::Github,
        SourceId::Google,
        SourceId::Notion,
        SourceId::Linear,
        SourceId::Figma,
        SourceId::Microsoft365,
        SourceId::Devtools,
        SourceId::Productivity,
        SourceId::Web,
        SourceId::VectorCache,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Confluence => "confluence",
            SourceId::Jira => "jira",
            SourceId::Slack => "slack",
            SourceId::Github => "github",
            SourceId::Google => "google",
            SourceId::Notion => "notion",
            SourceId::Linear => "linear",
            SourceId::Figma => "figma",
            SourceId::Microsoft365 => "microsoft365",
            SourceId::Devtools => "devtools",
            SourceId::Productivity => "productivity",
            SourceId::Web => "web",
            SourceId::VectorCache => "vector_cache",
        }
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub max_sources: usize,
    pub per_source_limit: usize,
    pub token_budget: usize,
    pub streaming: bool,
    pub enabled_sources: HashSet<SourceId>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_sources: 6,
            per_source_limit: 10,
            token_budget: 4096,
            streaming: true,
            enabled_sources: SourceId::ALL.iter().copied().collect(),
        }
    }
}

/// A query accepted from an external caller. Immutable once accepted.
#[derive(Debug, Clone)]
pub struct Query {
    pub text: String,
    pub session_id: String,
    pub user_id: String,
    pub deadline: Instant,
    pub options: QueryOptions,
}

impl Query {
    pub fn new(text: impl Into<String>, session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self::with_options(text, session_id, user_id, QueryOptions::default(), Duration::from_secs(20))
    }

    pub fn with_options(
        text: impl Into<String>,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        options: QueryOptions,
        timeout: Duration,
    ) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            deadline: Instant::now() + timeout,
            options,
        }
    }

    pub fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// A document fetched from a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub source: SourceId,
    pub title: String,
    pub url: Option<String>,
    pub body: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    pub score: Option<f64>,
}

/// A bounded slice of a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub doc_id: String,
    pub source: SourceId,
    pub title: String,
    pub url: Option<String>,
    pub text: String,
    pub token_count: usize,
    pub ordinal: u32,
}

/// A fixed-dimension, L2-normalized embedding vector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
}

pub const EMBEDDING_DIM: usize = 384;

/// A persisted chunk+embedding pair in the vector cache
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub chunk: Chunk,
    pub embedding: Embedding,
    pub inserted_at: chrono::DateTime<chrono::Utc>,
    pub last_hit_at: chrono::DateTime<chrono::Utc>,
    pub hit_count: u64,
}

/// The Router's output: an ordered candidate source list
#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub sources: Vec<SourceId>,
    pub confidence: f64,
}

/// SSE event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    SourcesAnnounced,
    ContextReady,
    Token,
    Done,
    Error,
}
