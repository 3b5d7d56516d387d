//! Error taxonomy for the query orchestrator.
//!
//! Each component owns a narrow `thiserror` enum. [`PipelineError`] is the
//! only type that carries a wire-visible `kind()`, mapping onto the closed
//! set of error kinds the `error` SSE event reports to clients.

use thiserror::Error;

/// Errors from [`crate::rate_gate::RateGate`].
#[derive(Debug, Error)]
pub enum RateGateError {
    #[error("rate limit could not admit before the deadline")]
    DeadlineExceeded,
}

/// Errors from [`crate::circuit_breaker::CircuitBreaker`].
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit is open, calls are rejected")]
    Open,
}

/// Errors from a [`crate::sources::SourceAdapter`] call.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate gate: {0}")]
    RateLimited(#[from] RateGateError),

    #[error("circuit breaker: {0}")]
    Unavailable(#[from] CircuitBreakerError),

    #[error("source deadline exceeded")]
    DeadlineExceeded,

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("client error from upstream (not retried): {0}")]
    Permanent(String),

    #[error("upstream rate limited, retry after {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("cancelled")]
    Cancelled,
}

/// Errors from [`crate::embedder::Embedder`].
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding batch failed: {0}")]
    Batch(String),
}

/// Errors from [`crate::vector_cache::VectorCache`].
#[derive(Debug, Error)]
pub enum VectorCacheError {
    #[error("vector cache storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("vector cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vector cache background task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Errors from [`crate::orchestrator::Orchestrator`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("query deadline exceeded before any source reported")]
    DeadlineExceeded,
}

/// Errors from [`crate::context_builder::ContextBuilder`].
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("embedding failed while building context: {0}")]
    Embed(#[from] EmbedError),
}

/// The closed set of provider-neutral LLM error kinds.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    #[error("auth")]
    Auth,
    #[error("rate_limited")]
    RateLimited,
    #[error("bad_request")]
    BadRequest,
    #[error("upstream_timeout")]
    UpstreamTimeout,
    #[error("upstream_error")]
    UpstreamError,
}

/// Errors from [`crate::llms::streamer::LLMStreamer`].
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct LlmStreamError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmStreamError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// The closed, wire-visible error taxonomy from
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    #[error("auth")]
    Auth,
    #[error("config")]
    Config,
    #[error("rate_limited")]
    RateLimited,
    #[error("upstream_timeout")]
    UpstreamTimeout,
    #[error("upstream_error")]
    UpstreamError,
    #[error("deadline")]
    Deadline,
    #[error("client_slow")]
    ClientSlow,
    #[error("internal")]
    Internal,
}

/// A terminal pipeline failure, carrying the `kind` surfaced on the wire.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: PipelineErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Config, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(PipelineErrorKind::Internal, message)
    }
}

impl From<LlmStreamError> for PipelineError {
    fn from(e: LlmStreamError) -> Self {
        let kind = match e.kind {
            LlmErrorKind::Auth => PipelineErrorKind::Auth,
            LlmErrorKind::RateLimited => PipelineErrorKind::RateLimited,
            LlmErrorKind::BadRequest => PipelineErrorKind::Internal,
            LlmErrorKind::UpstreamTimeout => PipelineErrorKind::UpstreamTimeout,
            LlmErrorKind::UpstreamError => PipelineErrorKind::UpstreamError,
        };
        PipelineError::new(kind, e.message)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        PipelineError::internal(e.to_string())
    }
}
