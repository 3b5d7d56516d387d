//! # contextline
//!
//! A retrieval-augmented query orchestrator: it classifies an incoming
//! question, fans out to the knowledge sources most likely to answer it,
//! assembles a token-budgeted context pack, and streams a generated answer
//! back over Server-Sent Events.
//!
//! The pipeline is [`query_pipeline::run`], composed from the components
//! below and driven from a single long-lived [`core::Core`] built once at
//! process start.

pub mod chunker;
pub mod circuit_breaker;
pub mod config;
pub mod context_builder;
pub mod core;
pub mod embedder;
pub mod errors;
pub mod llms;
pub mod orchestrator;
pub mod query_pipeline;
pub mod rate_gate;
pub mod router;
pub mod server;
pub mod settings;
pub mod sources;
pub mod store;
pub mod stream_protocol;
pub mod types;
pub mod vector_cache;

pub use core::Core;
pub use errors::{PipelineError, PipelineErrorKind};
pub use types::{Document, Query, QueryOptions, SourceId};

/// Crate version, surfaced on `GET /health`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
