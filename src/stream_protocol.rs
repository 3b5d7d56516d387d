//! Server-sent-event wire format
//!
//! Implemented over `axum::response::sse::{Sse, Event}`, the natural SSE
//! primitive for an axum-based server. Exactly one of `done`/`error`
//! terminates a stream.

use axum::response::sse::Event;
use serde::Serialize;

use crate::context_builder::DocumentRef;
use crate::types::SourceId;

#[derive(Debug, Clone, Serialize)]
pub struct WireDocument {
    pub source: SourceId,
    pub title: String,
    pub url: Option<String>,
}

impl From<&DocumentRef> for WireDocument {
    fn from(d: &DocumentRef) -> Self {
        Self { source: d.source, title: d.title.clone(), url: d.url.clone() }
    }
}

/// One event on the `/chat/stream` wire table verbatim.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Start,
    Sources { sources: Vec<SourceId> },
    Context { count: usize, used_sources: Vec<SourceId>, documents: Vec<WireDocument> },
    Chunk { text: String },
    Done { sources: Vec<SourceId>, used_sources: Vec<SourceId>, documents: Vec<WireDocument> },
    Error { message: String, kind: String },
}

#[derive(Serialize)]
struct EmptyPayload {}

#[derive(Serialize)]
struct SourcesPayload<'a> {
    sources: &'a [SourceId],
}

#[derive(Serialize)]
struct ContextPayload<'a> {
    count: usize,
    used_sources: &'a [SourceId],
    documents: &'a [WireDocument],
}

#[derive(Serialize)]
struct ChunkPayload<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct DonePayload<'a> {
    sources: &'a [SourceId],
    used_sources: &'a [SourceId],
    documents: &'a [WireDocument],
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    message: &'a str,
    kind: &'a str,
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::Start => "start",
            StreamEvent::Sources { .. } => "sources",
            StreamEvent::Context { .. } => "context",
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Serialize this event's JSON payload (independent of the SSE framing),
    /// used both by the `/chat/stream` SSE writer and the non-streaming
    /// `/chat` handler, which drains a full run and folds it into one
    /// `{response, sources, used_sources, documents}` JSON body.
    pub fn payload_json(&self) -> serde_json::Value {
        match self {
            StreamEvent::Start => serde_json::to_value(EmptyPayload {}).unwrap(),
            StreamEvent::Sources { sources } => serde_json::to_value(SourcesPayload { sources }).unwrap(),
            StreamEvent::Context { count, used_sources, documents } => {
                serde_json::to_value(ContextPayload { count: *count, used_sources, documents }).unwrap()
            }
            StreamEvent::Chunk { text } => serde_json::to_value(ChunkPayload { text }).unwrap(),
            StreamEvent::Done { sources, used_sources, documents } => {
                serde_json::to_value(DonePayload { sources, used_sources, documents }).unwrap()
            }
            StreamEvent::Error { message, kind } => serde_json::to_value(ErrorPayload { message, kind }).unwrap(),
        }
    }

    pub fn to_sse_event(&self) -> Event {
        Event::default().event(self.event_type()).data(self.payload_json().to_string())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}
