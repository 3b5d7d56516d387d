//! Top-level composer
//!
//! Accepts a [`crate::types::Query`] and a resolved [`Settings`], drives
//! Router → Orchestrator → ContextBuilder → LlmProvider in sequence, and
//! emits [`StreamEvent`]s on a channel the caller forwards as SSE (or
//! drains to a single JSON response for the non-streaming `/chat` route).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::core::Core;
use crate::errors::{PipelineError, PipelineErrorKind};
use crate::llms::provider::{LlmMessage, StreamParams};
use crate::llms::providers::build_provider;
use crate::settings::{Settings, Turn};
use crate::stream_protocol::{StreamEvent, WireDocument};
use crate::types::Query;

const CHANNEL_CAPACITY: usize = 256;
/// Default number of prior turns included in the LLM message list.
const DEFAULT_HISTORY_TURNS: usize = 6;

/// Run one query end to end, returning a stream of wire events and the
/// cancellation token that governs it.
///
/// The returned stream cancels `cancel` on drop — a client disconnecting
/// mid-SSE-write drops the response body future, which drops this stream,
/// which cancels every in-flight source fetch and the LLM request, per
/// cancellation model.
pub fn run(core: Arc<Core>, query: Query, settings: Settings) -> CancelOnDrop<ReceiverStream<StreamEvent>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        drive(core, query, settings, tx, task_cancel).await;
    });

    CancelOnDrop { inner: ReceiverStream::new(rx), cancel }
}

/// Wraps a stream so that dropping it (client disconnect, body future
/// dropped by axum) cancels the query's [`CancellationToken`].
pub struct CancelOnDrop<S> {
    inner: S,
    cancel: CancellationToken,
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for CancelOnDrop<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn drive(core: Arc<Core>, mut query: Query, settings: Settings, tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) {
    if tx.send(StreamEvent::Start).await.is_err() {
        return;
    }

    // Resolved before any source fetch: a misconfigured LLM must
    // short-circuit before a single network call or cache write happens,
    // not after paying for a fan-out whose answer can never be generated.
    let provider = match build_provider(&settings) {
        Ok(p) => p,
        Err(e) => {
            send_error(&tx, e).await;
            return;
        }
    };

    query.options.enabled_sources = settings.enabled_sources.clone();

    let availability = core.orchestrator.availability_snapshot().await;
    let selection = core.router.select(&query.text, &query.options, &availability);
    if tx.send(StreamEvent::Sources { sources: selection.sources.clone() }).await.is_err() {
        return;
    }

    if query.deadline_exceeded() {
        send_error(&tx, PipelineError::new(PipelineErrorKind::Deadline, "query deadline exceeded before any source fetch")).await;
        return;
    }

    let results = core
        .orchestrator
        .run(&selection.sources, &query.text, query.options.per_source_limit, query.deadline, &cancel)
        .await;

    let pack = match core.context_builder.build(&query.text, &results, query.options.token_budget) {
        Ok(p) => p,
        Err(e) => {
            send_error(&tx, PipelineError::internal(e.to_string())).await;
            return;
        }
    };

    let documents: Vec<WireDocument> = pack.documents.iter().map(WireDocument::from).collect();
    if tx
        .send(StreamEvent::Context { count: pack.chunks.len(), used_sources: pack.used_sources.clone(), documents: documents.clone() })
        .await
        .is_err()
    {
        return;
    }

    if query.deadline_exceeded() && pack.chunks.is_empty() {
        send_error(&tx, PipelineError::new(PipelineErrorKind::Deadline, "query deadline exceeded before any usable context")).await;
        return;
    }

    let history = core.store.get_history(&query.session_id).await.unwrap_or_default();
    let messages = build_messages(&pack, &history, &query.text);
    let params = StreamParams::new(settings.llm_model.clone());

    let mut stream = match provider.stream(messages, params, cancel.clone()).await {
        Ok(s) => s,
        Err(e) => {
            send_error(&tx, e.into()).await;
            return;
        }
    };

    let mut answer = String::new();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(token)) => {
                answer.push_str(&token.0);
                if tx.send(StreamEvent::Chunk { text: token.0 }).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                send_error(&tx, e.into()).await;
                return;
            }
            None => break,
        }
    }

    // Only a complete answer is persisted: a
    // mid-stream LLM failure must not leave a transcript entry behind.
    let turn = Turn {
        user_message: query.text.clone(),
        bot_response: answer,
        sources: selection.sources.clone(),
        used_sources: pack.used_sources.clone(),
        timestamp: chrono::Utc::now(),
    };
    if let Err(e) = core.store.append_turn(&query.session_id, &turn).await {
        tracing::warn!(error = %e, "failed to persist transcript turn");
    }

    let _ = tx.send(StreamEvent::Done { sources: selection.sources, used_sources: pack.used_sources, documents }).await;
}

/// Builds `[system_prompt_with_instructions + context_block, prior_history?, user_question]`.
/// The system prompt and context block are folded into one system message
/// since not every provider family accepts more than one.
fn build_messages(pack: &crate::context_builder::ContextPack, history: &[Turn], question: &str) -> Vec<LlmMessage> {
    let mut messages = vec![LlmMessage::system(render_system_prompt(pack))];

    let recent = history.iter().rev().take(DEFAULT_HISTORY_TURNS).collect::<Vec<_>>();
    for turn in recent.into_iter().rev() {
        messages.push(LlmMessage::user(turn.user_message.clone()));
        messages.push(LlmMessage::assistant(turn.bot_response.clone()));
    }

    messages.push(LlmMessage::user(question.to_string()));
    messages
}

fn render_system_prompt(pack: &crate::context_builder::ContextPack) -> String {
    if pack.chunks.is_empty() {
        return "You are a helpful assistant. No supporting context was found for this question; \
                answer from general knowledge and say so if you are unsure."
            .to_string();
    }

    let mut prompt = String::from(
        "You are a helpful assistant. Answer the user's question using only the context below \
         when it is relevant, and cite sources by title. If the context does not answer the \
         question, say so.\n\n",
    );
    for chunk in &pack.chunks {
        prompt.push_str(&format!("--- {} ({}) ---\n{}\n\n", chunk.title, chunk.source, chunk.text));
    }
    prompt
}

async fn send_error(tx: &mpsc::Sender<StreamEvent>, err: PipelineError) {
    let _ = tx.send(StreamEvent::Error { message: err.message.clone(), kind: err.kind.to_string() }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_builder::{ContextBuilder, ContextBuilderConfig};
    use crate::chunker::ChunkerConfig;
    use crate::embedder::Embedder;
    use crate::orchestrator::SourceResult;
    use crate::types::{Document, SourceId};

    #[test]
    fn system_prompt_is_neutral_when_context_is_empty() {
        let pack = crate::context_builder::ContextPack { chunks: vec![], used_sources: vec![], documents: vec![], total_tokens: 0 };
        let prompt = render_system_prompt(&pack);
        assert!(prompt.contains("No supporting context"));
    }

    #[test]
    fn build_messages_ends_with_the_question_and_includes_history() {
        let cb = ContextBuilder::new(Arc::new(Embedder::new()), ChunkerConfig::default(), ContextBuilderConfig::default());
        let results = vec![SourceResult {
            source: SourceId::Jira,
            documents: vec![Document {
                id: "D1".into(),
                source: SourceId::Jira,
                title: "t".into(),
                url: None,
                body: "hello world".into(),
                fetched_at: chrono::Utc::now(),
                score: None,
            }],
            error: None,
        }];
        let pack = cb.build("hello", &results, 10_000).unwrap();
        let history = vec![Turn {
            user_message: "earlier question".into(),
            bot_response: "earlier answer".into(),
            sources: vec![],
            used_sources: vec![],
            timestamp: chrono::Utc::now(),
        }];
        let messages = build_messages(&pack, &history, "new question");
        assert_eq!(messages.last().unwrap().content, "new question");
        assert!(messages.iter().any(|m| m.content == "earlier question"));
    }

    #[test]
    fn history_is_truncated_to_default_turn_budget() {
        let history: Vec<Turn> = (0..10)
            .map(|i| Turn {
                user_message: format!("q{i}"),
                bot_response: format!("a{i}"),
                sources: vec![],
                used_sources: vec![],
                timestamp: chrono::Utc::now(),
            })
            .collect();
        let pack = crate::context_builder::ContextPack { chunks: vec![], used_sources: vec![], documents: vec![], total_tokens: 0 };
        let messages = build_messages(&pack, &history, "latest");
        // system + 6 turns * 2 + question
        assert_eq!(messages.len(), 1 + DEFAULT_HISTORY_TURNS * 2 + 1);
        assert!(messages.iter().any(|m| m.content == "q9"));
        assert!(!messages.iter().any(|m| m.content == "q3"));
    }
}
