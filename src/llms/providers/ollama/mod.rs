//! Ollama local-model streaming provider.
//!
//! A local-only deployment is a realistic configuration for a
//! self-hosted retrieval tool. Ollama's `/api/chat` streams newline-
//! delimited JSON objects rather than an SSE event framing, so this
//! provider parses lines directly instead of going through
//! `eventsource-stream`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::errors::{LlmErrorKind, LlmStreamError};
use crate::llms::provider::{LlmMessage, LlmProvider, LlmStream, StreamParams, Token};
use crate::settings::LlmProviderKind;

const CHANNEL_CAPACITY: usize = 256;

pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
        }
    }

    fn request_body(&self, messages: &[LlmMessage], params: &StreamParams) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let mut body = serde_json::json!({"model": params.model, "messages": messages, "stream": true});
        if let Some(t) = params.temperature {
            body["options"] = serde_json::json!({"temperature": t});
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::Ollama
    }

    async fn stream(&self, messages: Vec<LlmMessage>, params: StreamParams, cancel: CancellationToken) -> Result<LlmStream, LlmStreamError> {
        let body = self.request_body(&messages, &params);
        let url = format!("{}/api/chat", self.base_url);
        let idle_timeout = params.first_token_timeout;

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| classify_reqwest_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let byte_stream = response.bytes_stream().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        tokio::spawn(pump(byte_stream, tx, idle_timeout, cancel));
        Ok(ReceiverStream::new(rx))
    }
}

/// Split a byte stream on `\n` and parse each complete line as one Ollama
/// chat chunk. Ollama does not frame lines with SSE's `data:`/blank-line
/// convention, so there is no `eventsource()` adapter to reach for here.
async fn pump<S>(mut stream: S, tx: mpsc::Sender<Result<Token, LlmStreamError>>, idle_timeout: Duration, cancel: CancellationToken)
where
    S: futures::Stream<Item = std::io::Result<bytes::Bytes>> + Unpin,
{
    let mut buffer = String::new();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = timeout(idle_timeout, stream.next()) => next,
        };
        let chunk = match next {
            Ok(Some(Ok(bytes))) => bytes,
            Ok(Some(Err(e))) => {
                let _ = tx.send(Err(LlmStreamError::new(LlmErrorKind::UpstreamError, e.to_string()))).await;
                return;
            }
            Ok(None) => return,
            Err(_) => {
                let _ = tx.send(Err(LlmStreamError::new(LlmErrorKind::UpstreamTimeout, "idle timeout waiting for token"))).await;
                return;
            }
        };

        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(newline_pos) = buffer.find('\n') {
            let line = buffer[..newline_pos].trim().to_string();
            buffer.drain(..=newline_pos);
            if line.is_empty() {
                continue;
            }
            if !emit_line(&line, &tx).await {
                return;
            }
        }
    }
}

/// Parse and forward one JSON line; returns `false` once the stream should
/// stop (either `done: true` or an unrecoverable send failure).
async fn emit_line(line: &str, tx: &mpsc::Sender<Result<Token, LlmStreamError>>) -> bool {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return true,
    };

    if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
        let _ = tx.send(Err(LlmStreamError::new(LlmErrorKind::UpstreamError, err.to_string()))).await;
        return false;
    }

    if let Some(text) = value["message"]["content"].as_str() {
        if !text.is_empty() && tx.send(Ok(Token(text.to_string()))).await.is_err() {
            return false;
        }
    }

    if value["done"].as_bool().unwrap_or(false) {
        return false;
    }

    true
}

fn classify_reqwest_error(e: &reqwest::Error) -> LlmStreamError {
    if e.is_timeout() {
        LlmStreamError::new(LlmErrorKind::UpstreamTimeout, e.to_string())
    } else {
        LlmStreamError::new(LlmErrorKind::UpstreamError, e.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: String) -> LlmStreamError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmStreamError::new(LlmErrorKind::Auth, body),
        StatusCode::TOO_MANY_REQUESTS => LlmStreamError::new(LlmErrorKind::RateLimited, body),
        s if s.is_client_error() => LlmStreamError::new(LlmErrorKind::BadRequest, body),
        _ => LlmStreamError::new(LlmErrorKind::UpstreamError, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_line_forwards_content_and_continues() {
        let (tx, mut rx) = mpsc::channel(4);
        let more = emit_line(r#"{"message":{"content":"hel"},"done":false}"#, &tx).await;
        assert!(more);
        let token = rx.recv().await.unwrap().unwrap();
        assert_eq!(token.0, "hel");
    }

    #[tokio::test]
    async fn emit_line_stops_on_done() {
        let (tx, mut rx) = mpsc::channel(4);
        let more = emit_line(r#"{"message":{"content":""},"done":true}"#, &tx).await;
        assert!(!more);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_line_surfaces_error_field() {
        let (tx, mut rx) = mpsc::channel(4);
        let more = emit_line(r#"{"error":"model not found"}"#, &tx).await;
        assert!(!more);
        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.kind, LlmErrorKind::UpstreamError);
    }

    #[test]
    fn request_body_sets_stream_true() {
        let provider = OllamaProvider::new(None);
        let body = provider.request_body(&[LlmMessage::user("hi")], &StreamParams::new("llama3"));
        assert_eq!(body["stream"], true);
    }
}
