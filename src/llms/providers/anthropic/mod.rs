//! Anthropic Messages API streaming provider.
//!
//! The Messages API extracts `system` as a top-level field rather than a
//! message with role `system`, and its SSE stream is typed (`event:` names
//! like `content_block_delta`) rather than OpenAI's single implicit event.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::errors::{LlmErrorKind, LlmStreamError};
use crate::llms::provider::{LlmMessage, LlmProvider, LlmRole, LlmStream, StreamParams, Token};
use crate::settings::LlmProviderKind;

const CHANNEL_CAPACITY: usize = 256;
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com/v1".to_string()),
            api_key: api_key.into(),
        }
    }

    fn request_body(&self, messages: &[LlmMessage], params: &StreamParams) -> serde_json::Value {
        let system: String = messages
            .iter()
            .filter(|m| m.role == LlmRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let turns: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": params.model,
            "messages": turns,
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system);
        }
        if let Some(t) = params.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::Anthropic
    }

    async fn stream(&self, messages: Vec<LlmMessage>, params: StreamParams, cancel: CancellationToken) -> Result<LlmStream, LlmStreamError> {
        let body = self.request_body(&messages, &params);
        let url = format!("{}/messages", self.base_url);
        let idle_timeout = params.first_token_timeout;

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

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

async fn pump<S>(stream: S, tx: mpsc::Sender<Result<Token, LlmStreamError>>, idle_timeout: Duration, cancel: CancellationToken)
where
    S: futures::Stream<Item = std::io::Result<bytes::Bytes>> + Unpin,
{
    let mut stream = stream.eventsource();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = timeout(idle_timeout, stream.next()) => next,
        };
        match next {
            Ok(Some(Ok(event))) => match event.event.as_str() {
                "content_block_delta" => {
                    let chunk: serde_json::Value = match serde_json::from_str(&event.data) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    if let Some(text) = chunk["delta"]["text"].as_str() {
                        if !text.is_empty() && tx.send(Ok(Token(text.to_string()))).await.is_err() {
                            return;
                        }
                    }
                }
                "message_stop" => return,
                "error" => {
                    let chunk: serde_json::Value = serde_json::from_str(&event.data).unwrap_or_default();
                    let message = chunk["error"]["message"].as_str().unwrap_or("anthropic stream error").to_string();
                    let _ = tx.send(Err(LlmStreamError::new(LlmErrorKind::UpstreamError, message))).await;
                    return;
                }
                _ => continue,
            },
            Ok(Some(Err(e))) => {
                let _ = tx.send(Err(LlmStreamError::new(LlmErrorKind::UpstreamError, e.to_string()))).await;
                return;
            }
            Ok(None) => return,
            Err(_) => {
                let _ = tx.send(Err(LlmStreamError::new(LlmErrorKind::UpstreamTimeout, "idle timeout waiting for token"))).await;
                return;
            }
        }
    }
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

    #[test]
    fn request_body_extracts_system_message_as_top_level_field() {
        let provider = AnthropicProvider::new("key", None);
        let messages = vec![LlmMessage::system("be terse"), LlmMessage::user("hi")];
        let body = provider.request_body(&messages, &StreamParams::new("claude-3-5-sonnet-latest"));
        assert_eq!(body["system"], "be terse");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn request_body_defaults_max_tokens_when_unset() {
        let provider = AnthropicProvider::new("key", None);
        let body = provider.request_body(&[LlmMessage::user("hi")], &StreamParams::new("claude-3-5-sonnet-latest"));
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }
}
