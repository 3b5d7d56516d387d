//! Google Gemini `streamGenerateContent` streaming provider.
//!
//! Gemini's SSE stream (`alt=sse`) carries the full `GenerateContentResponse`
//! JSON per event rather than an incremental delta object, and authenticates
//! via an API key query parameter rather than a bearer header.

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

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            api_key: api_key.into(),
        }
    }

    fn request_body(&self, messages: &[LlmMessage]) -> serde_json::Value {
        let system: String = messages
            .iter()
            .filter(|m| m.role == LlmRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != LlmRole::System)
            .map(|m| {
                let role = if m.role == LlmRole::Assistant { "model" } else { "user" };
                serde_json::json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = serde_json::json!({"contents": contents});
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({"parts": [{"text": system}]});
        }
        body
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::Gemini
    }

    async fn stream(&self, messages: Vec<LlmMessage>, params: StreamParams, cancel: CancellationToken) -> Result<LlmStream, LlmStreamError> {
        let body = self.request_body(&messages);
        let url = format!("{}/models/{}:streamGenerateContent", self.base_url, params.model);
        let idle_timeout = params.first_token_timeout;

        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
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
            Ok(Some(Ok(event))) => {
                let chunk: serde_json::Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(message) = chunk["error"]["message"].as_str() {
                    let _ = tx.send(Err(LlmStreamError::new(LlmErrorKind::UpstreamError, message.to_string()))).await;
                    return;
                }
                if let Some(text) = chunk["candidates"][0]["content"]["parts"][0]["text"].as_str() {
                    if !text.is_empty() && tx.send(Ok(Token(text.to_string()))).await.is_err() {
                        return;
                    }
                }
            }
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
    fn request_body_maps_assistant_role_to_model() {
        let provider = GeminiProvider::new("key", None);
        let messages = vec![LlmMessage::system("be terse"), LlmMessage::user("hi"), LlmMessage::assistant("hello")];
        let body = provider.request_body(&messages);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
    }
}
