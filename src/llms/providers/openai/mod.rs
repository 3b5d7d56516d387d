//! OpenAI-compatible Chat Completions streaming provider.
//!
//! Narrowed to Chat Completions streaming only (Responses API's built-in
//! tools are out of this crate's scope). Also serves any Chat-Completions-
//! compatible endpoint reachable via a custom `base_url`.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::errors::{LlmErrorKind, LlmStreamError};
use crate::llms::provider::{LlmMessage, LlmProvider, LlmStream, StreamParams, Token};
use crate::settings::LlmProviderKind;

const CHANNEL_CAPACITY: usize = 256;

pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: api_key.into(),
        }
    }

    fn request_body(&self, messages: &[LlmMessage], params: &StreamParams) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let mut body = serde_json::json!({"model": params.model, "messages": messages, "stream": true});
        if let Some(t) = params.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(mt) = params.max_tokens {
            body["max_tokens"] = serde_json::json!(mt);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn kind(&self) -> LlmProviderKind {
        LlmProviderKind::Openai
    }

    async fn stream(&self, messages: Vec<LlmMessage>, params: StreamParams, cancel: CancellationToken) -> Result<LlmStream, LlmStreamError> {
        let body = self.request_body(&messages, &params);
        let url = format!("{}/chat/completions", self.base_url);
        let idle_timeout = params.first_token_timeout;

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            Ok(Some(Ok(event))) => {
                if event.data.trim() == "[DONE]" {
                    return;
                }
                let chunk: serde_json::Value = match serde_json::from_str(&event.data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if let Some(text) = chunk["choices"][0]["delta"]["content"].as_str() {
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
