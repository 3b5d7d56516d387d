//! The provider-neutral contract every LLM family implements.
//!
//! A single async trait rather than a split completion/streaming pair:
//! this crate never calls a non-streaming completion, so there is no
//! separate `call`/`acall` pair to keep in sync with `stream`.

use std::time::Duration;

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::errors::LlmStreamError;
use crate::settings::LlmProviderKind;

/// Default `upstream_timeout` — no first token within this
/// window terminates the stream.
pub const DEFAULT_FIRST_TOKEN_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl LlmRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmRole::System => "system",
            LlmRole::User => "user",
            LlmRole::Assistant => "assistant",
        }
    }
}

/// One message in the ordered conversation passed to `LlmProvider::stream`,
/// "messages is the ordered conversation including the
/// assembled system/context message".
#[derive(Debug, Clone)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: LlmRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: LlmRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: LlmRole::Assistant, content: content.into() }
    }
}

/// Per-call generation parameters.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub first_token_timeout: Duration,
}

impl StreamParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into(), temperature: None, max_tokens: None, first_token_timeout: DEFAULT_FIRST_TOKEN_TIMEOUT }
    }
}

/// One incremental text fragment from a streaming completion.
#[derive(Debug, Clone)]
pub struct Token(pub String);

/// `Stream(messages, params, ctx) → (chan Token, chan error)` —
/// modeled as a single channel of `Result` items since a consumer that reads
/// one channel until closed is equivalent and simpler to forward as SSE.
pub type LlmStream = ReceiverStream<Result<Token, LlmStreamError>>;

/// A provider-neutral streaming adapter for one LLM family.
///
/// Implementors must map every provider-specific failure onto the closed
/// set in [`crate::errors::LlmErrorKind`] and must stop the upstream request
/// promptly when `cancel` fires.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn kind(&self) -> LlmProviderKind;

    async fn stream(
        &self,
        messages: Vec<LlmMessage>,
        params: StreamParams,
        cancel: CancellationToken,
    ) -> Result<LlmStream, LlmStreamError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_as_str_matches_wire_values() {
        assert_eq!(LlmRole::System.as_str(), "system");
        assert_eq!(LlmRole::User.as_str(), "user");
        assert_eq!(LlmRole::Assistant.as_str(), "assistant");
    }

    #[test]
    fn stream_params_default_first_token_timeout_is_twenty_seconds() {
        let params = StreamParams::new("gpt-4o-mini");
        assert_eq!(params.first_token_timeout, Duration::from_secs(20));
    }
}
