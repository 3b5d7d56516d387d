//! LLM provider implementations, one module per supported family.
//!
//! | Provider | Module |
//! |----------|--------|
//! | OpenAI-compatible | [`openai`] |
//! | Anthropic | [`anthropic`] |
//! | Google Gemini | [`gemini`] |
//! | Ollama (local) | [`ollama`] |

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use std::sync::Arc;

use crate::errors::PipelineError;
use crate::llms::provider::LlmProvider;
use crate::settings::Settings;

/// Build the configured provider for a settings object
/// `llm_provider`/`llm_model`/`llm_api_key` fields.
///
/// Corresponds in shape to [`crate::sources::SourceRegistry`]'s builder:
/// dynamic dispatch over a closed enum, constructed once per request from
/// the caller's settings rather than from a global singleton.
pub fn build_provider(settings: &Settings) -> Result<Arc<dyn LlmProvider>, PipelineError> {
    use crate::settings::LlmProviderKind;

    match settings.llm_provider {
        LlmProviderKind::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(None))),
        LlmProviderKind::Openai => {
            let key = settings.llm_api_key.clone().ok_or_else(|| PipelineError::config("missing llm_api_key for openai provider"))?;
            Ok(Arc::new(openai::OpenAiCompatibleProvider::new(key, None)))
        }
        LlmProviderKind::Anthropic => {
            let key = settings.llm_api_key.clone().ok_or_else(|| PipelineError::config("missing llm_api_key for anthropic provider"))?;
            Ok(Arc::new(anthropic::AnthropicProvider::new(key, None)))
        }
        LlmProviderKind::Gemini => {
            let key = settings.llm_api_key.clone().ok_or_else(|| PipelineError::config("missing llm_api_key for gemini provider"))?;
            Ok(Arc::new(gemini::GeminiProvider::new(key, None)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_requires_no_api_key() {
        let mut settings = Settings::default();
        settings.llm_provider = crate::settings::LlmProviderKind::Ollama;
        settings.llm_api_key = None;
        assert!(build_provider(&settings).is_ok());
    }

    #[test]
    fn openai_without_api_key_is_a_config_error() {
        let mut settings = Settings::default();
        settings.llm_provider = crate::settings::LlmProviderKind::Openai;
        settings.llm_api_key = None;
        let err = build_provider(&settings).unwrap_err();
        assert_eq!(err.kind, crate::errors::PipelineErrorKind::Config);
    }
}
