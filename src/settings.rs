//! Wire-facing settings object.
//!
//! Credentials are an opaque blob the core never inspects.
//! `CredentialsBlob` is a thin newtype over a string map; only the
//! adapter/provider that owns a given key parses it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::SourceId;

/// LLM provider family settings enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    Openai,
    Anthropic,
    Gemini,
    Ollama,
}

/// Opaque per-source credential blob. The core never inspects these
/// strings; only the owning adapter parses them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsBlob(pub HashMap<String, String>);

impl CredentialsBlob {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

/// The settings object keyed per `user_id` in the settings store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub llm_provider: LlmProviderKind,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    #[serde(default)]
    pub source_credentials: HashMap<SourceId, CredentialsBlob>,
    pub enable_web_search: bool,
    pub use_streaming: bool,
    pub enabled_sources: HashSet<SourceId>,
}

impl Default for Settings {
    /// A config with zero enabled sources besides `vector_cache`/`web`
    /// must still be a legal, non-panicking state.
    fn default() -> Self {
        Self {
            llm_provider: LlmProviderKind::Openai,
            llm_model: "gpt-4o-mini".to_string(),
            llm_api_key: None,
            source_credentials: HashMap::new(),
            enable_web_search: true,
            use_streaming: true,
            enabled_sources: [SourceId::VectorCache, SourceId::Web].into_iter().collect(),
        }
    }
}

/// One persisted transcript turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub user_message: String,
    pub bot_response: String,
    pub sources: Vec<SourceId>,
    pub used_sources: Vec<SourceId>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Per-checked-system connection test result, `POST /test-connection`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConnectionResult {
    pub status: TestConnectionStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestConnectionStatus {
    Ok,
    Error,
}
