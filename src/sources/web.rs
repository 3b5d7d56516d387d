//! Web search adapter — part of the Router's default fallback bundle.
//!
//! Talks to a generic JSON search API (the shape used by most hosted web
//! search APIs: a `q`/`count` query string, a JSON array of
//! `{title, url, snippet}` results). The base URL and API key are supplied
//! by [`crate::settings::Settings`]; without either, [`Self::healthy`]
//! reports `false` so the Router naturally drops it.

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::SourceError;
use crate::types::{Document, SourceId};

use super::SourceAdapter;

pub struct WebSearchAdapter {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl WebSearchAdapter {
    pub fn new(client: reqwest::Client, base_url: Option<String>, api_key: Option<String>) -> Self {
        Self { client, base_url, api_key }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SourceAdapter for WebSearchAdapter {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Document>, SourceError> {
        let (Some(base_url), Some(api_key)) = (&self.base_url, &self.api_key) else {
            return Ok(Vec::new());
        };

        let resp = self
            .client
            .get(base_url)
            .bearer_auth(api_key)
            .query(&[("q", query), ("count", &limit.to_string())])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(30);
            return Err(SourceError::TooManyRequests { retry_after_secs });
        }
        if resp.status().is_client_error() {
            return Err(SourceError::Permanent(format!("web search returned {}", resp.status())));
        }
        let body: SearchResponse = resp.error_for_status()?.json().await?;

        let now = chrono::Utc::now();
        Ok(body
            .results
            .into_iter()
            .take(limit)
            .map(|hit| Document {
                id: hit.url.clone(),
                source: SourceId::Web,
                title: hit.title,
                url: Some(hit.url),
                body: hit.snippet,
                fetched_at: now,
                score: None,
            })
            .collect())
    }

    async fn healthy(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    fn id(&self) -> SourceId {
        SourceId::Web
    }
}
