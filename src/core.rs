//! The long-lived process state.
//!
//! Every shared, expensive-to-build component (the source registry, the
//! embedder, the vector cache, the orchestrator, the router, the context
//! builder, the settings/transcript store) is an explicit field here,
//! constructed once at startup and handed to request handlers by
//! reference. There is no hidden global init or `OnceCell` singleton
//! anywhere in the request path.

use std::path::PathBuf;
use std::sync::Arc;

use crate::chunker::ChunkerConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::Config;
use crate::context_builder::{ContextBuilder, ContextBuilderConfig};
use crate::embedder::Embedder;
use crate::errors::PipelineError;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::rate_gate::RateGateConfig;
use crate::router::Router;
use crate::sources::{
    ConfluenceAdapter, GithubAdapter, JiraAdapter, NotionAdapter, SlackAdapter, SourceRegistry,
    UnconfiguredAdapter, VectorCacheAdapter, WebSearchAdapter,
};
use crate::store::Store;
use crate::types::SourceId;
use crate::vector_cache::VectorCache;

/// Everything a request needs that is too expensive to build per-request.
pub struct Core {
    pub registry: Arc<SourceRegistry>,
    pub embedder: Arc<Embedder>,
    pub vector_cache: Arc<VectorCache>,
    pub orchestrator: Orchestrator,
    pub router: Router,
    pub context_builder: ContextBuilder,
    pub store: Arc<Store>,
}

impl Core {
    /// Build every shared component from `config` and the process
    /// environment's per-source credentials. `{SOURCE}_BASE_URL` /
    /// `{SOURCE}_TOKEN` env vars are the default credential source until
    /// a caller's `Settings.source_credentials` overrides them per
    /// request — see `crate::query_pipeline`.
    pub async fn bootstrap(config: &Config) -> Result<Self, PipelineError> {
        let embedder = Arc::new(Embedder::new());
        embedder.warm_up();

        let vector_cache_path = config.vector_dir.join("vector_cache.db");
        let vector_cache = Arc::new(VectorCache::open(&vector_cache_path).map_err(|e| {
            PipelineError::internal(format!("failed to open vector cache at {}: {e}", vector_cache_path.display()))
        })?);

        let registry = Arc::new(build_default_registry(embedder.clone(), vector_cache.clone()));

        let orchestrator = Orchestrator::new(registry.clone(), embedder.clone(), vector_cache.clone(), ChunkerConfig::default(), OrchestratorConfig::default());

        let router = Router::new();
        let context_builder = ContextBuilder::new(embedder.clone(), ChunkerConfig::default(), ContextBuilderConfig::default());

        let store_path = store_path_from_url(&config.store_url);
        let store = Arc::new(Store::open(&store_path).map_err(|e| {
            PipelineError::internal(format!("failed to open store at {}: {e}", store_path.display()))
        })?);

        Ok(Self { registry, embedder, vector_cache, orchestrator, router, context_builder, store })
    }
}

/// `STORE_URL` is a plain filesystem path in this deployment (no remote
/// database backend). Strip a `sqlite://` prefix if a caller supplies one
/// out of habit from other database-backed tools.
fn store_path_from_url(store_url: &str) -> PathBuf {
    PathBuf::from(store_url.strip_prefix("sqlite://").unwrap_or(store_url))
}

/// Wire up the default source set: credentialed HTTP adapters for the
/// sources with a real wire client (env-var credentials), the stateful
/// `vector_cache`/`web` adapters, and `UnconfiguredAdapter` for the
/// remaining closed-enum members this crate ships no client for yet.
///
/// TODO: `Settings.source_credentials` lets a per-user request override
/// these, but the registry is built once at startup from the process
/// environment only; per-request credential overrides need the registry
/// (or at least `CredentialedHttp`) to accept a credentials override at
/// call time rather than construction time.
fn build_default_registry(embedder: Arc<Embedder>, vector_cache: Arc<VectorCache>) -> SourceRegistry {
    let client = reqwest::Client::new();

    let mut builder = SourceRegistry::builder()
        .register(Arc::new(VectorCacheAdapter::new(vector_cache, embedder)), RateGateConfig::default(), CircuitBreakerConfig::default())
        .register(
            Arc::new(WebSearchAdapter::new(client.clone(), env_opt("WEB_SEARCH_BASE_URL"), env_opt("WEB_SEARCH_API_KEY"))),
            RateGateConfig::default(),
            CircuitBreakerConfig::default(),
        )
        .register(
            Arc::new(JiraAdapter::new(client.clone(), env_opt("JIRA_BASE_URL"), env_opt("JIRA_TOKEN"))),
            RateGateConfig::default(),
            CircuitBreakerConfig::default(),
        )
        .register(
            Arc::new(ConfluenceAdapter::new(client.clone(), env_opt("CONFLUENCE_BASE_URL"), env_opt("CONFLUENCE_TOKEN"))),
            RateGateConfig::default(),
            CircuitBreakerConfig::default(),
        )
        .register(
            Arc::new(SlackAdapter::new(client.clone(), env_opt("SLACK_BASE_URL"), env_opt("SLACK_TOKEN"))),
            RateGateConfig::default(),
            CircuitBreakerConfig::default(),
        )
        .register(
            Arc::new(GithubAdapter::new(client.clone(), env_opt("GITHUB_BASE_URL"), env_opt("GITHUB_TOKEN"))),
            RateGateConfig::default(),
            CircuitBreakerConfig::default(),
        )
        .register(
            Arc::new(NotionAdapter::new(client, env_opt("NOTION_BASE_URL"), env_opt("NOTION_TOKEN"))),
            RateGateConfig::default(),
            CircuitBreakerConfig::default(),
        );

    for id in [SourceId::Linear, SourceId::Figma, SourceId::Microsoft365, SourceId::Devtools, SourceId::Productivity, SourceId::Google] {
        builder = builder.register(Arc::new(UnconfiguredAdapter::new(id)), RateGateConfig::default(), CircuitBreakerConfig::default());
    }

    builder.build()
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_path_strips_sqlite_scheme() {
        assert_eq!(store_path_from_url("sqlite:///tmp/x.db"), PathBuf::from("/tmp/x.db"));
        assert_eq!(store_path_from_url("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
    }

    #[tokio::test]
    async fn bootstrap_builds_a_registry_with_every_source_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            bind_addr: "127.0.0.1:0".into(),
            store_url: dir.path().join("store.db").to_string_lossy().to_string(),
            vector_dir: dir.path().to_path_buf(),
            log_level: "info".into(),
            cors_origins: vec![],
        };

        let core = Core::bootstrap(&config).await.unwrap();
        let configured: std::collections::HashSet<_> = core.registry.configured_ids().collect();
        for id in SourceId::ALL {
            assert!(configured.contains(id), "missing source {id}");
        }
    }
}
