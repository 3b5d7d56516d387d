//! Axum route handlers for the HTTP surface.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query as QueryExtractor, State};
use axum::http::StatusCode;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::core::Core;
use crate::query_pipeline;
use crate::settings::{Settings, TestConnectionResult, TestConnectionStatus, Turn};
use crate::stream_protocol::StreamEvent;
use crate::types::{Query, QueryOptions};

/// Shared application state. `Core`'s fields are immutable once built, so a
/// bare `Arc` suffices — there is no per-field `RwLock` to keep consistent.
#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
}

impl AppState {
    pub fn new(core: Arc<Core>) -> Self {
        Self { core }
    }
}

pub fn app_router(state: AppState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::list(origins))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/history/{session_id}", get(get_history_handler))
        .route("/chat/history/{session_id}", delete(delete_history_handler))
        .route("/settings/{user_id}", get(get_settings_handler))
        .route("/settings", post(put_settings_handler))
        .route("/test-connection", post(test_connection_handler))
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "time": chrono::Utc::now().to_rfc3339(),
        "version": crate::VERSION,
    }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    session_id: String,
    #[serde(default)]
    options: Option<ChatOptions>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatOptions {
    max_sources: Option<usize>,
    per_source_limit: Option<usize>,
    token_budget: Option<usize>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UserId {
    user_id: String,
}

async fn resolve(state: &AppState, user_id: &str, req: &ChatRequest) -> (Query, Settings) {
    let mut options = QueryOptions::default();
    if let Some(o) = &req.options {
        if let Some(v) = o.max_sources {
            options.max_sources = v;
        }
        if let Some(v) = o.per_source_limit {
            options.per_source_limit = v;
        }
        if let Some(v) = o.token_budget {
            options.token_budget = v;
        }
    }
    let timeout = std::time::Duration::from_secs(req.options.as_ref().and_then(|o| o.timeout_secs).unwrap_or(20));

    let settings = state.core.store.get_settings(user_id).await.unwrap_or(None).unwrap_or_default();
    let query = Query::with_options(req.message.clone(), req.session_id.clone(), user_id.to_string(), options, timeout);
    (query, settings)
}

/// `POST /chat/stream?user_id=<string>` — the live SSE wire
async fn chat_stream_handler(
    State(state): State<AppState>,
    QueryExtractor(user): QueryExtractor<UserId>,
    Json(req): Json<ChatRequest>,
) -> impl IntoResponse {
    let (query, settings) = resolve(&state, &user.user_id, &req).await;
    let stream = query_pipeline::run(state.core.clone(), query, settings).map(|event| Ok::<_, std::convert::Infallible>(event.to_sse_event()));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct ChatResponse {
    response: String,
    sources: Vec<crate::types::SourceId>,
    used_sources: Vec<crate::types::SourceId>,
    documents: Vec<crate::stream_protocol::WireDocument>,
}

/// `POST /chat?user_id=<string>` — drains the same pipeline into one JSON
/// response, for callers that do not want to speak SSE.
async fn chat_handler(
    State(state): State<AppState>,
    QueryExtractor(user): QueryExtractor<UserId>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<serde_json::Value>)> {
    let (query, settings) = resolve(&state, &user.user_id, &req).await;
    let mut stream = std::pin::pin!(query_pipeline::run(state.core.clone(), query, settings));

    let mut answer = String::new();
    let mut sources = Vec::new();
    let mut used_sources = Vec::new();
    let mut documents = Vec::new();

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Chunk { text } => answer.push_str(&text),
            StreamEvent::Done { sources: s, used_sources: u, documents: d } => {
                sources = s;
                used_sources = u;
                documents = d;
                break;
            }
            StreamEvent::Error { message, kind } => {
                return Err((StatusCode::BAD_GATEWAY, Json(serde_json::json!({"kind": kind, "message": message}))));
            }
            _ => {}
        }
    }

    Ok(Json(ChatResponse { response: answer, sources, used_sources, documents }))
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryResponse {
    history: Vec<Turn>,
}

async fn get_history_handler(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<Json<HistoryResponse>, (StatusCode, Json<serde_json::Value>)> {
    state
        .core
        .store
        .get_history(&session_id)
        .await
        .map(|history| Json(HistoryResponse { history }))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"message": e.to_string()}))))
}

async fn delete_history_handler(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state
        .core
        .store
        .delete_history(&session_id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"message": e.to_string()}))))
}

async fn get_settings_handler(State(state): State<AppState>, Path(user_id): Path<String>) -> Result<Json<Settings>, (StatusCode, Json<serde_json::Value>)> {
    let settings = state
        .core
        .store
        .get_settings(&user_id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"message": e.to_string()}))))?;
    Ok(Json(settings.unwrap_or_default()))
}

async fn put_settings_handler(
    State(state): State<AppState>,
    QueryExtractor(q): QueryExtractor<UserId>,
    Json(settings): Json<Settings>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state
        .core
        .store
        .put_settings(&q.user_id, &settings)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({"message": e.to_string()}))))
}

/// `POST /test-connection` — probes the candidate LLM provider config plus
/// every enabled source's `healthy()`, returning `{llm:{status,message}, ...}`.
async fn test_connection_handler(State(state): State<AppState>, Json(settings): Json<Settings>) -> Json<HashMap<String, TestConnectionResult>> {
    let mut results = HashMap::new();

    let llm_result = match crate::llms::providers::build_provider(&settings) {
        Ok(_) => TestConnectionResult { status: TestConnectionStatus::Ok, message: "provider configured".to_string() },
        Err(e) => TestConnectionResult { status: TestConnectionStatus::Error, message: e.message },
    };
    results.insert("llm".to_string(), llm_result);

    for source in &settings.enabled_sources {
        let entry = state.core.registry.get(*source);
        let result = match entry {
            Some(entry) if entry.adapter.healthy().await => {
                TestConnectionResult { status: TestConnectionStatus::Ok, message: "reachable".to_string() }
            }
            Some(_) => TestConnectionResult { status: TestConnectionStatus::Error, message: "not configured or unreachable".to_string() },
            None => TestConnectionResult { status: TestConnectionStatus::Error, message: "source not registered".to_string() },
        };
        results.insert(source.as_str().to_string(), result);
    }

    Json(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            bind_addr: "127.0.0.1:0".into(),
            store_url: dir.path().join("store.db").to_string_lossy().to_string(),
            vector_dir: dir.path().to_path_buf(),
            log_level: "info".into(),
            cors_origins: vec![],
        };
        let core = Core::bootstrap(&config).await.unwrap();
        (AppState::new(Arc::new(core)), dir)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _dir) = test_state().await;
        let app = app_router(state, &[]);
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn settings_round_trip_through_http() {
        let (state, _dir) = test_state().await;
        let app = app_router(state, &[]);

        let settings = Settings::default();
        let put_req = Request::builder()
            .method("POST")
            .uri("/settings?user_id=u1")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&settings).unwrap()))
            .unwrap();
        let resp = app.clone().oneshot(put_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let get_req = Request::builder().uri("/settings/u1").body(Body::empty()).unwrap();
        let resp = app.oneshot(get_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let back: Settings = serde_json::from_slice(&body).unwrap();
        assert_eq!(back.llm_model, settings.llm_model);
    }

    #[tokio::test]
    async fn history_starts_empty_and_is_deletable() {
        let (state, _dir) = test_state().await;
        let app = app_router(state, &[]);

        let req = Request::builder().uri("/chat/history/s1").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let body = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let history: HistoryResponse = serde_json::from_slice(&body).unwrap();
        assert!(history.history.is_empty());

        let del_req = Request::builder().method("DELETE").uri("/chat/history/s1").body(Body::empty()).unwrap();
        let resp = app.oneshot(del_req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
