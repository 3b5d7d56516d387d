//! End-to-end exercise of the `/chat/stream` wire contract through the
//! real axum router, with no external network credentials configured —
//! `build_provider` fails with a `config` error before any source fetch
//! is issued, so the stream terminates deterministically right after
//! `start`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use contextline::config::Config;
use contextline::core::Core;
use contextline::server::{app_router, AppState};

async fn test_state() -> AppState {
    let dir = std::env::temp_dir().join(format!("contextline-it-{}-{}", std::process::id(), uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let config = Config {
        bind_addr: "127.0.0.1:0".into(),
        store_url: dir.join("store.db").to_string_lossy().to_string(),
        vector_dir: dir,
        log_level: "info".into(),
        cors_origins: vec![],
    };
    let core = Core::bootstrap(&config).await.unwrap();
    AppState::new(Arc::new(core))
}

#[tokio::test]
async fn chat_stream_emits_start_then_config_error_before_any_fetch() {
    let state = test_state().await;
    let app = app_router(state, &[]);

    let body = serde_json::json!({
        "message": "how do I deploy to production",
        "session_id": "s1",
    });

    let request = Request::builder()
        .method("POST")
        .uri("/chat/stream?user_id=u1")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    // Don't assume an exact `event:`/`event: ` colon-spacing convention for
    // axum's `Event` wire serialization here; match on the field name alone.
    let event_pos = |name: &str| -> Option<usize> {
        text.lines().position(|line| {
            let line = line.trim();
            line.strip_prefix("event:").map(|rest| rest.trim() == name).unwrap_or(false)
        })
    };

    let start_pos = event_pos("start").unwrap_or_else(|| panic!("missing `start` event in SSE body:\n{text}"));
    let error_pos = event_pos("error").unwrap_or_else(|| panic!("missing `error` event in SSE body:\n{text}"));

    assert!(start_pos < error_pos, "start must precede the terminal error");
    assert!(text.contains("\"kind\":\"config\""), "default settings have no llm_api_key, expected a config error");

    // A config error is resolved before Router/Orchestrator ever run, so
    // no source fetch happens and neither `sources` nor `context` is ever
    // emitted.
    assert!(event_pos("sources").is_none(), "a config error must terminate before any source fetch, so `sources` must never be emitted");
    assert!(event_pos("context").is_none(), "a config error must terminate before any source fetch, so `context` must never be emitted");
    assert!(event_pos("done").is_none(), "a terminated-before-generation run must not also emit done");
}

#[tokio::test]
async fn chat_history_is_empty_for_an_unknown_session() {
    let state = test_state().await;
    let app = app_router(state, &[]);

    let request = Request::builder().uri("/chat/history/never-seen").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["history"].as_array().unwrap().is_empty());
}
