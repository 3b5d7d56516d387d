//! HTTP server exposing the query pipeline.
//!
//! # Endpoints
//!
//! - `POST   /chat/stream`               — SSE stream of one query's answer
//! - `POST   /chat`                      — same pipeline, drained to one JSON body
//! - `GET    /chat/history/{session_id}` — prior turns for a session
//! - `DELETE /chat/history/{session_id}` — clear a session's history
//! - `GET    /settings/{user_id}`        — fetch a user's settings (defaults if unset)
//! - `POST   /settings?user_id=...`      — persist a user's settings
//! - `POST   /test-connection`           — probe one source/provider's credentials
//! - `GET    /health`                    — liveness probe

pub mod routes;

pub use routes::{app_router, AppState};
