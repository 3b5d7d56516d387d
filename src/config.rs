//! Process-start configuration.
//!
//! Reads the environment variables `BIND_ADDR`, `STORE_URL`,
//! `VECTOR_DIR`, `LOG_LEVEL`, `CORS_ORIGINS`, plus the LLM/source
//! credential blobs consumed by [`crate::settings::Settings`]. A missing
//! required setting is a configuration error (exit code 1), never a
//! panic.

use std::path::PathBuf;

use crate::errors::PipelineError;

/// Top-level process configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Connection string for the settings/transcript store.
    pub store_url: String,
    /// Directory the vector cache persists its sqlite database into.
    pub vector_dir: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive string.
    pub log_level: String,
    /// Allowed CORS origins; empty means permissive (dev default).
    pub cors_origins: Vec<String>,
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// `.env` is loaded first (via `dotenvy`) if present, matching local
    /// dev convenience without requiring it in production deployments.
    pub fn from_env() -> Result<Self, PipelineError> {
        let _ = dotenvy::dotenv();

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let store_url = std::env::var("STORE_URL").unwrap_or_else(|_| {
            format!("{}/contextline.db", default_state_dir())
        });

        let vector_dir = std::env::var("VECTOR_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(default_state_dir()).join("vectors"));

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let cors_origins = std::env::var("CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        std::fs::create_dir_all(&vector_dir)
            .map_err(|e| PipelineError::config(format!("cannot create VECTOR_DIR: {e}")))?;

        Ok(Self { bind_addr, store_url, vector_dir, log_level, cors_origins })
    }
}

/// Default on-disk state directory when `STORE_URL`/`VECTOR_DIR` are unset.
fn default_state_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    let dir = PathBuf::from(home).join(".local/share/contextline");
    let _ = std::fs::create_dir_all(&dir);
    dir.to_string_lossy().to_string()
}
