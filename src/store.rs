//! Settings/transcript persistence.
//!
//! User settings and chat transcripts are logically an external
//! collaborator's concern, but the core still needs a working
//! implementation to serve `/chat/history` and `/settings`: `rusqlite`,
//! `CREATE TABLE IF NOT EXISTS` at open time, blocking calls wrapped in
//! `spawn_blocking` for async callers.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::settings::{Settings, Turn};

/// Errors from the settings/transcript store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("background task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Key-value stores for `settings[user_id]` and `transcripts[session_id]`,
///
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                Some(e.to_string()),
            ))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                user_id TEXT PRIMARY KEY,
                json TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS transcripts (
                session_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                json TEXT NOT NULL,
                PRIMARY KEY (session_id, seq)
            );",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE settings (user_id TEXT PRIMARY KEY, json TEXT NOT NULL);
             CREATE TABLE transcripts (session_id TEXT NOT NULL, seq INTEGER NOT NULL, json TEXT NOT NULL, PRIMARY KEY (session_id, seq));",
        )?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub async fn get_settings(&self, user_id: &str) -> Result<Option<Settings>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Settings>, StoreError> {
            let conn = conn.lock();
            let json: Option<String> = conn
                .query_row("SELECT json FROM settings WHERE user_id = ?1", params![user_id], |r| r.get(0))
                .optional()?;
            Ok(match json {
                Some(j) => Some(serde_json::from_str(&j)?),
                None => None,
            })
        })
        .await?
    }

    pub async fn put_settings(&self, user_id: &str, settings: &Settings) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let user_id = user_id.to_string();
        let json = serde_json::to_string(settings)?;
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO settings (user_id, json) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET json = excluded.json",
                params![user_id, json],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<Turn>, StoreError> {
            let conn = conn.lock();
            let mut stmt = conn.prepare("SELECT json FROM transcripts WHERE session_id = ?1 ORDER BY seq ASC")?;
            let rows = stmt.query_map(params![session_id], |r| r.get::<_, String>(0))?;
            let mut turns = Vec::new();
            for row in rows {
                turns.push(serde_json::from_str(&row?)?);
            }
            Ok(turns)
        })
        .await?
    }

    /// Append-only persist of a completed turn. Called only on successful
    /// completion; its failure is logged and swallowed by the caller — it
    /// must never turn a good answer into an `error` event.
    pub async fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();
        let json = serde_json::to_string(turn)?;
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.lock();
            let next_seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM transcripts WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )?;
            conn.execute(
                "INSERT INTO transcripts (session_id, seq, json) VALUES (?1, ?2, ?3)",
                params![session_id, next_seq, json],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn delete_history(&self, session_id: &str) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.lock();
            conn.execute("DELETE FROM transcripts WHERE session_id = ?1", params![session_id])?;
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceId;

    #[tokio::test]
    async fn settings_round_trip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_settings("u1").await.unwrap().is_none());
        let settings = Settings::default();
        store.put_settings("u1", &settings).await.unwrap();
        let back = store.get_settings("u1").await.unwrap().unwrap();
        assert_eq!(back.llm_model, settings.llm_model);
    }

    #[tokio::test]
    async fn put_settings_is_upsert_not_duplicate() {
        let store = Store::open_in_memory().unwrap();
        let mut settings = Settings::default();
        store.put_settings("u1", &settings).await.unwrap();
        settings.llm_model = "gpt-4o".into();
        store.put_settings("u1", &settings).await.unwrap();
        let back = store.get_settings("u1").await.unwrap().unwrap();
        assert_eq!(back.llm_model, "gpt-4o");
    }

    #[tokio::test]
    async fn transcript_turns_are_ordered_and_deletable() {
        let store = Store::open_in_memory().unwrap();
        for i in 0..3 {
            let turn = Turn {
                user_message: format!("q{i}"),
                bot_response: format!("a{i}"),
                sources: vec![SourceId::VectorCache],
                used_sources: vec![SourceId::VectorCache],
                timestamp: chrono::Utc::now(),
            };
            store.append_turn("s1", &turn).await.unwrap();
        }
        let history = store.get_history("s1").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].user_message, "q0");
        assert_eq!(history[2].user_message, "q2");

        store.delete_history("s1").await.unwrap();
        assert!(store.get_history("s1").await.unwrap().is_empty());
    }
}
