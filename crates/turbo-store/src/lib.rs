use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use turbo_core::{
    CHAT_HISTORY_KEY, EDITOR_CONTENT_KEY, MessageRole, StoredMessage, TurnState, runtime_dir,
};
use uuid::Uuid;

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
         );",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS turn_captures (
            turn_id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            state TEXT NOT NULL,
            raw TEXT NOT NULL,
            finished_at TEXT NOT NULL
         );",
    ),
];

/// Raw accumulated text of a finished turn, kept for re-decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnCapture {
    pub turn_id: Uuid,
    pub message_id: Uuid,
    pub state: TurnState,
    pub raw: String,
    pub finished_at: DateTime<Utc>,
}

pub struct Store {
    pub root: PathBuf,
    db_path: PathBuf,
}

impl Store {
    pub fn new(workspace: &Path) -> Result<Self> {
        let root = runtime_dir(workspace);
        fs::create_dir_all(&root)?;
        let db_path = root.join("store.sqlite");
        let store = Self { root, db_path };
        store.init_db()?;
        Ok(store)
    }

    pub fn db(&self) -> Result<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    // ── Key/value ───────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db()?;
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |r| r.get(0))
            .optional()?)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.db()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        Ok(())
    }

    // ── Chat history and editor autosave ────────────────────────────────

    /// Persist the conversation. System messages are never stored.
    pub fn save_chat_history(&self, messages: &[StoredMessage]) -> Result<()> {
        let kept: Vec<&StoredMessage> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        self.set(CHAT_HISTORY_KEY, &serde_json::to_string(&kept)?)
    }

    pub fn load_chat_history(&self) -> Result<Vec<StoredMessage>> {
        let Some(raw) = self.get(CHAT_HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        let messages: Vec<StoredMessage> = serde_json::from_str(&raw)?;
        Ok(messages
            .into_iter()
            .filter(|m| m.role != MessageRole::System)
            .collect())
    }

    pub fn clear_chat_history(&self) -> Result<()> {
        self.remove(CHAT_HISTORY_KEY)
    }

    pub fn save_editor_content(&self, content: &str) -> Result<()> {
        self.set(EDITOR_CONTENT_KEY, content)
    }

    pub fn load_editor_content(&self) -> Result<Option<String>> {
        self.get(EDITOR_CONTENT_KEY)
    }

    // ── Turn captures ───────────────────────────────────────────────────

    pub fn save_turn_capture(&self, capture: &TurnCapture) -> Result<()> {
        let conn = self.db()?;
        conn.execute(
            "INSERT OR REPLACE INTO turn_captures (turn_id, message_id, state, raw, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                capture.turn_id.to_string(),
                capture.message_id.to_string(),
                capture.state.as_str(),
                capture.raw,
                capture.finished_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_turn_capture(&self, turn_id: Uuid) -> Result<Option<TurnCapture>> {
        self.query_capture(
            "SELECT turn_id, message_id, state, raw, finished_at FROM turn_captures
             WHERE turn_id = ?1",
            Some(turn_id.to_string()),
        )
    }

    pub fn latest_turn_capture(&self) -> Result<Option<TurnCapture>> {
        self.query_capture(
            "SELECT turn_id, message_id, state, raw, finished_at FROM turn_captures
             ORDER BY finished_at DESC LIMIT 1",
            None,
        )
    }

    fn query_capture(&self, sql: &str, arg: Option<String>) -> Result<Option<TurnCapture>> {
        let conn = self.db()?;
        let mut stmt = conn.prepare(sql)?;
        let mut rows = match arg {
            Some(value) => stmt.query([value])?,
            None => stmt.query([])?,
        };
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let state: String = row.get(2)?;
        Ok(Some(TurnCapture {
            turn_id: Uuid::parse_str(row.get::<_, String>(0)?.as_str())?,
            message_id: Uuid::parse_str(row.get::<_, String>(1)?.as_str())?,
            state: serde_json::from_value(serde_json::Value::String(state))?,
            raw: row.get(3)?,
            finished_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(4)?)?
                .with_timezone(&Utc),
        }))
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.db()?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
             );",
        )?;

        for (version, sql) in MIGRATIONS {
            let already: i64 = conn.query_row(
                "SELECT COUNT(1) FROM schema_migrations WHERE version = ?1",
                [*version],
                |r| r.get(0),
            )?;
            if already == 0 {
                conn.execute_batch(sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, Utc::now().to_rfc3339()],
                )?;
            }
        }
        Ok(())
    }
}
