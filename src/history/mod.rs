use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::core::errors::ConciergeError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub tokens_in: u32,
    pub tokens_out: u32,
}

impl TokenCounts {
    pub fn input(tokens: u32) -> Self {
        Self {
            tokens_in: tokens,
            tokens_out: 0,
        }
    }

    pub fn output(tokens: u32) -> Self {
        Self {
            tokens_in: 0,
            tokens_out: tokens,
        }
    }
}

/// Conversation transcript sink.
#[async_trait]
pub trait ChatHistory: Send + Sync {
    async fn append(
        &self,
        session_id: &str,
        role: &str,
        text: &str,
        tokens: TokenCounts,
    ) -> Result<(), ConciergeError>;
}

/// Audit trail of notable events (replies, blocked prompts, tool actions).
#[async_trait]
pub trait ActionLog: Send + Sync {
    async fn log(&self, session_id: &str, event_type: &str, payload: &Value) -> Result<(), ConciergeError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    pub id: i64,
    pub session_id: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: String,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, ConciergeError> {
        let conn_str = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&conn_str)
            .await
            .map_err(|e| ConciergeError::storage(format!("Failed to connect to history db: {}", e)))?;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&pool)
            .await
            .map_err(|e| ConciergeError::storage(format!("Failed to enable foreign keys: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ConciergeError::storage(format!("Failed to init sessions table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tokens_in INTEGER NOT NULL DEFAULT 0,
                tokens_out INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY(session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ConciergeError::storage(format!("Failed to init messages table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload JSON,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
        )
        .execute(&pool)
        .await
        .map_err(|e| ConciergeError::storage(format!("Failed to init events table: {}", e)))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_messages_session_id ON messages(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_events_session_id ON events(session_id)",
        ] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| ConciergeError::storage(format!("Failed to create index: {}", e)))?;
        }

        Ok(Self { pool })
    }

    pub async fn add_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        tokens: TokenCounts,
    ) -> Result<i64, ConciergeError> {
        let now = chrono::Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(ConciergeError::storage)?;

        sqlx::query("INSERT OR IGNORE INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(ConciergeError::storage)?;

        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await
            .map_err(ConciergeError::storage)?;

        let result = sqlx::query(
            "INSERT INTO messages (session_id, role, content, tokens_in, tokens_out, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(role)
        .bind(content)
        .bind(i64::from(tokens.tokens_in))
        .bind(i64::from(tokens.tokens_out))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(ConciergeError::storage)?;

        tx.commit().await.map_err(ConciergeError::storage)?;

        Ok(result.last_insert_rowid())
    }

    pub async fn log_event(
        &self,
        session_id: &str,
        event_type: &str,
        payload: &Value,
    ) -> Result<i64, ConciergeError> {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO events (session_id, event_type, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(event_type)
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(ConciergeError::storage)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<HistoryMessage>, ConciergeError> {
        let rows = if limit > 0 {
            sqlx::query(
                "SELECT * FROM (SELECT * FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?) ORDER BY id ASC",
            )
            .bind(session_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(ConciergeError::storage)?
        } else {
            sqlx::query("SELECT * FROM messages WHERE session_id = ? ORDER BY id ASC")
                .bind(session_id)
                .fetch_all(&self.pool)
                .await
                .map_err(ConciergeError::storage)?
        };

        Ok(rows
            .into_iter()
            .map(|row| HistoryMessage {
                id: row.try_get::<i64, _>("id").unwrap_or_default(),
                session_id: row.try_get::<String, _>("session_id").unwrap_or_default(),
                role: row.try_get::<String, _>("role").unwrap_or_default(),
                content: row.try_get::<String, _>("content").unwrap_or_default(),
                tokens_in: row.try_get::<i64, _>("tokens_in").unwrap_or_default(),
                tokens_out: row.try_get::<i64, _>("tokens_out").unwrap_or_default(),
                created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
            })
            .collect())
    }

    pub async fn list_events(&self, session_id: &str) -> Result<Vec<ActionEvent>, ConciergeError> {
        let rows = sqlx::query("SELECT * FROM events WHERE session_id = ? ORDER BY id ASC")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await
            .map_err(ConciergeError::storage)?;

        Ok(rows
            .into_iter()
            .map(|row| ActionEvent {
                id: row.try_get::<i64, _>("id").unwrap_or_default(),
                session_id: row.try_get::<String, _>("session_id").unwrap_or_default(),
                event_type: row.try_get::<String, _>("event_type").unwrap_or_default(),
                payload: row
                    .try_get::<Option<Value>, _>("payload")
                    .unwrap_or(None)
                    .unwrap_or(Value::Null),
                created_at: row.try_get::<String, _>("created_at").unwrap_or_default(),
            })
            .collect())
    }

    /// Sum of recorded tokens for a session, used for per-session budgets.
    pub async fn token_total(&self, session_id: &str) -> Result<i64, ConciergeError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(tokens_in + tokens_out), 0) AS total FROM messages WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(ConciergeError::storage)?;
        Ok(row.try_get::<i64, _>("total").unwrap_or_default())
    }
}

#[async_trait]
impl ChatHistory for HistoryStore {
    async fn append(
        &self,
        session_id: &str,
        role: &str,
        text: &str,
        tokens: TokenCounts,
    ) -> Result<(), ConciergeError> {
        self.add_message(session_id, role, text, tokens).await.map(|_| ())
    }
}

#[async_trait]
impl ActionLog for HistoryStore {
    async fn log(&self, session_id: &str, event_type: &str, payload: &Value) -> Result<(), ConciergeError> {
        self.log_event(session_id, event_type, payload).await.map(|_| ())
    }
}
