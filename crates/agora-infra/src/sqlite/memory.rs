//! SQLite agent memory repository implementation.
//!
//! Implements `MemoryRepository` from `agora-core` using sqlx with split
//! read/write pools: raw queries, a private Row struct for SQLite-to-domain
//! mapping, writes on the writer pool and chat loads on the reader pool.

use agora_types::error::RepositoryError;
use agora_types::memory::{AgentMemoryMessage, MessageRole};
use agora_types::tool::ToolCall;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use agora_core::repository::MemoryRepository;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `MemoryRepository`.
pub struct SqliteMemoryRepository {
    pool: DatabasePool,
}

impl SqliteMemoryRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MemoryMessageRow {
    id: String,
    chat_id: String,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_call_id: Option<String>,
    timestamp: String,
}

impl MemoryMessageRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            tool_calls: row.try_get("tool_calls")?,
            tool_call_id: row.try_get("tool_call_id")?,
            timestamp: row.try_get("timestamp")?,
        })
    }

    fn into_message(self) -> Result<AgentMemoryMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let role: MessageRole = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;
        let tool_calls: Option<Vec<ToolCall>> = self
            .tool_calls
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid tool_calls: {e}")))?;
        let timestamp = parse_datetime(&self.timestamp)?;

        Ok(AgentMemoryMessage {
            id,
            chat_id: self.chat_id,
            role,
            content: self.content,
            tool_calls,
            tool_call_id: self.tool_call_id,
            timestamp,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// ---------------------------------------------------------------------------
// MemoryRepository implementation
// ---------------------------------------------------------------------------

impl MemoryRepository for SqliteMemoryRepository {
    async fn append_message(&self, message: &AgentMemoryMessage) -> Result<(), RepositoryError> {
        let tool_calls = message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("tool_calls encode: {e}")))?;

        sqlx::query(
            r#"INSERT INTO agent_memory_messages (id, chat_id, role, content, tool_calls, tool_call_id, timestamp)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(&message.chat_id)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(tool_calls)
        .bind(&message.tool_call_id)
        .bind(format_datetime(&message.timestamp))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn load_chat(&self, chat_id: &str) -> Result<Vec<AgentMemoryMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM agent_memory_messages WHERE chat_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(chat_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let msg_row = MemoryMessageRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            messages.push(msg_row.into_message()?);
        }

        Ok(messages)
    }
}
