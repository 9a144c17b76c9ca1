//! SQLite-backed chat log.
//!
//! One table, append-only. Timestamps are microseconds since the Unix
//! epoch and are assigned here, never by the caller, so that ordering by
//! timestamp always reproduces insertion order.

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use shared::message::{Message, Role};
use std::path::Path;
use std::sync::Arc;

/// Shared handle to the message log. Cloning shares the connection.
#[derive(Clone)]
pub struct MessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl MessageStore {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        tracing::info!("message store opened at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp, id)",
            [],
        )?;
        Ok(())
    }

    /// Insert one message. The assigned timestamp is strictly greater than
    /// every timestamp already in the table.
    pub fn append(&self, role: Role, content: &str) -> Result<Message> {
        let conn = self.conn.lock();
        let last: Option<i64> =
            conn.query_row("SELECT MAX(timestamp) FROM messages", [], |row| row.get(0))?;
        let now = Utc::now().timestamp_micros();
        let timestamp = match last {
            Some(last) if last >= now => last + 1,
            _ => now,
        };

        conn.execute(
            "INSERT INTO messages (role, content, timestamp) VALUES (?1, ?2, ?3)",
            params![role.as_str(), content, timestamp],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Message {
            id,
            role,
            content: content.to_string(),
            timestamp: micros_to_datetime(timestamp)?,
        })
    }

    /// Every message, oldest first.
    pub fn list_all(&self) -> Result<Vec<Message>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, role, content, timestamp FROM messages ORDER BY timestamp, id",
        )?;
        let rows: Vec<(i64, String, String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
            .collect::<rusqlite::Result<_>>()?;

        let mut messages = Vec::with_capacity(rows.len());
        for (id, role, content, timestamp) in rows {
            let role = match role.parse::<Role>() {
                Ok(role) => role,
                Err(e) => {
                    tracing::warn!("skipping message {}: {}", id, e);
                    continue;
                }
            };
            messages.push(Message {
                id,
                role,
                content,
                timestamp: micros_to_datetime(timestamp)?,
            });
        }
        Ok(messages)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| anyhow!("invalid timestamp in message log: {}", micros))
}
