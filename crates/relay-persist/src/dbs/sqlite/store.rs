use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::error::{PersistError, Result};
use crate::models::{ListQuery, ThreadSnapshot, Ttl};
use crate::store::ThreadStore;

/// Raw row as stored: (chat_id, context, history, created_at, last_used)
type ThreadRow = (String, String, String, String, String);

/// SQLite-backed thread store (single `threads` table, JSON columns)
pub struct SqliteStore {
    conn: Connection,
    ttl: Ttl,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub async fn open(path: impl AsRef<Path>, ttl: Ttl) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;
        Self::init(conn, ttl).await
    }

    /// Private in-memory database, mostly for tests and session-only runs
    pub async fn open_in_memory(ttl: Ttl) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))?;
        Self::init(conn, ttl).await
    }

    async fn init(conn: Connection, ttl: Ttl) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS threads (
                    chat_id TEXT PRIMARY KEY,
                    context TEXT NOT NULL,
                    history TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    last_used TEXT NOT NULL,
                    last_used_ms INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS threads_last_used ON threads (last_used_ms);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, ttl })
    }

    fn expiry_cutoff_ms(&self) -> Option<i64> {
        let ttl = chrono::Duration::from_std(self.ttl.duration()?).ok()?;
        Some((Utc::now() - ttl).timestamp_millis())
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistError::Internal(format!("invalid timestamp {:?}: {}", raw, e)))
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn row_to_snapshot(row: ThreadRow) -> Result<ThreadSnapshot> {
    let (chat_id, context, history, created_at, last_used) = row;
    Ok(ThreadSnapshot {
        chat_id,
        context: serde_json::from_str(&context)?,
        history: serde_json::from_str(&history)?,
        created_at: parse_time(&created_at)?,
        last_used: parse_time(&last_used)?,
    })
}

#[async_trait]
impl ThreadStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, chat_id: &str) -> Result<Option<ThreadSnapshot>> {
        let id = chat_id.to_string();
        let row: Option<ThreadRow> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT chat_id, context, history, created_at, last_used
                         FROM threads WHERE chat_id = ?1",
                        rusqlite::params![id],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let snapshot = row_to_snapshot(row)?;

        if self.ttl.is_expired(&snapshot, Utc::now()) {
            let id = snapshot.chat_id.clone();
            let last_used_ms = snapshot.last_used.timestamp_millis();
            // Only remove the row we judged expired, not a concurrent refresh
            self.conn
                .call(move |conn| {
                    conn.execute(
                        "DELETE FROM threads WHERE chat_id = ?1 AND last_used_ms = ?2",
                        rusqlite::params![id, last_used_ms],
                    )?;
                    Ok(())
                })
                .await?;
            tracing::debug!(chat_id, "expired thread removed from sqlite store");
            return Ok(None);
        }

        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &ThreadSnapshot) -> Result<()> {
        let chat_id = snapshot.chat_id.clone();
        let context = serde_json::to_string(&snapshot.context)?;
        let history = serde_json::to_string(&snapshot.history)?;
        let created_at = format_time(&snapshot.created_at);
        let last_used = format_time(&snapshot.last_used);
        let last_used_ms = snapshot.last_used.timestamp_millis();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO threads (chat_id, context, history, created_at, last_used, last_used_ms)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(chat_id) DO UPDATE SET
                        context = excluded.context,
                        history = excluded.history,
                        created_at = excluded.created_at,
                        last_used = excluded.last_used,
                        last_used_ms = excluded.last_used_ms",
                    rusqlite::params![chat_id, context, history, created_at, last_used, last_used_ms],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, chat_id: &str) -> Result<bool> {
        let id = chat_id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM threads WHERE chat_id = ?1", rusqlite::params![id])?;
                Ok(n)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn list_all(&self, query: ListQuery) -> Result<Vec<ThreadSnapshot>> {
        let cutoff = self.expiry_cutoff_ms();
        // SQLite treats a negative LIMIT as "no limit"
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = query.skip.unwrap_or(0) as i64;

        let rows: Vec<ThreadRow> = self
            .conn
            .call(move |conn| {
                if let Some(cutoff) = cutoff {
                    conn.execute(
                        "DELETE FROM threads WHERE last_used_ms < ?1",
                        rusqlite::params![cutoff],
                    )?;
                }
                let mut stmt = conn.prepare(
                    "SELECT chat_id, context, history, created_at, last_used
                     FROM threads ORDER BY last_used_ms DESC LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit, offset], |row| {
                        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(row_to_snapshot).collect()
    }

    async fn close(&self) -> Result<()> {
        self.conn
            .clone()
            .close()
            .await
            .map_err(|e| PersistError::Connection(e.to_string()))
    }
}
