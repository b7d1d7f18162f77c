//! SQLite-backed session store.
//!
//! One connection behind an async mutex; every trait call is a single
//! statement or a single transaction, so a crash never leaves a
//! half-written message behind.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::{debug, info};

use gatehouse_core::{ContentType, Message, Role, Session, Store};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sessions (
        id          TEXT PRIMARY KEY,
        agent_id    TEXT NOT NULL,
        channel     TEXT NOT NULL,
        peer        TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS messages (
        seq          INTEGER PRIMARY KEY AUTOINCREMENT,
        id           TEXT NOT NULL UNIQUE,
        session_id   TEXT NOT NULL,
        role         TEXT NOT NULL,
        content_type TEXT NOT NULL,
        content      TEXT NOT NULL,
        token_count  INTEGER NOT NULL,
        created_at   INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_session_created
        ON messages(session_id, created_at, seq);
    CREATE INDEX IF NOT EXISTS idx_sessions_updated ON sessions(updated_at);";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open session database {:?}", path.as_ref()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize session schema")?;

        info!("SqliteStore opened at {:?}", path.as_ref());
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for tests).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn.lock().await;
        let session = conn
            .query_row(
                "SELECT id, agent_id, channel, peer, created_at, updated_at
                 FROM sessions WHERE id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()?;
        Ok(session)
    }

    async fn create_session(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, agent_id, channel, peer, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.agent_id,
                session.channel,
                session.peer,
                session.created_at.timestamp_millis(),
                session.updated_at.timestamp_millis(),
            ],
        )
        .with_context(|| format!("Failed to create session {}", session.id))?;
        debug!(session_id = %session.id, "Session created");
        Ok(())
    }

    async fn touch_session(&self, session_id: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().timestamp_millis(), session_id],
        )?;
        Ok(())
    }

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, agent_id, channel, peer, created_at, updated_at
             FROM sessions ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let sessions = stmt
            .query_map(params![limit as i64], row_to_session)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        tx.commit()?;
        info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (id, session_id, role, content_type, content, token_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id,
                message.session_id,
                message.role.as_str(),
                message.content_type.as_str(),
                message.content,
                message.token_count,
                message.created_at.timestamp_millis(),
            ],
        )
        .with_context(|| format!("Failed to append message to session {}", message.session_id))?;
        Ok(())
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, role, content_type, content, token_count, created_at
             FROM (
                 SELECT seq, id, session_id, role, content_type, content, token_count, created_at
                 FROM messages WHERE session_id = ?1
                 ORDER BY created_at DESC, seq DESC LIMIT ?2
             )
             ORDER BY created_at ASC, seq ASC",
        )?;
        let messages = stmt
            .query_map(params![session_id, limit as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    async fn message_count(&self, session_id: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn delete_messages(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM messages WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        debug!(removed, "Messages deleted");
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Row deserialization helpers
// ---------------------------------------------------------------------------

fn millis_to_datetime(millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        rusqlite::Error::InvalidParameterName(format!("invalid timestamp {millis}"))
    })
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        channel: row.get(2)?,
        peer: row.get(3)?,
        created_at: millis_to_datetime(row.get(4)?)?,
        updated_at: millis_to_datetime(row.get(5)?)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role: String = row.get(2)?;
    let content_type: String = row.get(3)?;

    let role = Role::parse(&role)
        .ok_or_else(|| rusqlite::Error::InvalidParameterName(format!("unknown role {role}")))?;
    let content_type = ContentType::parse(&content_type).ok_or_else(|| {
        rusqlite::Error::InvalidParameterName(format!("unknown content type {content_type}"))
    })?;

    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role,
        content_type,
        content: row.get(4)?,
        token_count: row.get(5)?,
        created_at: millis_to_datetime(row.get(6)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use gatehouse_core::{SessionOrigin, ToolResult};

    fn seed_session(id: &str) -> Session {
        Session::new(id, "main", &SessionOrigin::new("telegram", "alice"))
    }

    #[tokio::test]
    async fn test_session_roundtrip_and_touch() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_session("s1").await.unwrap().is_none());

        let mut session = seed_session("s1");
        session.updated_at = session.updated_at - Duration::seconds(60);
        store.create_session(&session).await.unwrap();

        let loaded = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(loaded.channel, "telegram");
        assert_eq!(loaded.peer, "alice");

        store.touch_session("s1").await.unwrap();
        let touched = store.get_session("s1").await.unwrap().unwrap();
        assert!(touched.updated_at > loaded.updated_at);
    }

    #[tokio::test]
    async fn test_recent_messages_are_chronological_and_limited() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_session(&seed_session("s1")).await.unwrap();

        let base = Utc::now();
        for i in 0..5 {
            let msg = Message::user_text("s1", format!("m{i}"))
                .with_created_at(base + Duration::milliseconds(i));
            store.append_message(&msg).await.unwrap();
        }

        let recent = store.recent_messages("s1", 3).await.unwrap();
        let texts: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
        assert_eq!(store.message_count("s1").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_same_millisecond_keeps_insertion_order() {
        let store = SqliteStore::in_memory().unwrap();
        let at = Utc::now();
        for text in ["first", "second", "third"] {
            let msg = Message::user_text("s1", text).with_created_at(at);
            store.append_message(&msg).await.unwrap();
        }
        let all = store.recent_messages("s1", 10).await.unwrap();
        let texts: Vec<&str> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_structured_content_survives_storage() {
        let store = SqliteStore::in_memory().unwrap();
        let msg = Message::tool_results("s1", &[ToolResult::success("c1", "hi")])
            .unwrap()
            .with_token_count(7);
        store.append_message(&msg).await.unwrap();

        let loaded = store.recent_messages("s1", 1).await.unwrap().remove(0);
        assert_eq!(loaded.content_type, ContentType::ToolResults);
        assert_eq!(loaded.token_count, 7);
        assert_eq!(loaded.call_ids().unwrap(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_messages_and_session() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_session(&seed_session("s1")).await.unwrap();
        let a = Message::user_text("s1", "a");
        let b = Message::assistant_text("s1", "b");
        store.append_message(&a).await.unwrap();
        store.append_message(&b).await.unwrap();

        let removed = store
            .delete_messages(&[a.id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.message_count("s1").await.unwrap(), 1);

        store.delete_session("s1").await.unwrap();
        assert!(store.get_session("s1").await.unwrap().is_none());
        assert_eq!(store.message_count("s1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_sessions_most_recent_first() {
        let store = SqliteStore::in_memory().unwrap();
        let mut older = seed_session("old");
        older.updated_at = older.updated_at - Duration::hours(1);
        store.create_session(&older).await.unwrap();
        store.create_session(&seed_session("new")).await.unwrap();

        let listed = store.list_sessions(10).await.unwrap();
        assert_eq!(listed[0].id, "new");
        assert_eq!(listed.len(), 2);
    }
}
