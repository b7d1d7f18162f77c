/// Audit log: records tool proposals, approval decisions, executions and
/// turn boundaries.
///
/// Each event is stored in SQLite in the `audit_events` table. Detail
/// payloads pass through the log redactor before they are written.
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use gatehouse_core::AuditLogger;
use gatehouse_logging::redact_json;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: String,
    pub session_id: String,
    pub agent_id: String,
    pub actor: String,
    pub detail: serde_json::Value,
    /// Unix milliseconds.
    pub timestamp: i64,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS audit_events (
     id         TEXT PRIMARY KEY,
     event_type TEXT NOT NULL,
     session_id TEXT NOT NULL,
     agent_id   TEXT NOT NULL,
     actor      TEXT NOT NULL,
     detail     TEXT NOT NULL,
     timestamp  INTEGER NOT NULL
 );
 CREATE INDEX IF NOT EXISTS idx_audit_session ON audit_events(session_id, timestamp);";

pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub async fn record(&self, event: AuditEvent) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO audit_events (id, event_type, session_id, agent_id, actor, detail, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id.to_string(),
                event.event_type,
                event.session_id,
                event.agent_id,
                event.actor,
                serde_json::to_string(&event.detail)?,
                event.timestamp,
            ],
        )?;
        debug!("[Audit] {} {} in {}", event.actor, event.event_type, event.session_id);
        Ok(())
    }

    /// Newest events for a session, newest first.
    pub async fn recent(&self, session_id: &str, limit: usize) -> Result<Vec<AuditEvent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, event_type, session_id, agent_id, actor, detail, timestamp
             FROM audit_events WHERE session_id = ?1
             ORDER BY timestamp DESC, rowid DESC LIMIT ?2",
        )?;

        struct Row {
            id_str: String,
            event_type: String,
            session_id: String,
            agent_id: String,
            actor: String,
            detail_str: String,
            timestamp: i64,
        }

        let events: Vec<AuditEvent> = stmt
            .query_map(params![session_id, limit as i64], |row| {
                Ok(Row {
                    id_str: row.get(0)?,
                    event_type: row.get(1)?,
                    session_id: row.get(2)?,
                    agent_id: row.get(3)?,
                    actor: row.get(4)?,
                    detail_str: row.get(5)?,
                    timestamp: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .filter_map(|r| {
                let id = Uuid::parse_str(&r.id_str).ok()?;
                let detail = serde_json::from_str(&r.detail_str).ok()?;
                Some(AuditEvent {
                    id,
                    event_type: r.event_type,
                    session_id: r.session_id,
                    agent_id: r.agent_id,
                    actor: r.actor,
                    detail,
                    timestamp: r.timestamp,
                })
            })
            .collect();

        Ok(events)
    }
}

#[async_trait]
impl AuditLogger for AuditLog {
    async fn log(
        &self,
        event_type: &str,
        session_id: &str,
        agent_id: &str,
        actor: &str,
        detail: serde_json::Value,
    ) -> Result<()> {
        self.record(AuditEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            actor: actor.to_string(),
            detail: redact_json(&detail),
            timestamp: Utc::now().timestamp_millis(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_and_read_back_newest_first() {
        let log = AuditLog::in_memory().unwrap();
        log.log("tool.proposed", "s1", "main", "agent", serde_json::json!({"tool": "shell"}))
            .await
            .unwrap();
        log.log("tool.approved", "s1", "main", "approver", serde_json::json!({}))
            .await
            .unwrap();
        log.log("tool.proposed", "s2", "main", "agent", serde_json::json!({}))
            .await
            .unwrap();

        let events = log.recent("s1", 10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "tool.approved");
        assert_eq!(events[1].detail["tool"], "shell");
    }

    #[tokio::test]
    async fn test_detail_redacted() {
        let log = AuditLog::in_memory().unwrap();
        log.log(
            "tool.executed",
            "s1",
            "main",
            "agent",
            serde_json::json!({"command": "curl -H 'Authorization: Bearer abc123' host"}),
        )
        .await
        .unwrap();

        let events = log.recent("s1", 1).await.unwrap();
        let stored = events[0].detail["command"].as_str().unwrap();
        assert!(!stored.contains("abc123"));
        assert!(stored.contains("[REDACTED_TOKEN]"));
    }

    #[test]
    fn test_open_on_disk() {
        let path = std::env::temp_dir().join(format!("gatehouse-audit-{}.db", Uuid::new_v4()));
        let log = AuditLog::open(path.to_str().unwrap());
        assert!(log.is_ok());
        drop(log);
        let _ = std::fs::remove_file(&path);
    }
}
