//! Turn Event Logger
//!
//! Mirrors every event a turn emits to the `turn_events` tracing target,
//! which the file layer writes out as NDJSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use gatehouse_core::TurnEvent;

use crate::redact::{redact_json, redact_sensitive_data};

pub const TURN_EVENTS_TARGET: &str = "turn_events";

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: &'static str,
    pub detail: serde_json::Value,
}

impl EventLogEntry {
    /// Redacted snapshot of one turn event.
    pub fn from_event(session_id: &str, event: &TurnEvent) -> Self {
        let detail = match event {
            TurnEvent::Token { text } => serde_json::json!({ "len": text.len() }),
            TurnEvent::ToolCall { call } => serde_json::json!({
                "id": call.id,
                "name": call.name,
                "input": redact_json(&call.input),
            }),
            TurnEvent::ToolResult { result } => serde_json::json!({
                "tool_call_id": result.tool_call_id,
                "is_error": result.is_error,
                "content": redact_sensitive_data(&result.content),
            }),
            TurnEvent::ApprovalNeeded { request } => serde_json::json!({
                "id": request.id,
                "tool_name": request.tool_name,
            }),
            TurnEvent::Done { message, usage } => serde_json::json!({
                "message": redact_sensitive_data(message),
                "usage": usage,
            }),
            TurnEvent::Error { message } => serde_json::json!({
                "message": redact_sensitive_data(message),
            }),
        };

        Self {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            kind: event.kind(),
            detail,
        }
    }
}

pub struct EventLogger;

impl EventLogger {
    /// Logs a turn event, redacting any user or tool content first.
    pub fn log_turn_event(session_id: &str, event: &TurnEvent) {
        // Token events are too chatty for the info level.
        if matches!(event, TurnEvent::Token { .. }) {
            return;
        }
        let entry = EventLogEntry::from_event(session_id, event);
        let detail = entry.detail.to_string();
        info!(
            target: TURN_EVENTS_TARGET,
            session_id = %entry.session_id,
            kind = entry.kind,
            detail = %detail,
            "Turn event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::{ToolCall, Usage};

    #[test]
    fn test_tool_input_redacted() {
        let event = TurnEvent::ToolCall {
            call: ToolCall {
                id: "c1".into(),
                name: "shell".into(),
                input: serde_json::json!({"command": "call 555-123-4567"}),
            },
        };
        let entry = EventLogEntry::from_event("s1", &event);
        assert_eq!(entry.kind, "tool_call");
        assert_eq!(entry.detail["input"]["command"], "call [REDACTED_PHONE]");
    }

    #[test]
    fn test_done_carries_usage() {
        let event = TurnEvent::Done {
            message: "ok".into(),
            usage: Usage {
                input_tokens: 3,
                output_tokens: 4,
            },
        };
        let entry = EventLogEntry::from_event("s1", &event);
        assert_eq!(entry.detail["usage"]["output_tokens"], 4);
        EventLogger::log_turn_event("s1", &event);
    }
}
