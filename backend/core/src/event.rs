use serde::{Deserialize, Serialize};

use crate::types::{ApprovalRequest, ToolCall, ToolResult, Usage};

/// Events streamed to the caller while a turn runs.
///
/// Every turn ends with exactly one terminal event (`Done` or `Error`),
/// after which the channel is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Incremental assistant text.
    Token { text: String },
    /// The model proposed a tool call.
    ToolCall { call: ToolCall },
    /// A tool ran (successfully or not) and produced this result.
    ToolResult { result: ToolResult },
    /// A tool call is waiting for a human decision.
    ApprovalNeeded { request: ApprovalRequest },
    /// Final assistant text plus usage summed across the turn.
    Done { message: String, usage: Usage },
    /// The turn failed.
    Error { message: String },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }

    /// Short snake_case label, used for logs and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnEvent::Token { .. } => "token",
            TurnEvent::ToolCall { .. } => "tool_call",
            TurnEvent::ToolResult { .. } => "tool_result",
            TurnEvent::ApprovalNeeded { .. } => "approval_needed",
            TurnEvent::Done { .. } => "done",
            TurnEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(TurnEvent::Done {
            message: "ok".into(),
            usage: Usage::default()
        }
        .is_terminal());
        assert!(TurnEvent::Error { message: "boom".into() }.is_terminal());
        assert!(!TurnEvent::Token { text: "h".into() }.is_terminal());
    }

    #[test]
    fn test_event_wire_tag() {
        let json = serde_json::to_value(TurnEvent::Token { text: "hi".into() }).unwrap();
        assert_eq!(json["type"], "token");
        assert_eq!(json["text"], "hi");
    }
}
