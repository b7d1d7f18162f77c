use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ContentType, Role, ToolCall, ToolResult};

/// One stored entry in a session's history.
///
/// `content` is raw text for `ContentType::Text` and a serialized JSON
/// payload for the structured variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content_type: ContentType,
    pub content: String,
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Payload of an assistant message that proposed tool calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallsPayload {
    #[serde(default)]
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn build(session_id: &str, role: Role, content_type: ContentType, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content_type,
            content,
            token_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn user_text(session_id: &str, text: impl Into<String>) -> Self {
        Self::build(session_id, Role::User, ContentType::Text, text.into())
    }

    pub fn assistant_text(session_id: &str, text: impl Into<String>) -> Self {
        Self::build(session_id, Role::Assistant, ContentType::Text, text.into())
    }

    pub fn assistant_tool_calls(
        session_id: &str,
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> serde_json::Result<Self> {
        let payload = ToolCallsPayload {
            text: text.into(),
            tool_calls,
        };
        let content = serde_json::to_string(&payload)?;
        Ok(Self::build(session_id, Role::Assistant, ContentType::ToolCalls, content))
    }

    /// Tool results travel back to the model on the user side of the conversation.
    pub fn tool_results(session_id: &str, results: &[ToolResult]) -> serde_json::Result<Self> {
        let content = serde_json::to_string(results)?;
        Ok(Self::build(session_id, Role::User, ContentType::ToolResults, content))
    }

    pub fn with_token_count(mut self, tokens: u32) -> Self {
        self.token_count = tokens;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn is_text(&self) -> bool {
        self.content_type == ContentType::Text
    }

    /// Decode a `ToolCalls` message. Returns `None` for other content types.
    pub fn tool_calls(&self) -> Option<serde_json::Result<ToolCallsPayload>> {
        (self.content_type == ContentType::ToolCalls)
            .then(|| serde_json::from_str(&self.content))
    }

    /// Decode a `ToolResults` message. Returns `None` for other content types.
    pub fn tool_results_payload(&self) -> Option<serde_json::Result<Vec<ToolResult>>> {
        (self.content_type == ContentType::ToolResults)
            .then(|| serde_json::from_str(&self.content))
    }

    /// Call IDs referenced by a structured message, in payload order.
    /// Undecodable payloads yield `None`.
    pub fn call_ids(&self) -> Option<Vec<String>> {
        match self.content_type {
            ContentType::Text => None,
            ContentType::ToolCalls => self
                .tool_calls()?
                .ok()
                .map(|p| p.tool_calls.into_iter().map(|c| c.id).collect()),
            ContentType::ToolResults => self
                .tool_results_payload()?
                .ok()
                .map(|r| r.into_iter().map(|r| r.tool_call_id).collect()),
        }
    }
}
