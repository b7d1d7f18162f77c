use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::types::{Session, ToolCall, ToolDefinition, Usage};

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Events produced by a provider while answering a `ChatRequest`.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Token(String),
    ToolCall(ToolCall),
    Usage(Usage),
    Error(String),
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>;

/// Trait for LLM completion services.
///
/// Non-streaming requests still answer with a stream; it simply carries the
/// whole reply in as few events as the provider likes.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name (e.g., "openrouter", "mock").
    fn name(&self) -> &str;

    async fn chat(&self, request: ChatRequest) -> Result<ProviderStream>;
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Durable session and message storage. Implementations serialize their
/// own writes; each call is a single atomic write.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    async fn create_session(&self, session: &Session) -> Result<()>;

    /// Bump `updated_at` to now.
    async fn touch_session(&self, session_id: &str) -> Result<()>;

    async fn list_sessions(&self, limit: usize) -> Result<Vec<Session>>;

    /// Delete a session and all of its messages.
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    async fn append_message(&self, message: &Message) -> Result<()>;

    /// The newest `limit` messages, returned oldest first.
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;

    async fn message_count(&self, session_id: &str) -> Result<usize>;

    /// Returns the number of rows removed.
    async fn delete_messages(&self, ids: &[String]) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// Sandbox + tools
// ---------------------------------------------------------------------------

/// Command execution request handed to a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
    pub truncated: bool,
}

/// Opaque execution capability passed through to tools.
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &str;

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput>;
}

/// Limits applied to every tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Root directory tools may touch. `None` means the process cwd.
    pub workdir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            workdir: None,
            timeout_secs: 120,
            max_output_bytes: 200_000,
        }
    }
}

/// A capability that an agent can invoke dynamically.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name of the tool (e.g., "shell").
    fn name(&self) -> &str;

    /// Description for the LLM prompt.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;

    /// Execute the tool with the given input.
    async fn execute(
        &self,
        input: serde_json::Value,
        sandbox: &dyn Sandbox,
        policy: &ToolPolicy,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Audit + memory
// ---------------------------------------------------------------------------

/// Append-only audit trail. Callers treat failures as best-effort.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log(
        &self,
        event_type: &str,
        session_id: &str,
        agent_id: &str,
        actor: &str,
        detail: serde_json::Value,
    ) -> Result<()>;
}

/// Workspace-tier content produced by a memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryContext {
    pub text: String,
    /// Content hash per memory source.
    pub hashes: HashMap<String, String>,
    /// True when `hashes` differs from the hashes the caller passed in.
    pub changed: bool,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn build_context(
        &self,
        agent_id: &str,
        last_hashes: &HashMap<String, String>,
    ) -> Result<MemoryContext>;
}
