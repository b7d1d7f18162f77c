pub mod error;
pub mod event;
pub mod message;
pub mod tools;
pub mod traits;
pub mod types;

pub use error::GateError;
pub use event::TurnEvent;
pub use message::{Message, ToolCallsPayload};
pub use tools::ToolRegistry;
pub use traits::{
    AuditLogger, ChatRequest, ExecOutput, ExecRequest, MemoryContext, MemoryStore, Provider,
    ProviderEvent, ProviderStream, Sandbox, Store, Tool, ToolPolicy,
};
pub use types::{
    ApprovalRequest, ApprovalResponse, ContentType, Role, Session, SessionOrigin, ToolCall,
    ToolDefinition, ToolResult, Usage, WorkspaceFile,
};
