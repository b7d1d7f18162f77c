//! Gatehouse Turn Engine
//!
//! Drives one user message through the tool-calling loop: context window
//! assembly, provider streaming, tool approval and dispatch, and history
//! compaction.

pub mod agent_loop;
pub mod compaction;
pub mod context_window;
pub mod engine_config;
pub mod prompt_cache;
pub mod sanitize;
pub mod system_prompt;
pub mod tool_dispatcher;

pub use agent_loop::{EventSink, SinkClosed, TurnContext, TurnEngine};
pub use compaction::{CompactionConfig, CompactionOutcome, Compactor, COMPACTION_MARKER};
pub use context_window::{BuiltContext, CharEstimator, ContextBuilder, ContextLimits, TokenEstimator};
pub use engine_config::EngineConfig;
pub use prompt_cache::{SessionWorkspace, WorkspaceCache};
pub use sanitize::sanitize_messages;
pub use system_prompt::PromptBuilder;
pub use tool_dispatcher::ToolDispatcher;
