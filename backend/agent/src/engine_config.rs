//! Runtime settings for a `TurnEngine`.

use std::time::Duration;

use gatehouse_core::ToolPolicy;

use crate::compaction::CompactionConfig;
use crate::context_window::ContextLimits;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Agent that owns sessions created by this engine.
    pub agent_id: String,
    pub model: String,
    /// Operator instructions appended to the agent identity.
    pub instructions: Option<String>,
    pub max_output_tokens: u32,
    pub limits: ContextLimits,
    /// Messages loaded from the store per iteration before budgeting.
    pub history_limit: usize,
    pub max_iterations: usize,
    /// Capacity of the per-turn event channel.
    pub event_buffer: usize,
    pub compact_before_turn: bool,
    pub compaction: CompactionConfig,
    pub tool_policy: ToolPolicy,
    /// How long an idle session keeps its workspace cache.
    pub workspace_idle: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_id: "main".to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            instructions: None,
            max_output_tokens: 4_096,
            limits: ContextLimits::default(),
            history_limit: 50,
            max_iterations: 10,
            event_buffer: 64,
            compact_before_turn: true,
            compaction: CompactionConfig::default(),
            tool_policy: ToolPolicy::default(),
            workspace_idle: Duration::from_secs(600),
        }
    }
}
