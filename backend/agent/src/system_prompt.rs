//! System prompt builder.
//!
//! The output must be stable for a given configuration and tool set: the
//! context builder relies on identical prompts across turns.

use gatehouse_core::ToolDefinition;

pub struct PromptBuilder {
    agent_id: String,
    instructions: Option<String>,
}

impl PromptBuilder {
    pub fn new(agent_id: impl Into<String>, instructions: Option<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            instructions,
        }
    }

    pub fn build(&self, tools: &[ToolDefinition]) -> String {
        let mut prompt = format!(
            "You are {}, an assistant running on a self-hosted Gatehouse gateway. \
             Help the user directly and keep answers concise.",
            self.agent_id
        );

        if let Some(instructions) = self.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
            prompt.push_str("\n\n");
            prompt.push_str(instructions.trim());
        }

        prompt.push_str(
            "\n\nRULES:\n\
             1. Only call tools that are listed below.\n\
             2. Tool calls may be denied by a human reviewer. If one is denied, \
             explain what you wanted to do instead of retrying it unchanged.\n\
             3. A message starting with \"[Conversation summary]\" condenses earlier turns.",
        );

        if tools.is_empty() {
            prompt.push_str("\n\nNo tools are available.");
        } else {
            prompt.push_str("\n\nTools available:");
            for tool in tools {
                prompt.push_str(&format!("\n- {}: {}", tool.name, tool.description));
            }
        }
        prompt
    }
}
