//! Memory tool: lets the agent persist a fact into its workspace memory.
//!
//! Notes land in the agent's `MEMORY.md` and show up in the workspace block
//! of the system prompt from the next turn on.

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::{Sandbox, Tool, ToolPolicy};
use gatehouse_memory::FileMemoryStore;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct MemoryNoteInput {
    note: String,
}

pub struct MemoryNoteTool {
    store: Arc<FileMemoryStore>,
    agent_id: String,
}

impl MemoryNoteTool {
    pub fn new(store: Arc<FileMemoryStore>, agent_id: impl Into<String>) -> Self {
        Self {
            store,
            agent_id: agent_id.into(),
        }
    }
}

#[async_trait]
impl Tool for MemoryNoteTool {
    fn name(&self) -> &str {
        "memory_note"
    }

    fn description(&self) -> &str {
        "Save a short fact to long-term memory so it is available in future conversations."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "note": {
                    "type": "string",
                    "description": "The fact to remember, in one line"
                }
            },
            "required": ["note"]
        })
    }

    async fn execute(
        &self,
        args: Value,
        _sandbox: &dyn Sandbox,
        _policy: &ToolPolicy,
    ) -> anyhow::Result<String> {
        let input: MemoryNoteInput = serde_json::from_value(args)?;
        self.store.append_note(&self.agent_id, &input.note).await?;
        Ok("Saved to memory.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::MemoryStore;
    use gatehouse_sandbox::LocalSandbox;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_note_is_visible_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileMemoryStore::new(dir.path()));
        let tool = MemoryNoteTool::new(Arc::clone(&store), "main");

        let out = tool
            .execute(
                serde_json::json!({"note": "prefers metric units"}),
                &LocalSandbox::default(),
                &ToolPolicy::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, "Saved to memory.");

        let ctx = store.build_context("main", &HashMap::new()).await.unwrap();
        assert!(ctx.text.contains("prefers metric units"));
    }

    #[tokio::test]
    async fn test_missing_note_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = MemoryNoteTool::new(Arc::new(FileMemoryStore::new(dir.path())), "main");
        let result = tool
            .execute(serde_json::json!({}), &LocalSandbox::default(), &ToolPolicy::default())
            .await;
        assert!(result.is_err());
    }
}
