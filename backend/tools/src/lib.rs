pub mod file;
pub mod memory_tool;
pub mod shell;

pub use file::FileReadTool;
pub use memory_tool::MemoryNoteTool;
pub use shell::ShellTool;

use std::sync::Arc;

use gatehouse_core::ToolRegistry;
use gatehouse_memory::FileMemoryStore;

/// Registry with the built-in tools for one agent.
pub fn default_registry(memory: Arc<FileMemoryStore>, agent_id: &str) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ShellTool));
    registry.register(Arc::new(FileReadTool));
    registry.register(Arc::new(MemoryNoteTool::new(memory, agent_id)));
    registry
}
