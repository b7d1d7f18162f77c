use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use gatehouse_core::{Sandbox, Tool, ToolPolicy};
use serde_json::Value;
use tokio::fs;

pub struct FileReadTool;

/// Resolve `path` against the workdir, refusing anything that escapes it.
fn resolve(policy: &ToolPolicy, path: &str) -> anyhow::Result<PathBuf> {
    let relative = Path::new(path);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.trim().is_empty() || escapes {
        anyhow::bail!("Security violation: path must be relative to the workspace without '..'");
    }
    Ok(match &policy.workdir {
        Some(root) => root.join(relative),
        None => relative.to_path_buf(),
    })
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path, relative to the workspace."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(
        &self,
        args: Value,
        _sandbox: &dyn Sandbox,
        policy: &ToolPolicy,
    ) -> anyhow::Result<String> {
        let path_str = args["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' argument"))?;
        let path = resolve(policy, path_str)?;

        let mut content = fs::read_to_string(&path).await?;
        if content.len() > policy.max_output_bytes {
            let mut cut = policy.max_output_bytes;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            content.truncate(cut);
            content.push_str("\n[file truncated]");
        }
        Ok(content)
    }
}
