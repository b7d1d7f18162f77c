use async_trait::async_trait;
use gatehouse_core::{ExecRequest, Sandbox, Tool, ToolPolicy};
use serde_json::Value;

pub struct ShellTool;

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the agent workspace. Use this to run scripts or inspect the system."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to execute"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Optional timeout, capped by the deployment limit"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(
        &self,
        args: Value,
        sandbox: &dyn Sandbox,
        policy: &ToolPolicy,
    ) -> anyhow::Result<String> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'command' argument"))?;
        let timeout_secs = args["timeout_secs"]
            .as_u64()
            .map(|t| t.min(policy.timeout_secs))
            .unwrap_or(policy.timeout_secs);

        let output = sandbox
            .exec(ExecRequest {
                command: command.to_string(),
                cwd: policy.workdir.clone(),
                env: Vec::new(),
                timeout_secs,
                max_output_bytes: policy.max_output_bytes,
            })
            .await?;

        if output.timed_out {
            anyhow::bail!("Command timed out after {timeout_secs}s");
        }

        let mut text = format!("Stdout:\n{}", output.stdout);
        if !output.stderr.is_empty() {
            text.push_str(&format!("\nStderr:\n{}", output.stderr));
        }
        if output.exit_code != 0 {
            text.push_str(&format!("\n[exit code {}]", output.exit_code));
        }
        if output.truncated {
            text.push_str("\n[output truncated]");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_sandbox::LocalSandbox;

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let policy = ToolPolicy {
            workdir: Some(dir.path().to_path_buf()),
            ..ToolPolicy::default()
        };

        let out = ShellTool
            .execute(serde_json::json!({"command": "ls"}), &LocalSandbox::default(), &policy)
            .await
            .unwrap();
        assert!(out.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_reports_exit_code_and_stderr() {
        let out = ShellTool
            .execute(
                serde_json::json!({"command": "echo bad >&2; exit 2"}),
                &LocalSandbox::default(),
                &ToolPolicy::default(),
            )
            .await
            .unwrap();
        assert!(out.contains("Stderr:\nbad"));
        assert!(out.ends_with("[exit code 2]"));
    }

    #[tokio::test]
    async fn test_missing_command() {
        let err = ShellTool
            .execute(serde_json::json!({}), &LocalSandbox::default(), &ToolPolicy::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("command"));
    }
}
