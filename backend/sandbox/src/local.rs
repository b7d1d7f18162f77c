//! Runs commands as child processes of the gateway, behind a `CommandGuard`.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

use gatehouse_core::{ExecOutput, ExecRequest, Sandbox};

use crate::exec_approval::{CommandGuard, GuardVerdict};

/// Fallback when a request asks for no timeout.
const MAX_TIMEOUT_SECS: u64 = 600;

pub struct LocalSandbox {
    guard: CommandGuard,
}

impl Default for LocalSandbox {
    fn default() -> Self {
        Self::new(CommandGuard::default())
    }
}

impl LocalSandbox {
    pub fn new(guard: CommandGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn name(&self) -> &str {
        "local"
    }

    async fn exec(&self, request: ExecRequest) -> Result<ExecOutput> {
        if let GuardVerdict::Blocked { reason } = self.guard.check(&request.command) {
            bail!("command blocked: {reason}");
        }

        let preview: String = request.command.chars().take(80).collect();
        info!(command = %preview, "Running command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&request.command);
        if let Some(cwd) = &request.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &request.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("failed to spawn shell")?;
        let mut stdout = child.stdout.take().context("missing stdout pipe")?;
        let mut stderr = child.stderr.take().context("missing stderr pipe")?;

        let timeout_secs = if request.timeout_secs > 0 {
            request.timeout_secs
        } else {
            MAX_TIMEOUT_SECS
        };
        let max = request.max_output_bytes;

        let run = async {
            let mut stdout_buf = Vec::new();
            let mut stderr_buf = Vec::new();
            let (out, err) = tokio::join!(
                stdout.read_to_end(&mut stdout_buf),
                stderr.read_to_end(&mut stderr_buf)
            );
            out?;
            err?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((stdout_buf, stderr_buf, status.code().unwrap_or(-1)))
        };

        match tokio::time::timeout(Duration::from_secs(timeout_secs), run).await {
            Ok(result) => {
                let (mut stdout_buf, mut stderr_buf, exit_code) = result?;
                let truncated = stdout_buf.len() > max || stderr_buf.len() > max;
                stdout_buf.truncate(max);
                stderr_buf.truncate(max);
                Ok(ExecOutput {
                    stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                    exit_code,
                    timed_out: false,
                    truncated,
                })
            }
            Err(_) => {
                warn!(timeout_secs, "Command timed out");
                Ok(ExecOutput {
                    stdout: String::new(),
                    stderr: format!("Command timed out after {timeout_secs}s"),
                    exit_code: -1,
                    timed_out: true,
                    truncated: false,
                })
            }
        }
    }
}
