//! Relay between the approval gate and an external approver.
//!
//! Pending requests are broadcast to every connected client as JSON lines.
//! Clients answer with `ApprovalResponse` JSON lines, which are fed back into
//! `Approver::respond`. On unix the relay can be exposed over a socket so a
//! TUI or desktop app can grant or deny tool calls in real time.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use gatehouse_core::{ApprovalRequest, ApprovalResponse};

use crate::approval::{Approver, Notifier};

pub struct ApprovalRelay {
    requests: broadcast::Sender<ApprovalRequest>,
}

impl Default for ApprovalRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalRelay {
    pub fn new() -> Self {
        let (requests, _) = broadcast::channel(64);
        Self { requests }
    }

    /// A notifier for `Approver::with_notifier` that publishes every new
    /// pending request to subscribers.
    pub fn notifier(&self) -> Notifier {
        let tx = self.requests.clone();
        Arc::new(move |request: &ApprovalRequest| {
            // No subscribers is fine; the request stays pending until someone answers.
            let _ = tx.send(request.clone());
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.requests.subscribe()
    }
}

/// Apply one line of client input. Returns true if it resolved a pending request.
pub fn handle_line(line: &str, approver: &Approver) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    match serde_json::from_str::<ApprovalResponse>(trimmed) {
        Ok(response) => {
            debug!(id = %response.id, approved = response.approved, "Received approval verdict");
            approver.respond(response)
        }
        Err(e) => {
            warn!("Unparseable approval response: {e}");
            false
        }
    }
}

#[cfg(unix)]
pub use unix::ApprovalSocketServer;

#[cfg(unix)]
mod unix {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tokio::sync::broadcast;
    use tokio::task::JoinHandle;
    use tracing::{error, info};

    use gatehouse_core::ApprovalRequest;

    use super::{handle_line, ApprovalRelay};
    use crate::approval::Approver;

    /// Approval socket server. The socket file is removed on drop.
    pub struct ApprovalSocketServer {
        socket_path: PathBuf,
        accept_task: JoinHandle<()>,
    }

    impl ApprovalSocketServer {
        pub async fn start(
            socket_path: impl AsRef<Path>,
            relay: &ApprovalRelay,
            approver: Arc<Approver>,
        ) -> Result<Self> {
            let socket_path = socket_path.as_ref().to_path_buf();

            // Remove stale socket file.
            if socket_path.exists() {
                tokio::fs::remove_file(&socket_path).await.ok();
            }

            let listener = UnixListener::bind(&socket_path).with_context(|| {
                format!("Failed to bind approval socket: {}", socket_path.display())
            })?;

            info!(socket = %socket_path.display(), "Approval socket server listening");

            let requests = relay.requests.clone();
            let accept_task = tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, _)) => {
                            let rx = requests.subscribe();
                            tokio::spawn(handle_client(stream, rx, Arc::clone(&approver)));
                        }
                        Err(e) => {
                            error!("Approval socket accept error: {e}");
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            });

            Ok(Self {
                socket_path,
                accept_task,
            })
        }

        pub fn path(&self) -> &Path {
            &self.socket_path
        }
    }

    impl Drop for ApprovalSocketServer {
        fn drop(&mut self) {
            self.accept_task.abort();
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }

    async fn handle_client(
        stream: UnixStream,
        mut request_rx: broadcast::Receiver<ApprovalRequest>,
        approver: Arc<Approver>,
    ) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Push pending requests to the client.
        let write_task = tokio::spawn(async move {
            loop {
                match request_rx.recv().await {
                    Ok(request) => {
                        let Ok(json) = serde_json::to_string(&request) else {
                            continue;
                        };
                        if write_half.write_all(json.as_bytes()).await.is_err()
                            || write_half.write_all(b"\n").await.is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!("Approval client lagged, {n} requests skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    handle_line(&line, &approver);
                }
                Err(e) => {
                    error!("Approval socket read error: {e}");
                    break;
                }
            }
        }

        write_task.abort();
        info!("Approval socket client disconnected");
    }
}
