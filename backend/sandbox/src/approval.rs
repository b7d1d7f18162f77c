//! Human-in-the-loop approval gate for tool execution.
//!
//! Per tool call: `created -> auto-approved | auto-denied` in the
//! non-blocking modes, or `created -> pending -> approved | denied |
//! timed-out` in `Ask` mode. Each pending request owns a one-shot channel
//! keyed by its request ID; `respond` resolves it at most once.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gatehouse_core::{ApprovalRequest, ApprovalResponse};

/// How tool calls are gated for a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Always approve without blocking.
    Auto,
    /// Always deny without blocking.
    Deny,
    /// Block until a human answers or the caller gives up.
    #[default]
    Ask,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalMode::Auto => "auto",
            ApprovalMode::Deny => "deny",
            ApprovalMode::Ask => "ask",
        }
    }
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(ApprovalMode::Auto),
            "deny" => Ok(ApprovalMode::Deny),
            "ask" => Ok(ApprovalMode::Ask),
            other => Err(format!("unknown approval mode '{other}'")),
        }
    }
}

/// Per-call override carried by the caller, independent of the configured mode.
///
/// Trusted autonomous paths (scheduled notifications and the like) run with
/// `ApprovalScope::trusted()` and skip both `Ask` and `Deny`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalScope {
    trusted: bool,
}

impl ApprovalScope {
    pub fn trusted() -> Self {
        Self { trusted: true }
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval for request {0} timed out")]
    Timeout(String),

    #[error("approval request {0} was discarded before a decision")]
    Dropped(String),

    #[error("approval request {0} is already pending")]
    Duplicate(String),
}

/// Fired once for every request that enters the pending table.
pub type Notifier = Arc<dyn Fn(&ApprovalRequest) + Send + Sync>;

type PendingTable = Arc<RwLock<HashMap<String, oneshot::Sender<bool>>>>;

fn read_table(table: &PendingTable) -> RwLockReadGuard<'_, HashMap<String, oneshot::Sender<bool>>> {
    table.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_table(
    table: &PendingTable,
) -> RwLockWriteGuard<'_, HashMap<String, oneshot::Sender<bool>>> {
    table.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Approver {
    mode: ApprovalMode,
    ask_timeout: Option<Duration>,
    notifier: Option<Notifier>,
    pending: PendingTable,
}

impl Approver {
    pub fn new(mode: ApprovalMode) -> Self {
        Self {
            mode,
            ask_timeout: None,
            notifier: None,
            pending: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Upper bound on an `Ask` wait, on top of the caller's cancellation.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ask_timeout = Some(timeout);
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn mode(&self) -> ApprovalMode {
        self.mode
    }

    /// Decision that needs no human, if any.
    pub fn immediate_decision(&self, scope: &ApprovalScope) -> Option<bool> {
        if scope.is_trusted() {
            return Some(true);
        }
        match self.mode {
            ApprovalMode::Auto => Some(true),
            ApprovalMode::Deny => Some(false),
            ApprovalMode::Ask => None,
        }
    }

    /// Put a request into the pending table and fire the notifier.
    ///
    /// The returned handle must be awaited to get the decision; dropping it
    /// withdraws the request.
    pub fn register(&self, request: ApprovalRequest) -> Result<PendingApproval, ApprovalError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut table = write_table(&self.pending);
            if table.contains_key(&request.id) {
                return Err(ApprovalError::Duplicate(request.id));
            }
            table.insert(request.id.clone(), tx);
        }
        info!(
            request_id = %request.id,
            session_id = %request.session_id,
            tool = %request.tool_name,
            "Approval pending"
        );

        if let Some(notify) = &self.notifier {
            notify(&request);
        }

        Ok(PendingApproval {
            id: request.id,
            rx,
            table: Arc::clone(&self.pending),
            timeout: self.ask_timeout,
        })
    }

    /// Decide on one tool call.
    ///
    /// `Auto` and `Deny` answer at once. `Ask` blocks until `respond` is
    /// called for this request ID or `cancel` fires, which yields
    /// `ApprovalError::Timeout`.
    pub async fn request_approval(
        &self,
        cancel: &CancellationToken,
        scope: &ApprovalScope,
        request: ApprovalRequest,
    ) -> Result<bool, ApprovalError> {
        if let Some(decision) = self.immediate_decision(scope) {
            debug!(tool = %request.tool_name, decision, mode = %self.mode, "Approval decided without prompt");
            return Ok(decision);
        }
        self.register(request)?.wait(cancel).await
    }

    /// Resolve a pending request. Unknown or already-resolved IDs are ignored.
    pub fn respond(&self, response: ApprovalResponse) -> bool {
        let sender = write_table(&self.pending).remove(&response.id);
        match sender {
            Some(tx) => {
                info!(request_id = %response.id, approved = response.approved, "Approval resolved");
                tx.send(response.approved).is_ok()
            }
            None => {
                debug!(request_id = %response.id, "Ignoring response for unknown approval request");
                false
            }
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        read_table(&self.pending).contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        read_table(&self.pending).len()
    }
}

/// A request sitting in the pending table.
pub struct PendingApproval {
    id: String,
    rx: oneshot::Receiver<bool>,
    table: PendingTable,
    timeout: Option<Duration>,
}

impl PendingApproval {
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<bool, ApprovalError> {
        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            decision = &mut self.rx => {
                decision.map_err(|_| ApprovalError::Dropped(self.id.clone()))
            }
            _ = cancel.cancelled() => {
                warn!(request_id = %self.id, "Approval wait cancelled");
                Err(ApprovalError::Timeout(self.id.clone()))
            }
            _ = deadline => {
                warn!(request_id = %self.id, "Approval wait timed out");
                Err(ApprovalError::Timeout(self.id.clone()))
            }
        }
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        write_table(&self.table).remove(&self.id);
    }
}
