//! Tool execution safety: the human approval gate, its socket relay,
//! and a local process sandbox guarded by static command checks.

pub mod approval;
pub mod approval_socket;
pub mod exec_approval;
pub mod local;

pub use approval::{ApprovalError, ApprovalMode, ApprovalScope, Approver, Notifier, PendingApproval};
pub use approval_socket::ApprovalRelay;
pub use exec_approval::{CommandGuard, GuardVerdict};
pub use local::LocalSandbox;
