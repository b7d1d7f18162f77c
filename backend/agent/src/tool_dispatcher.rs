//! Dispatcher for agent tool calls.
//!
//! One proposed call goes through: audit, approval, registry lookup,
//! sandboxed execution, audit. Every path ends in a `ToolResult` that is
//! sent back to the model; only a dispatch that actually ran (or tried to
//! run) a tool emits a `tool_result` event.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use gatehouse_core::{
    ApprovalRequest, AuditLogger, Sandbox, ToolCall, ToolPolicy, ToolRegistry, ToolResult,
    TurnEvent,
};
use gatehouse_sandbox::{ApprovalError, ApprovalScope, Approver};

use crate::agent_loop::{EventSink, SinkClosed};

/// Per-turn inputs for dispatching.
pub struct DispatchContext<'a> {
    pub session_id: &'a str,
    pub cancel: &'a CancellationToken,
    pub scope: &'a ApprovalScope,
    pub events: &'a EventSink,
}

enum Decision {
    Approved,
    Denied,
    TimedOut,
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    approver: Arc<Approver>,
    sandbox: Arc<dyn Sandbox>,
    policy: ToolPolicy,
    agent_id: String,
    audit: Option<Arc<dyn AuditLogger>>,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        approver: Arc<Approver>,
        sandbox: Arc<dyn Sandbox>,
        policy: ToolPolicy,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            approver,
            sandbox,
            policy,
            agent_id: agent_id.into(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn approver(&self) -> &Arc<Approver> {
        &self.approver
    }

    /// Best-effort audit record; failures are logged and swallowed.
    pub async fn audit(&self, event_type: &str, session_id: &str, actor: &str, detail: serde_json::Value) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit
            .log(event_type, session_id, &self.agent_id, actor, detail)
            .await
        {
            warn!(event_type, session_id, "Audit log write failed: {e}");
        }
    }

    async fn decide(
        &self,
        ctx: &DispatchContext<'_>,
        call: &ToolCall,
    ) -> Result<Decision, SinkClosed> {
        if let Some(approved) = self.approver.immediate_decision(ctx.scope) {
            return Ok(if approved { Decision::Approved } else { Decision::Denied });
        }

        let request = ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            session_id: ctx.session_id.to_string(),
            tool_name: call.name.clone(),
            input: call.input.clone(),
        };
        // Registered before the event goes out so a fast responder cannot miss it.
        let pending = match self.approver.register(request.clone()) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(tool = %call.name, "Approval registration failed: {e}");
                return Ok(Decision::Denied);
            }
        };
        ctx.events.emit(TurnEvent::ApprovalNeeded { request }).await?;

        Ok(match pending.wait(ctx.cancel).await {
            Ok(true) => Decision::Approved,
            Ok(false) => Decision::Denied,
            Err(ApprovalError::Timeout(_)) => Decision::TimedOut,
            Err(e) => {
                warn!(tool = %call.name, "Approval wait failed: {e}");
                Decision::Denied
            }
        })
    }

    /// Run one proposed tool call to completion.
    ///
    /// Only a dropped event receiver aborts dispatch; every other failure
    /// becomes an error-flagged result for the model.
    pub async fn dispatch(
        &self,
        ctx: &DispatchContext<'_>,
        call: &ToolCall,
    ) -> Result<ToolResult, SinkClosed> {
        let session_id = ctx.session_id;
        self.audit(
            "tool.proposed",
            session_id,
            "agent",
            json!({"call_id": call.id, "tool": call.name, "input": call.input}),
        )
        .await;

        let approver_actor = if ctx.scope.is_trusted() {
            "trusted"
        } else {
            self.approver.mode().as_str()
        };

        match self.decide(ctx, call).await? {
            Decision::Approved => {
                self.audit("tool.approved", session_id, approver_actor, json!({"call_id": call.id, "tool": call.name}))
                    .await;
            }
            Decision::Denied => {
                info!(tool = %call.name, session_id, "Tool call denied");
                self.audit("tool.denied", session_id, approver_actor, json!({"call_id": call.id, "tool": call.name}))
                    .await;
                return Ok(ToolResult::error(
                    &call.id,
                    format!("Tool call '{}' was denied by the approver. It was not executed.", call.name),
                ));
            }
            Decision::TimedOut => {
                info!(tool = %call.name, session_id, "Tool approval timed out");
                self.audit("tool.approval_timeout", session_id, approver_actor, json!({"call_id": call.id, "tool": call.name}))
                    .await;
                return Ok(ToolResult::error(
                    &call.id,
                    format!("Approval for tool call '{}' timed out. It was not executed.", call.name),
                ));
            }
        }

        let result = match self.registry.get(&call.name) {
            None => ToolResult::error(&call.id, format!("Unknown tool '{}'.", call.name)),
            Some(tool) => match tool.execute(call.input.clone(), self.sandbox.as_ref(), &self.policy).await {
                Ok(output) => ToolResult::success(&call.id, output),
                Err(e) => ToolResult::error(&call.id, format!("Tool '{}' failed: {e}", call.name)),
            },
        };

        if result.is_error {
            warn!(tool = %call.name, session_id, "Tool call failed: {}", result.content);
            self.audit(
                "tool.failed",
                session_id,
                "agent",
                json!({"call_id": call.id, "tool": call.name, "error": result.content}),
            )
            .await;
        } else {
            self.audit(
                "tool.executed",
                session_id,
                "agent",
                json!({"call_id": call.id, "tool": call.name, "output_bytes": result.content.len()}),
            )
            .await;
        }

        ctx.events
            .emit(TurnEvent::ToolResult {
                result: result.clone(),
            })
            .await?;
        Ok(result)
    }
}
