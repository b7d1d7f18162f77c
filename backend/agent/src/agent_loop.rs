//! Core turn execution loop.
//!
//! `run_turn` persists the user message, spawns one task per turn and hands
//! back the receiving end of a bounded event channel. The task loops
//! model call -> tool dispatch until the model answers without tools or the
//! iteration cap is hit, then emits exactly one `Done` or `Error`.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use gatehouse_core::{
    ChatRequest, GateError, MemoryStore, Message, Provider, ProviderEvent, Session, SessionOrigin,
    Store, ToolCall, TurnEvent, Usage, WorkspaceFile,
};
use gatehouse_logging::EventLogger;
use gatehouse_sandbox::{ApprovalScope, Approver};

use crate::compaction::{CompactionOutcome, Compactor};
use crate::context_window::{CharEstimator, TokenEstimator};
use crate::engine_config::EngineConfig;
use crate::prompt_cache::{SessionWorkspace, WorkspaceCache};
use crate::sanitize::sanitize_messages;
use crate::system_prompt::PromptBuilder;
use crate::tool_dispatcher::{DispatchContext, ToolDispatcher};

/// Name of the workspace block fed from the memory store.
const MEMORY_BLOCK: &str = "memory";

#[derive(Debug, Error)]
#[error("turn event receiver dropped")]
pub struct SinkClosed;

/// Producer side of a turn's event channel. Every event is mirrored to the
/// turn event log before it is queued.
pub struct EventSink {
    session_id: String,
    tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(session_id: impl Into<String>, tx: mpsc::Sender<TurnEvent>) -> Self {
        Self {
            session_id: session_id.into(),
            tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop waiting for capacity once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Waits for channel capacity; fails once the receiver is gone, or when
    /// the turn is cancelled while the channel is full.
    pub async fn emit(&self, event: TurnEvent) -> Result<(), SinkClosed> {
        EventLogger::log_turn_event(&self.session_id, &event);
        tokio::select! {
            biased;
            sent = self.tx.send(event) => sent.map_err(|_| SinkClosed),
            _ = self.cancel.cancelled() => Err(SinkClosed),
        }
    }
}

/// Caller-supplied inputs for one turn.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub cancel: CancellationToken,
    /// Used only when the session does not exist yet.
    pub origin: Option<SessionOrigin>,
    pub scope: ApprovalScope,
}

impl TurnContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, origin: SessionOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Skip the approval gate for this turn (scheduled and other
    /// operator-initiated runs).
    pub fn trusted(mut self) -> Self {
        self.scope = ApprovalScope::trusted();
        self
    }
}

enum TurnOutcome {
    Done { message: String, usage: Usage },
    Failed(String),
}

fn failed(message: impl Into<String>) -> Result<TurnOutcome, SinkClosed> {
    Ok(TurnOutcome::Failed(message.into()))
}

/// Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct TurnEngine {
    config: Arc<EngineConfig>,
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,
    dispatcher: Arc<ToolDispatcher>,
    compactor: Arc<Compactor>,
    memory: Option<Arc<dyn MemoryStore>>,
    workspaces: Arc<WorkspaceCache>,
    prompt: Arc<PromptBuilder>,
    estimator: Arc<dyn TokenEstimator>,
}

impl TurnEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn Provider>,
        dispatcher: ToolDispatcher,
    ) -> Self {
        let estimator: Arc<dyn TokenEstimator> = Arc::new(CharEstimator);

        let mut compaction = config.compaction.clone();
        if compaction.model.is_empty() {
            compaction.model = config.model.clone();
        }
        let compactor = Compactor::new(Arc::clone(&store), Arc::clone(&provider), compaction)
            .with_estimator(Arc::clone(&estimator));

        Self {
            workspaces: Arc::new(WorkspaceCache::new(
                config.limits,
                Arc::clone(&estimator),
                config.workspace_idle,
            )),
            prompt: Arc::new(PromptBuilder::new(&config.agent_id, config.instructions.clone())),
            compactor: Arc::new(compactor),
            dispatcher: Arc::new(dispatcher),
            config: Arc::new(config),
            store,
            provider,
            memory: None,
            estimator,
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The approval gate shared by every turn of this engine.
    pub fn approver(&self) -> Arc<Approver> {
        Arc::clone(self.dispatcher.approver())
    }

    pub async fn compact_session(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Result<CompactionOutcome, GateError> {
        let outcome = self.compactor.compact_session(cancel, session_id).await?;
        if matches!(outcome, CompactionOutcome::Compacted { .. }) {
            // Blocks sent earlier went out with the summarized history.
            self.workspaces.invalidate(session_id);
        }
        Ok(outcome)
    }

    /// Start a turn.
    ///
    /// Errors returned here happen before anything is streamed (session
    /// lookup, persisting the user message). Everything later arrives as a
    /// terminal `Error` event.
    #[instrument(skip(self, ctx, user_text))]
    pub async fn run_turn(
        &self,
        ctx: TurnContext,
        session_id: &str,
        user_text: &str,
    ) -> Result<mpsc::Receiver<TurnEvent>, GateError> {
        let session = self.ensure_session(session_id, ctx.origin.as_ref()).await?;

        let user = Message::user_text(session_id, user_text).with_token_count(self.tokens(user_text));
        self.store
            .append_message(&user)
            .await
            .map_err(GateError::storage)?;

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let sink = EventSink::new(session_id, tx).with_cancel(ctx.cancel.clone());
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(ctx, session, sink).await;
        });
        Ok(rx)
    }

    async fn ensure_session(
        &self,
        session_id: &str,
        origin: Option<&SessionOrigin>,
    ) -> Result<Session, GateError> {
        if let Some(session) = self
            .store
            .get_session(session_id)
            .await
            .map_err(GateError::storage)?
        {
            return Ok(session);
        }

        let origin = origin.cloned().unwrap_or_default();
        let session = Session::new(session_id, &self.config.agent_id, &origin);
        if let Err(e) = self.store.create_session(&session).await {
            // A concurrent turn may have created it first.
            return match self.store.get_session(session_id).await {
                Ok(Some(existing)) => Ok(existing),
                _ => Err(GateError::storage(e)),
            };
        }
        info!(session_id, channel = %session.channel, "Session created");
        Ok(session)
    }

    fn tokens(&self, text: &str) -> u32 {
        u32::try_from(self.estimator.estimate(text)).unwrap_or(u32::MAX)
    }

    async fn touch(&self, session_id: &str) {
        if let Err(e) = self.store.touch_session(session_id).await {
            warn!(session_id, "Failed to touch session: {e}");
        }
    }

    async fn drive(self, ctx: TurnContext, session: Session, sink: EventSink) {
        let session_id = session.id.as_str();
        self.dispatcher
            .audit("turn.started", session_id, "user", json!({ "channel": session.channel }))
            .await;

        if self.config.compact_before_turn {
            match self.compact_session(&ctx.cancel, session_id).await {
                Ok(CompactionOutcome::Compacted { removed, .. }) => {
                    info!(session_id, removed, "Compacted history before turn");
                }
                Ok(CompactionOutcome::Skipped { .. }) => {}
                Err(e) => warn!(session_id, "Pre-turn compaction failed: {e}"),
            }
        }

        match self.run_loop(&ctx, &session, &sink).await {
            Ok(TurnOutcome::Done { message, usage }) => {
                self.dispatcher
                    .audit(
                        "turn.completed",
                        session_id,
                        "agent",
                        json!({ "input_tokens": usage.input_tokens, "output_tokens": usage.output_tokens }),
                    )
                    .await;
                let _ = sink.emit(TurnEvent::Done { message, usage }).await;
            }
            Ok(TurnOutcome::Failed(message)) => {
                warn!(session_id, "Turn failed: {message}");
                self.dispatcher
                    .audit("turn.failed", session_id, "agent", json!({ "error": message }))
                    .await;
                let _ = sink.emit(TurnEvent::Error { message }).await;
            }
            Err(SinkClosed) if ctx.cancel.is_cancelled() => {
                info!(session_id, "Turn cancelled while the event channel was full");
                self.dispatcher
                    .audit("turn.failed", session_id, "agent", json!({ "error": "turn cancelled" }))
                    .await;
            }
            Err(SinkClosed) => {
                info!(session_id, "Event receiver dropped, abandoning turn");
                self.dispatcher
                    .audit("turn.failed", session_id, "agent", json!({ "error": "receiver dropped" }))
                    .await;
            }
        }
    }

    /// Workspace blocks for this iteration. Memory failures only cost the block.
    async fn workspace_files(&self, session: &Session, workspace: &SessionWorkspace) -> Vec<WorkspaceFile> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        match memory
            .build_context(&session.agent_id, &workspace.memory_hashes())
            .await
        {
            Ok(ctx) => {
                if ctx.changed {
                    debug!(session_id = %session.id, sources = ctx.hashes.len(), "Memory changed");
                }
                workspace.set_memory_hashes(ctx.hashes);
                if ctx.text.is_empty() {
                    Vec::new()
                } else {
                    vec![WorkspaceFile::new(MEMORY_BLOCK, ctx.text)]
                }
            }
            Err(e) => {
                warn!(session_id = %session.id, "Memory context unavailable: {e}");
                Vec::new()
            }
        }
    }

    async fn run_loop(
        &self,
        ctx: &TurnContext,
        session: &Session,
        sink: &EventSink,
    ) -> Result<TurnOutcome, SinkClosed> {
        let session_id = session.id.as_str();
        let workspace = self.workspaces.get_or_create(session_id);
        let tools = self.dispatcher.registry().definitions();
        let system_prompt = self.prompt.build(&tools);
        let dispatch_ctx = DispatchContext {
            session_id,
            cancel: &ctx.cancel,
            scope: &ctx.scope,
            events: sink,
        };
        let mut usage = Usage::default();

        for iteration in 1..=self.config.max_iterations {
            if ctx.cancel.is_cancelled() {
                return failed("turn cancelled");
            }
            debug!(session_id, iteration, "Turn iteration");

            let history = match self
                .store
                .recent_messages(session_id, self.config.history_limit)
                .await
            {
                Ok(history) => history,
                Err(e) => return failed(format!("failed to load history: {e}")),
            };
            let files = self.workspace_files(session, &workspace).await;
            let built = workspace.builder.build(&files, &history, &system_prompt);

            let request = ChatRequest {
                model: self.config.model.clone(),
                system_prompt: built.prompt,
                messages: sanitize_messages(&built.messages),
                tools: tools.clone(),
                max_tokens: self.config.max_output_tokens,
                stream: true,
            };

            let chat = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return failed("turn cancelled"),
                result = self.provider.chat(request) => result,
            };
            let mut stream = match chat {
                Ok(stream) => stream,
                Err(e) => return failed(format!("provider {} failed: {e}", self.provider.name())),
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            loop {
                let event = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return failed("turn cancelled"),
                    event = stream.next() => event,
                };
                match event {
                    None => break,
                    Some(ProviderEvent::Token(token)) => {
                        text.push_str(&token);
                        sink.emit(TurnEvent::Token { text: token }).await?;
                    }
                    Some(ProviderEvent::ToolCall(call)) => {
                        sink.emit(TurnEvent::ToolCall { call: call.clone() }).await?;
                        calls.push(call);
                    }
                    Some(ProviderEvent::Usage(u)) => usage.add(u),
                    Some(ProviderEvent::Error(message)) => {
                        return failed(format!("provider error: {message}"));
                    }
                }
            }

            if calls.is_empty() {
                let reply = Message::assistant_text(session_id, text.clone())
                    .with_token_count(self.tokens(&text));
                if let Err(e) = self.store.append_message(&reply).await {
                    warn!(session_id, "Failed to persist assistant reply: {e}");
                }
                self.touch(session_id).await;
                return Ok(TurnOutcome::Done {
                    message: text,
                    usage,
                });
            }

            let tokens = self.tokens(&text);
            let assistant = match Message::assistant_tool_calls(session_id, text, calls.clone()) {
                Ok(msg) => msg.with_token_count(tokens),
                Err(e) => return failed(format!("failed to encode tool calls: {e}")),
            };
            if let Err(e) = self.store.append_message(&assistant).await {
                return failed(format!("failed to persist tool calls: {e}"));
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                results.push(self.dispatcher.dispatch(&dispatch_ctx, call).await?);
            }

            let results_msg = match Message::tool_results(session_id, &results) {
                Ok(msg) => msg,
                Err(e) => return failed(format!("failed to encode tool results: {e}")),
            };
            let tokens = self.tokens(&results_msg.content);
            let results_msg = results_msg.with_token_count(tokens);
            if let Err(e) = self.store.append_message(&results_msg).await {
                return failed(format!("failed to persist tool results: {e}"));
            }
        }

        warn!(session_id, max = self.config.max_iterations, "Tool iteration cap reached");
        self.touch(session_id).await;
        Ok(TurnOutcome::Done {
            message: format!("[stopped after {} tool iterations]", self.config.max_iterations),
            usage,
        })
    }
}
