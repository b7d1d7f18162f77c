//! Wires configuration into a ready-to-use `TurnEngine`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use gatehouse_agent::{CompactionConfig, ContextLimits, EngineConfig, ToolDispatcher, TurnEngine};
use gatehouse_config::{GatehouseConfig, ProviderConfig, ProviderKind};
use gatehouse_core::{Provider, ToolPolicy};
use gatehouse_memory::FileMemoryStore;
use gatehouse_providers::{OpenAiCompatProvider, ProviderRegistry, ScriptedProvider};
use gatehouse_sandbox::{ApprovalMode, ApprovalRelay, Approver, CommandGuard, LocalSandbox};
use gatehouse_security::AuditLog;
use gatehouse_store::SqliteStore;
use gatehouse_tools::default_registry;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const MOCK_REPLY: &str = "This is the mock provider. Set provider.kind in config.yaml to talk to a real model.";

/// Everything a command needs. Dropping it stops the approval socket.
pub struct Runtime {
    pub engine: TurnEngine,
    pub store: Arc<SqliteStore>,
    #[cfg(unix)]
    _socket: Option<gatehouse_sandbox::approval_socket::ApprovalSocketServer>,
}

pub fn approval_mode(config: &GatehouseConfig) -> Result<ApprovalMode> {
    config
        .approvals
        .mode
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
}

pub fn engine_config(config: &GatehouseConfig) -> EngineConfig {
    EngineConfig {
        agent_id: config.agent.id.clone(),
        model: config.agent.model.clone(),
        instructions: config.agent.system_prompt.clone(),
        max_output_tokens: config.agent.max_output_tokens,
        limits: ContextLimits {
            token_budget: config.context.token_budget,
            output_reserve: config.context.output_reserve,
        },
        history_limit: config.context.history_limit,
        max_iterations: config.turn.max_iterations,
        event_buffer: config.turn.event_buffer,
        compact_before_turn: config.turn.compact_before_turn,
        compaction: CompactionConfig {
            threshold: config.compaction.threshold,
            keep_recent: config.compaction.keep_recent,
            max_summary_tokens: config.compaction.max_summary_tokens,
            model: config.compaction.model.clone().unwrap_or_default(),
        },
        tool_policy: ToolPolicy {
            workdir: config.sandbox.workdir.clone(),
            timeout_secs: config.sandbox.timeout_secs,
            max_output_bytes: config.sandbox.max_output_bytes,
        },
        ..EngineConfig::default()
    }
}

/// Registry holding the configured provider plus the mock one.
pub fn build_providers(config: &ProviderConfig) -> Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ScriptedProvider::new(ProviderKind::Mock.as_str()).with_text(MOCK_REPLY)));

    let default_url = match config.kind {
        ProviderKind::Mock => return Ok(registry),
        ProviderKind::OpenRouter => gatehouse_providers::openrouter::OPENROUTER_BASE_URL,
        ProviderKind::OpenAi => OPENAI_BASE_URL,
    };
    let provider = OpenAiCompatProvider::new(config.kind.as_str(), config.api_key.clone())
        .with_base_url(config.base_url.as_deref().unwrap_or(default_url))
        .with_timeout(Duration::from_secs(config.timeout_secs))?;
    registry.register(Arc::new(provider));
    Ok(registry)
}

pub fn select_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    let registry = build_providers(config)?;
    registry
        .get(config.kind.as_str())
        .with_context(|| format!("provider '{}' is not registered", config.kind))
}

pub async fn build(config: &GatehouseConfig, config_dir: &Path) -> Result<Runtime> {
    let db_path = config.storage.db_path(config_dir);
    let audit_path = config.storage.audit_db_path(config_dir);
    for path in [&db_path, &audit_path] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let store = Arc::new(SqliteStore::open(&db_path)?);
    let audit = Arc::new(AuditLog::open(&audit_path.to_string_lossy())?);
    let memory = Arc::new(FileMemoryStore::new(config.storage.memory_dir(config_dir)));
    let provider = select_provider(&config.provider)?;

    let relay = ApprovalRelay::new();
    let mut approver = Approver::new(approval_mode(config)?).with_notifier(relay.notifier());
    if let Some(secs) = config.approvals.timeout_secs {
        approver = approver.with_timeout(Duration::from_secs(secs));
    }
    let approver = Arc::new(approver);

    #[cfg(unix)]
    let socket = match &config.approvals.socket_path {
        Some(path) => Some(
            gatehouse_sandbox::approval_socket::ApprovalSocketServer::start(path, &relay, Arc::clone(&approver))
                .await?,
        ),
        None => None,
    };
    #[cfg(not(unix))]
    if config.approvals.socket_path.is_some() {
        warn!("approvals.socket_path is only supported on unix; ignoring");
    }

    let guard = CommandGuard::with_extra_patterns(&config.sandbox.blocked_patterns)?;
    let engine_config = engine_config(config);
    let dispatcher = ToolDispatcher::new(
        Arc::new(default_registry(Arc::clone(&memory), &config.agent.id)),
        approver,
        Arc::new(LocalSandbox::new(guard)),
        engine_config.tool_policy.clone(),
        &config.agent.id,
    )
    .with_audit(audit);

    if config.provider.kind == ProviderKind::Mock {
        warn!("Using the mock provider; replies are canned");
    }
    info!(
        provider = %config.provider.kind,
        model = %config.agent.model,
        db = %db_path.display(),
        "Gatehouse runtime ready"
    );

    let engine = TurnEngine::new(engine_config, store.clone(), provider, dispatcher).with_memory(memory);
    Ok(Runtime {
        engine,
        store,
        #[cfg(unix)]
        _socket: socket,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_core::TurnEvent;
    use gatehouse_agent::TurnContext;

    fn mock_config() -> GatehouseConfig {
        let mut config = GatehouseConfig::default();
        config.provider.kind = ProviderKind::Mock;
        config.approvals.mode = "deny".into();
        config.turn.compact_before_turn = false;
        config
    }

    #[test]
    fn engine_config_maps_sections() {
        let mut config = mock_config();
        config.compaction.threshold = 20;
        config.context.token_budget = 8_000;
        let engine = engine_config(&config);
        assert_eq!(engine.compaction.threshold, 20);
        assert_eq!(engine.limits.token_budget, 8_000);
        assert_eq!(engine.agent_id, "main");
        assert!(engine.compaction.model.is_empty());
    }

    #[test]
    fn approval_mode_parses() {
        let mut config = mock_config();
        assert_eq!(approval_mode(&config).unwrap(), ApprovalMode::Deny);
        config.approvals.mode = "maybe".into();
        assert!(approval_mode(&config).is_err());
    }

    #[test]
    fn provider_registry_includes_configured_kind() {
        let mut provider = ProviderConfig {
            kind: ProviderKind::OpenRouter,
            api_key: Some("sk-or-test".into()),
            ..ProviderConfig::default()
        };
        assert_eq!(build_providers(&provider).unwrap().list(), vec!["mock", "openrouter"]);
        provider.kind = ProviderKind::Mock;
        assert_eq!(select_provider(&provider).unwrap().name(), "mock");
    }

    #[tokio::test]
    async fn builds_runtime_and_runs_turn() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = build(&mock_config(), dir.path()).await.unwrap();
        assert!(dir.path().join("gatehouse.db").exists());

        let mut rx = runtime
            .engine
            .run_turn(TurnContext::default(), "cli-test", "hello")
            .await
            .unwrap();
        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert!(matches!(last, Some(TurnEvent::Done { message, .. }) if message.starts_with("This is the mock provider")));
    }
}
