//! Gatehouse runtime configuration schema.
//!
//! Every section is optional in the YAML file; missing keys take the
//! values from `defaults`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults::*;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatehouseConfig {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub context: ContextConfig,
    pub turn: TurnConfig,
    pub compaction: CompactionConfig,
    pub approvals: ApprovalsConfig,
    pub sandbox: SandboxConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub id: String,
    /// Operator instructions appended to the built-in identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub model: String,
    pub max_output_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_AGENT_ID.to_string(),
            system_prompt: None,
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenRouter,
    OpenAi,
    /// Scripted provider that echoes the user; for local testing.
    Mock,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openrouter" => Some(ProviderKind::OpenRouter),
            "openai" => Some(ProviderKind::OpenAi),
            "mock" => Some(ProviderKind::Mock),
            _ => None,
        }
    }

    pub fn needs_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Mock)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the kind's default endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            api_key: None,
            base_url: None,
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}

// ---------------------------------------------------------------------------
// Context, turn and compaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub token_budget: usize,
    pub output_reserve: usize,
    pub history_limit: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            output_reserve: DEFAULT_OUTPUT_RESERVE,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    pub max_iterations: usize,
    pub event_buffer: usize,
    pub compact_before_turn: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            compact_before_turn: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub threshold: usize,
    pub keep_recent: usize,
    pub max_summary_tokens: u32,
    /// Model used for summaries; the agent model when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_COMPACTION_THRESHOLD,
            keep_recent: DEFAULT_COMPACTION_KEEP_RECENT,
            max_summary_tokens: DEFAULT_MAX_SUMMARY_TOKENS,
            model: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Approvals and sandbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalsConfig {
    /// `auto`, `deny` or `ask`.
    pub mode: String,
    /// Give up on a pending `ask` after this many seconds. Unset waits
    /// until the turn is cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Unix socket for out-of-process approvers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<PathBuf>,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            mode: "ask".to_string(),
            timeout_secs: None,
            socket_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
    /// Extra regexes for the command guard.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocked_patterns: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workdir: None,
            timeout_secs: DEFAULT_SANDBOX_TIMEOUT_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            blocked_patterns: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage and logging
// ---------------------------------------------------------------------------

/// Unset paths resolve under the config directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_db_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn db_path(&self, config_dir: &Path) -> PathBuf {
        resolve(config_dir, self.db_path.as_deref(), DEFAULT_DB_FILE)
    }

    pub fn memory_dir(&self, config_dir: &Path) -> PathBuf {
        resolve(config_dir, self.memory_dir.as_deref(), DEFAULT_MEMORY_DIR)
    }

    pub fn audit_db_path(&self, config_dir: &Path) -> PathBuf {
        resolve(config_dir, self.audit_db_path.as_deref(), DEFAULT_AUDIT_DB_FILE)
    }
}

fn resolve(config_dir: &Path, configured: Option<&Path>, fallback: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => config_dir.join(path),
        None => config_dir.join(fallback),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for daily rolling NDJSON files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            dir: None,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = "agent:\n  model: anthropic/claude-3.5-haiku\nturn:\n  max_iterations: 4\n";
        let cfg: GatehouseConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.agent.model, "anthropic/claude-3.5-haiku");
        assert_eq!(cfg.agent.id, DEFAULT_AGENT_ID);
        assert_eq!(cfg.turn.max_iterations, 4);
        assert!(cfg.turn.compact_before_turn);
        assert_eq!(cfg.compaction, CompactionConfig::default());
    }

    #[test]
    fn provider_kind_names() {
        let cfg: ProviderConfig = serde_yaml::from_str("kind: openai").unwrap();
        assert_eq!(cfg.kind, ProviderKind::OpenAi);
        assert_eq!(ProviderKind::parse(" Mock "), Some(ProviderKind::Mock));
        assert!(ProviderKind::parse("bedrock").is_none());
        assert!(!ProviderKind::Mock.needs_api_key());
    }

    #[test]
    fn storage_paths_resolve_under_config_dir() {
        let dir = Path::new("/etc/gatehouse");
        let storage = StorageConfig {
            db_path: Some(PathBuf::from("data/chat.db")),
            audit_db_path: Some(PathBuf::from("/var/lib/audit.db")),
            ..Default::default()
        };
        assert_eq!(storage.db_path(dir), PathBuf::from("/etc/gatehouse/data/chat.db"));
        assert_eq!(storage.audit_db_path(dir), PathBuf::from("/var/lib/audit.db"));
        assert_eq!(storage.memory_dir(dir), PathBuf::from("/etc/gatehouse/memory"));
    }
}
