//! Default values shared by the config schema.

pub const DEFAULT_AGENT_ID: &str = "main";

pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Max tokens for model responses.
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4_096;

/// Context window size (tokens).
pub const DEFAULT_TOKEN_BUDGET: usize = 128_000;

pub const DEFAULT_OUTPUT_RESERVE: usize = 4_096;

/// Messages loaded per iteration before budgeting.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

pub const DEFAULT_EVENT_BUFFER: usize = 64;

pub const DEFAULT_COMPACTION_THRESHOLD: usize = 40;

pub const DEFAULT_COMPACTION_KEEP_RECENT: usize = 10;

pub const DEFAULT_MAX_SUMMARY_TOKENS: u32 = 1_024;

pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_SANDBOX_TIMEOUT_SECS: u64 = 120;

pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 200_000;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// File names under the config directory used when storage paths are unset.
pub const DEFAULT_DB_FILE: &str = "gatehouse.db";
pub const DEFAULT_AUDIT_DB_FILE: &str = "audit.db";
pub const DEFAULT_MEMORY_DIR: &str = "memory";
