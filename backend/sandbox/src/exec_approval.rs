//! Static command checks applied before anything reaches a shell.
//!
//! This runs after the human gate: an approved call can still be refused
//! if it matches a known-destructive pattern.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Regex patterns for dangerous command patterns.
static DANGEROUS_PATTERNS: &[&str] = &[
    r"rm\s+(-r|-f|-rf|-fr)\s+/(\s|$)",
    r"\bsudo\s",
    r"chmod\s+[0-7]*7\b", // world-writable
    r"curl\s.*\|\s*(?:bash|sh|zsh)",
    r"wget\s.*\|\s*(?:bash|sh|zsh)",
    r"\bdd\b.*of=/dev/", // disk overwrite
    r"mkfs\.",           // format disk
    r":\(\)\s*\{.*\}",   // fork bomb
    r"base64.*(-d|--decode).*\|\s*(?:bash|sh|zsh)",
];

static DEFAULT_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    DANGEROUS_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GuardVerdict {
    Allowed,
    Blocked { reason: String },
}

impl GuardVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardVerdict::Allowed)
    }
}

#[derive(Debug, Clone)]
pub struct CommandGuard {
    patterns: Vec<Regex>,
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_REGEXES.clone(),
        }
    }
}

impl CommandGuard {
    /// The built-in patterns plus any extra deny patterns from config.
    pub fn with_extra_patterns(extra: &[String]) -> anyhow::Result<Self> {
        let mut guard = Self::default();
        for pattern in extra {
            let re = Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("bad deny pattern {pattern}: {e}"))?;
            guard.patterns.push(re);
        }
        Ok(guard)
    }

    /// A guard that allows everything.
    pub fn permissive() -> Self {
        Self { patterns: Vec::new() }
    }

    pub fn check(&self, command: &str) -> GuardVerdict {
        if command.trim().is_empty() {
            return GuardVerdict::Blocked {
                reason: "empty command".to_string(),
            };
        }
        for re in &self.patterns {
            if re.is_match(command) {
                warn!(pattern = %re.as_str(), "Dangerous command pattern matched");
                return GuardVerdict::Blocked {
                    reason: format!("dangerous pattern detected: {}", re.as_str()),
                };
            }
        }
        GuardVerdict::Allowed
    }
}
