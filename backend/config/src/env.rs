//! Environment variable substitution and overrides.
//!
//! `${VAR_NAME}` in string values is resolved at load time. Only uppercase
//! `[A-Z_][A-Z0-9_]*` names are matched, and `$${VAR}` escapes to a literal
//! `${VAR}`. `GATEHOUSE_*` variables are applied on top of the parsed file.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::warn;

use crate::schema::{GatehouseConfig, ProviderKind};

/// `$${NAME}` (escaped) or `${NAME}`.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$(\$?)\{([A-Z_][A-Z0-9_]*)\}").unwrap());

#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references using the process environment.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    resolve_env_vars_with(value, &std::env::vars().collect())
}

/// Substitute env vars from a provided map.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    Ok(substitute_value(value, env, "")?)
}

fn substitute_value(
    value: &Value,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<Value, MissingEnvVarError> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    s: &str,
    env: &HashMap<String, String>,
    path: &str,
) -> Result<String, MissingEnvVarError> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    match missing {
        Some(err) => Err(err),
        None => Ok(substituted.into_owned()),
    }
}

/// Apply `GATEHOUSE_*` overrides from the process environment.
pub fn apply_env_overrides(config: GatehouseConfig) -> GatehouseConfig {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply overrides from a provided map. Unparseable values are ignored with
/// a warning.
pub fn apply_env_overrides_with(
    mut config: GatehouseConfig,
    env: &HashMap<String, String>,
) -> GatehouseConfig {
    let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    if let Some(model) = get("GATEHOUSE_MODEL") {
        config.agent.model = model.to_string();
    }
    if let Some(kind) = get("GATEHOUSE_PROVIDER") {
        match ProviderKind::parse(kind) {
            Some(kind) => config.provider.kind = kind,
            None => warn!(value = kind, "Ignoring unknown GATEHOUSE_PROVIDER"),
        }
    }
    if let Some(key) = get("GATEHOUSE_API_KEY") {
        config.provider.api_key = Some(key.to_string());
    }
    if let Some(mode) = get("GATEHOUSE_APPROVAL_MODE") {
        config.approvals.mode = mode.to_ascii_lowercase();
    }
    if let Some(iterations) = get("GATEHOUSE_MAX_ITERATIONS") {
        match iterations.parse() {
            Ok(n) => config.turn.max_iterations = n,
            Err(_) => warn!(value = iterations, "Ignoring non-numeric GATEHOUSE_MAX_ITERATIONS"),
        }
    }
    if let Some(workdir) = get("GATEHOUSE_WORKDIR") {
        config.sandbox.workdir = Some(PathBuf::from(workdir));
    }
    if let Some(db) = get("GATEHOUSE_DB_PATH") {
        config.storage.db_path = Some(PathBuf::from(db));
    }
    if let Some(level) = get("GATEHOUSE_LOG_LEVEL") {
        config.logging.level = level.to_string();
    }

    // Conventional key variables fill in when nothing else set a key.
    if config.provider.api_key.is_none() {
        let fallback = match config.provider.kind {
            ProviderKind::OpenRouter => get("OPENROUTER_API_KEY"),
            ProviderKind::OpenAi => get("OPENAI_API_KEY"),
            ProviderKind::Mock => None,
        };
        config.provider.api_key = fallback.map(str::to_string);
    }

    config
}
