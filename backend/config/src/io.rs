//! Config file location and loading.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info};

use crate::env::resolve_env_vars;
use crate::schema::GatehouseConfig;

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the config directory.
/// Priority: `GATEHOUSE_CONFIG_DIR` env > `~/.gatehouse/`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("GATEHOUSE_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".gatehouse"),
        None => PathBuf::from(".gatehouse"),
    }
}

pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Parse YAML text, expanding `${VAR}` references in string values.
pub fn parse_config(raw: &str) -> Result<GatehouseConfig> {
    let value: Value = serde_yaml::from_str(raw).context("Failed to parse config YAML")?;
    // An empty document parses as null.
    let value = match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;
    serde_json::from_value(value).context("Config does not match the expected schema")
}

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub async fn load_config(path: &Path) -> Result<GatehouseConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(GatehouseConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&raw).with_context(|| format!("Invalid config at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&config_file_path(dir.path())).await.unwrap();
        assert_eq!(cfg, GatehouseConfig::default());
    }

    #[tokio::test]
    async fn loads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        fs::write(&path, "approvals:\n  mode: deny\ncontext:\n  token_budget: 32000\n")
            .await
            .unwrap();
        let cfg = load_config(&path).await.unwrap();
        assert_eq!(cfg.approvals.mode, "deny");
        assert_eq!(cfg.context.token_budget, 32_000);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(parse_config("").unwrap(), GatehouseConfig::default());
    }

    #[test]
    fn wrong_types_are_rejected() {
        let err = parse_config("turn:\n  max_iterations: lots\n").unwrap_err();
        assert!(format!("{err:#}").contains("schema"));
    }
}
