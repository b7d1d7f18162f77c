//! `gatehouse-config`: runtime configuration.
//!
//! Provides:
//! - Typed config schema with per-field defaults
//! - YAML loading from the config directory
//! - `${ENV_VAR}` substitution and `GATEHOUSE_*` overrides
//! - Validation with errors and warnings

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use env::{
    apply_env_overrides, apply_env_overrides_with, resolve_env_vars, resolve_env_vars_with,
    MissingEnvVarError,
};
pub use io::{config_dir, config_file_path, load_config, parse_config};
pub use schema::{
    AgentConfig, ApprovalsConfig, CompactionConfig, ContextConfig, GatehouseConfig, LoggingConfig,
    ProviderConfig, ProviderKind, SandboxConfig, StorageConfig, TurnConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use std::path::Path;

use anyhow::{bail, Result};

/// Load, apply env overrides and validate a config file.
///
/// Warnings are logged; any validation error fails the load.
pub async fn load_and_prepare(path: &Path) -> Result<GatehouseConfig> {
    let config = apply_env_overrides(load_config(path).await?);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if !report.is_valid() {
        let messages: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        bail!("invalid config:\n  {}", messages.join("\n  "));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_config_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());
        tokio::fs::write(&path, "provider:\n  kind: mock\nturn:\n  event_buffer: 0\n")
            .await
            .unwrap();
        let err = load_and_prepare(&path).await.unwrap_err().to_string();
        assert!(err.contains("turn.event_buffer"));
    }
}
