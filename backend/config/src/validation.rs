//! Config validation with field paths in every message.

use thiserror::Error;

use crate::schema::GatehouseConfig;

#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// Errors and warnings found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

pub fn validate(config: &GatehouseConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_agent(config, &mut report);
    validate_provider(config, &mut report);
    validate_context(config, &mut report);
    validate_turn(config, &mut report);
    validate_compaction(config, &mut report);
    validate_approvals(config, &mut report);
    report
}

fn validate_agent(config: &GatehouseConfig, report: &mut ValidationReport) {
    let id = config.agent.id.trim();
    if id.is_empty() {
        report.error("agent.id", "Agent id cannot be empty");
    } else if id.contains(['/', '\\']) || id == "." || id == ".." {
        report.error("agent.id", format!("Agent id '{id}' cannot be used as a directory name"));
    }
    if config.agent.model.trim().is_empty() {
        report.error("agent.model", "Model cannot be empty");
    }
    if config.agent.max_output_tokens == 0 {
        report.error("agent.max_output_tokens", "max_output_tokens must be > 0");
    }
}

fn validate_provider(config: &GatehouseConfig, report: &mut ValidationReport) {
    let provider = &config.provider;
    let has_key = provider.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
    if provider.kind.needs_api_key() && !has_key {
        report.warn(
            "provider.api_key",
            format!("No API key for provider '{}'; model calls will fail", provider.kind),
        );
    }
    if let Some(url) = &provider.base_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            report.error("provider.base_url", "base_url must start with http:// or https://");
        }
    }
}

fn validate_context(config: &GatehouseConfig, report: &mut ValidationReport) {
    let ctx = &config.context;
    if ctx.output_reserve >= ctx.token_budget {
        report.error(
            "context.output_reserve",
            format!(
                "output_reserve ({}) must be smaller than token_budget ({})",
                ctx.output_reserve, ctx.token_budget
            ),
        );
    }
    if ctx.history_limit == 0 {
        report.warn("context.history_limit", "history_limit is 0; the model will only see the system prompt");
    }
}

fn validate_turn(config: &GatehouseConfig, report: &mut ValidationReport) {
    if config.turn.max_iterations == 0 {
        report.error("turn.max_iterations", "max_iterations must be >= 1");
    }
    if config.turn.event_buffer == 0 {
        report.error("turn.event_buffer", "event_buffer must be >= 1");
    }
}

fn validate_compaction(config: &GatehouseConfig, report: &mut ValidationReport) {
    let c = &config.compaction;
    if c.keep_recent >= c.threshold {
        report.error(
            "compaction.keep_recent",
            format!("keep_recent ({}) must be smaller than threshold ({})", c.keep_recent, c.threshold),
        );
    }
    if c.max_summary_tokens == 0 {
        report.error("compaction.max_summary_tokens", "max_summary_tokens must be > 0");
    }
}

fn validate_approvals(config: &GatehouseConfig, report: &mut ValidationReport) {
    let mode = config.approvals.mode.as_str();
    if !matches!(mode, "auto" | "deny" | "ask") {
        report.error(
            "approvals.mode",
            format!("Unknown approval mode '{mode}'. Use 'auto', 'deny', or 'ask'"),
        );
    }
    if mode == "auto" {
        report.warn("approvals.mode", "Tool calls run without review");
    }
    if config.approvals.timeout_secs == Some(0) {
        report.error("approvals.timeout_secs", "timeout_secs must be > 0 when set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ProviderKind;

    fn mock_config() -> GatehouseConfig {
        let mut cfg = GatehouseConfig::default();
        cfg.provider.kind = ProviderKind::Mock;
        cfg
    }

    #[test]
    fn default_mock_config_is_clean() {
        let report = validate(&mock_config());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn missing_api_key_is_warning() {
        let report = validate(&GatehouseConfig::default());
        assert!(report.is_valid());
        assert_eq!(report.warnings[0].path, "provider.api_key");
    }

    #[test]
    fn reserve_and_keep_recent_are_checked() {
        let mut cfg = mock_config();
        cfg.context.output_reserve = cfg.context.token_budget;
        cfg.compaction.keep_recent = 50;
        let report = validate(&cfg);
        let paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["context.output_reserve", "compaction.keep_recent"]);
    }

    #[test]
    fn zero_iterations_and_buffer_are_errors() {
        let mut cfg = mock_config();
        cfg.turn.max_iterations = 0;
        cfg.turn.event_buffer = 0;
        cfg.approvals.mode = "sometimes".into();
        let report = validate(&cfg);
        assert_eq!(report.errors.len(), 3);
    }
}
