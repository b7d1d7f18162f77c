//! Structured Logger
//!
//! Wraps `tracing` to provide console output, optional file rotation
//! (NDJSON), and environment-based level control.

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "gatehouse.log";

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for the daily rolling NDJSON file. `None` disables it.
    pub dir: Option<PathBuf>,
    /// Emit JSON on the console instead of human-readable lines.
    pub json: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

/// Build the filter: `RUST_LOG` wins over the configured level.
fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize the global structured logger.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logger(options: &LogOptions) {
    // Rolling file appender: writes NDJSON to `<dir>/gatehouse.log.YYYY-MM-DD`
    let file_layer = options.dir.as_ref().map(|dir| {
        let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
        fmt::layer().json().with_writer(appender).with_ansi(false)
    });

    // Console goes to stderr so it never interleaves with streamed chat output.
    let console_json = options
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let console_text = (!options.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_ansi(true)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter(&options.level))
        .with(console_json)
        .with(console_text)
        .with(file_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bad_level_falls_back() {
        // An unparseable directive must not panic.
        let _ = env_filter("not a [valid directive");
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let options = LogOptions {
            dir: Some(dir.path().to_path_buf()),
            ..LogOptions::default()
        };
        init_logger(&options);
        init_logger(&options);
        tracing::info!("logger smoke test");
    }
}
