//! Telemetry and structured logging for Gatehouse.
//!
//! Handles log redaction, console and rolling NDJSON output, and the
//! per-turn event mirror.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{EventLogEntry, EventLogger, TURN_EVENTS_TARGET};
pub use logger::{init_logger, LogOptions};
pub use redact::{redact_json, redact_sensitive_data};
