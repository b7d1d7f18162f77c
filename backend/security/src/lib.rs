pub mod audit;

pub use audit::{AuditEvent, AuditLog};
