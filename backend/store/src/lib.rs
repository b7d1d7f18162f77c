//! Durable conversation storage.

pub mod sqlite;

pub use sqlite::SqliteStore;
