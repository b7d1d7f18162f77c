pub mod workspace;

pub use workspace::{FileMemoryStore, MEMORY_NOTES_FILE};
