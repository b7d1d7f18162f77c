pub mod mock;
pub mod openrouter;
pub mod registry;
pub mod sse;

pub use mock::ScriptedProvider;
pub use openrouter::OpenAiCompatProvider;
pub use registry::ProviderRegistry;
