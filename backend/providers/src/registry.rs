use std::collections::HashMap;
use std::sync::Arc;

use gatehouse_core::Provider;

/// Registry of LLM providers, looked up by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// Get providers matching the given names (in order).
    /// Unknown names are silently skipped.
    pub fn get_providers(&self, names: &[String]) -> Vec<Arc<dyn Provider>> {
        names
            .iter()
            .filter_map(|name| self.providers.get(name).cloned())
            .collect()
    }

    /// All registered provider names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScriptedProvider;

    #[test]
    fn test_registry_get_providers() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("mock2")));
        registry.register(Arc::new(ScriptedProvider::new("mock1")));

        let providers =
            registry.get_providers(&["mock1".into(), "mock2".into(), "missing".into()]);
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].name(), "mock1");
        assert_eq!(registry.list(), vec!["mock1", "mock2"]);
        assert!(registry.get("missing").is_none());
    }
}
