//! Per-session workspace state.
//!
//! Each session gets its own `ContextBuilder` (and with it the last-sent
//! hash cache) plus the memory hashes from the previous turn. Entries are
//! evicted after a period of inactivity; an evicted session simply resends
//! its workspace blocks on the next turn.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use moka::sync::Cache;

use crate::context_window::{ContextBuilder, ContextLimits, TokenEstimator};

pub struct SessionWorkspace {
    pub builder: ContextBuilder,
    memory_hashes: RwLock<HashMap<String, String>>,
}

impl SessionWorkspace {
    pub fn memory_hashes(&self) -> HashMap<String, String> {
        self.memory_hashes
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn set_memory_hashes(&self, hashes: HashMap<String, String>) {
        *self.memory_hashes.write().unwrap_or_else(|p| p.into_inner()) = hashes;
    }
}

pub struct WorkspaceCache {
    cache: Cache<String, Arc<SessionWorkspace>>,
    limits: ContextLimits,
    estimator: Arc<dyn TokenEstimator>,
}

impl WorkspaceCache {
    pub fn new(limits: ContextLimits, estimator: Arc<dyn TokenEstimator>, idle: Duration) -> Self {
        Self {
            cache: Cache::builder().time_to_idle(idle).build(),
            limits,
            estimator,
        }
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<SessionWorkspace> {
        self.cache.get_with(session_id.to_string(), || {
            Arc::new(SessionWorkspace {
                builder: ContextBuilder::with_estimator(self.limits, Arc::clone(&self.estimator)),
                memory_hashes: RwLock::new(HashMap::new()),
            })
        })
    }

    pub fn invalidate(&self, session_id: &str) {
        self.cache.invalidate(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_window::CharEstimator;
    use gatehouse_core::WorkspaceFile;

    fn cache() -> WorkspaceCache {
        WorkspaceCache::new(
            ContextLimits {
                token_budget: 100,
                output_reserve: 0,
            },
            Arc::new(CharEstimator),
            Duration::from_secs(600),
        )
    }

    #[test]
    fn test_same_session_shares_workspace() {
        let cache = cache();
        let a = cache.get_or_create("s1");
        let b = cache.get_or_create("s1");
        let other = cache.get_or_create("s2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn test_invalidate_forgets_sent_blocks() {
        let cache = cache();
        let ws = cache.get_or_create("s1");
        ws.builder.build(&[WorkspaceFile::new("memory", "x")], &[], "");
        assert!(ws.builder.last_sent("memory").is_some());

        cache.invalidate("s1");
        let fresh = cache.get_or_create("s1");
        assert!(fresh.builder.last_sent("memory").is_none());
    }

    #[test]
    fn test_memory_hashes_round_trip() {
        let cache = cache();
        let ws = cache.get_or_create("s1");
        assert!(ws.memory_hashes().is_empty());
        ws.set_memory_hashes(HashMap::from([("MEMORY.md".to_string(), "abc".to_string())]));
        assert_eq!(cache.get_or_create("s1").memory_hashes()["MEMORY.md"], "abc");
    }
}
