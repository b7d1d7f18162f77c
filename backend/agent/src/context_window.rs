//! Token-budgeted context window.
//!
//! Assembly runs in three tiers against a fixed budget:
//! 1. the system prompt, always included and paid for first;
//! 2. workspace blocks, resent only when their content hash changed or
//!    while less than half the budget is used;
//! 3. history, picked greedily from the newest message backwards into
//!    whatever is left after the output reserve.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tracing::debug;

use gatehouse_core::{Message, WorkspaceFile};

/// Approximate token counting. Swappable so budgeting can move to a real
/// tokenizer without touching the assembly logic.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// `ceil(chars / 4)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count().div_ceil(4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub token_budget: usize,
    pub output_reserve: usize,
}

impl Default for ContextLimits {
    fn default() -> Self {
        Self {
            token_budget: 128_000,
            output_reserve: 4_096,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuiltContext {
    pub prompt: String,
    /// Selected history, oldest first.
    pub messages: Vec<Message>,
    /// Estimated cost of prompt plus selected history.
    pub used_tokens: usize,
    /// Workspace blocks that made it into `prompt`.
    pub included_files: Vec<String>,
}

#[derive(Debug, Clone)]
struct SentBlock {
    hash: String,
    tokens: usize,
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn render_block(file: &WorkspaceFile) -> String {
    format!("\n\n## {}\n{}", file.name, file.content)
}

pub struct ContextBuilder {
    limits: ContextLimits,
    estimator: Arc<dyn TokenEstimator>,
    sent: RwLock<HashMap<String, SentBlock>>,
}

impl ContextBuilder {
    pub fn new(limits: ContextLimits) -> Self {
        Self::with_estimator(limits, Arc::new(CharEstimator))
    }

    pub fn with_estimator(limits: ContextLimits, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            limits,
            estimator,
            sent: RwLock::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> ContextLimits {
        self.limits
    }

    pub fn estimate(&self, text: &str) -> usize {
        self.estimator.estimate(text)
    }

    /// Hash and token cost of the last version of `name` that was sent.
    pub fn last_sent(&self, name: &str) -> Option<(String, usize)> {
        let sent = self.sent.read().unwrap_or_else(|p| p.into_inner());
        sent.get(name).map(|b| (b.hash.clone(), b.tokens))
    }

    pub fn build(
        &self,
        files: &[WorkspaceFile],
        history: &[Message],
        system_prompt: &str,
    ) -> BuiltContext {
        let budget = self.limits.token_budget;
        let ceiling = budget.saturating_sub(self.limits.output_reserve);

        // Tier 1
        let mut prompt = system_prompt.to_string();
        let mut used = self.estimator.estimate(system_prompt);

        // Tier 2
        let mut included_files = Vec::new();
        for file in files {
            let hash = content_hash(&file.content);
            let unchanged = self
                .last_sent(&file.name)
                .is_some_and(|(last, _)| last == hash);
            if unchanged && used > budget / 2 {
                debug!(block = %file.name, "Workspace block unchanged, not resending");
                continue;
            }

            let block = render_block(file);
            let tokens = self.estimator.estimate(&block);
            if used + tokens > ceiling {
                debug!(block = %file.name, tokens, used, "Workspace block does not fit the budget");
                continue;
            }

            prompt.push_str(&block);
            used += tokens;
            included_files.push(file.name.clone());
            self.sent
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .insert(file.name.clone(), SentBlock { hash, tokens });
        }

        // Tier 3
        let remaining = ceiling.saturating_sub(used);
        let mut selected = Vec::new();
        let mut history_tokens = 0;
        for msg in history.iter().rev() {
            let cost = self.estimator.estimate(&msg.content);
            if history_tokens + cost > remaining {
                break;
            }
            history_tokens += cost;
            selected.push(msg.clone());
        }
        selected.reverse();

        debug!(
            used,
            history_tokens,
            selected = selected.len(),
            of = history.len(),
            "Context window built"
        );

        BuiltContext {
            prompt,
            messages: selected,
            used_tokens: used + history_tokens,
            included_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(token_budget: usize, output_reserve: usize) -> ContextLimits {
        ContextLimits {
            token_budget,
            output_reserve,
        }
    }

    /// `n` user messages of `chars` characters each.
    fn history(n: usize, chars: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                let body = format!("{i:0>width$}", width = chars);
                Message::user_text("s1", body)
            })
            .collect()
    }

    #[test]
    fn test_char_estimator_rounds_up() {
        let est = CharEstimator;
        assert_eq!(est.estimate(""), 0);
        assert_eq!(est.estimate("abc"), 1);
        assert_eq!(est.estimate("abcd"), 1);
        assert_eq!(est.estimate("abcde"), 2);
        assert_eq!(est.estimate("ééééé"), 2);
    }

    #[test]
    fn test_history_never_exceeds_budget() {
        for budget in [0usize, 10, 50, 99, 100, 333, 1_000, 10_000] {
            for reserve in [0usize, 8, 64] {
                let builder = ContextBuilder::new(limits(budget, reserve));
                let built = builder.build(&[], &history(40, 37), "sys prompt");
                let history_cost: usize = built
                    .messages
                    .iter()
                    .map(|m| CharEstimator.estimate(&m.content))
                    .sum();
                let system_cost = builder.estimate("sys prompt");
                assert!(
                    history_cost <= budget.saturating_sub(reserve).saturating_sub(system_cost),
                    "budget {budget} reserve {reserve}"
                );
                if system_cost <= budget.saturating_sub(reserve) {
                    assert!(built.used_tokens <= budget.saturating_sub(reserve));
                }
            }
        }
    }

    #[test]
    fn test_history_keeps_newest_in_order() {
        // 10 tokens per message, 35 tokens of room: the newest three fit.
        let builder = ContextBuilder::new(limits(35, 0));
        let msgs = history(6, 40);
        let built = builder.build(&[], &msgs, "");
        let ids: Vec<&str> = built.messages.iter().map(|m| m.id.as_str()).collect();
        let expected: Vec<&str> = msgs[3..].iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, expected);
        assert_eq!(built.used_tokens, 30);
    }

    #[test]
    fn test_greedy_stops_at_first_overflow() {
        let builder = ContextBuilder::new(limits(25, 0));
        let mut msgs = history(3, 8); // 2 tokens each
        msgs[1].content = "x".repeat(100); // 25 tokens, never fits alongside the newest
        let built = builder.build(&[], &msgs, "");
        assert_eq!(built.messages.len(), 1);
        assert_eq!(built.messages[0].id, msgs[2].id);
    }

    #[test]
    fn test_no_room_yields_empty_window() {
        let builder = ContextBuilder::new(limits(100, 200));
        let built = builder.build(&[], &history(5, 4), "system");
        assert!(built.messages.is_empty());
        assert_eq!(built.prompt, "system");
    }

    #[test]
    fn test_workspace_block_included_then_skipped_when_unchanged() {
        // System prompt alone consumes more than half of the budget.
        let builder = ContextBuilder::new(limits(1_000, 10));
        let system = "s".repeat(2_400); // 600 tokens
        let files = vec![WorkspaceFile::new("memory", "likes tea")];

        let first = builder.build(&files, &[], &system);
        assert!(first.prompt.contains("## memory\nlikes tea"));
        assert_eq!(first.included_files, vec!["memory"]);
        assert!(builder.last_sent("memory").is_some());

        let second = builder.build(&files, &[], &system);
        let third = builder.build(&files, &[], &system);
        assert!(!second.prompt.contains("likes tea"));
        assert_eq!(second.prompt, third.prompt);

        let changed = vec![WorkspaceFile::new("memory", "likes coffee")];
        let fourth = builder.build(&changed, &[], &system);
        assert!(fourth.prompt.contains("likes coffee"));
    }

    #[test]
    fn test_unchanged_block_resent_under_half_budget() {
        let builder = ContextBuilder::new(limits(1_000, 10));
        let files = vec![WorkspaceFile::new("memory", "likes tea")];
        let first = builder.build(&files, &[], "short");
        let second = builder.build(&files, &[], "short");
        assert_eq!(first.prompt, second.prompt);
        assert!(second.prompt.contains("likes tea"));
    }

    #[test]
    fn test_oversized_block_skipped_and_not_cached() {
        let builder = ContextBuilder::new(limits(100, 10));
        let files = vec![WorkspaceFile::new("memory", "m".repeat(1_000))];
        let built = builder.build(&files, &[], "sys");
        assert!(built.included_files.is_empty());
        assert!(builder.last_sent("memory").is_none());
        assert!(built.used_tokens <= 90);
    }

    #[test]
    fn test_custom_estimator() {
        struct WordEstimator;
        impl TokenEstimator for WordEstimator {
            fn estimate(&self, text: &str) -> usize {
                text.split_whitespace().count()
            }
        }

        let builder = ContextBuilder::with_estimator(limits(4, 0), Arc::new(WordEstimator));
        let msgs = vec![
            Message::user_text("s1", "one two three"),
            Message::user_text("s1", "four five"),
            Message::user_text("s1", "six"),
        ];
        let built = builder.build(&[], &msgs, "");
        assert_eq!(built.messages.len(), 2);
        assert_eq!(built.used_tokens, 3);
    }
}
