//! History compaction.
//!
//! When a session grows past `threshold` messages, everything but the most
//! recent `keep_recent` is summarized by the provider and replaced with one
//! marked summary message. The summary is written before the old range is
//! deleted, so a failure in between leaves duplicated history rather than
//! lost history.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gatehouse_core::{ChatRequest, GateError, Message, Provider, ProviderEvent, Store};

use crate::context_window::{CharEstimator, TokenEstimator};

/// Prefix that marks a synthetic summary message.
pub const COMPACTION_MARKER: &str = "[Conversation summary]";

const SUMMARY_SYSTEM_PROMPT: &str = "You condense conversation transcripts. \
Write a factual summary as a bulleted list. Keep names, decisions, open tasks, \
numbers and anything the user asked to remember. Do not add commentary or \
invent details. Output only the bullets.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    pub threshold: usize,
    pub keep_recent: usize,
    pub max_summary_tokens: u32,
    pub model: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 40,
            keep_recent: 10,
            max_summary_tokens: 1024,
            model: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// Nothing to do; carries the message count that was checked.
    Skipped { message_count: usize },
    Compacted { removed: usize, summary_id: String },
}

/// Flatten messages into `role: text` lines. Structured payloads are
/// replaced by a placeholder naming the role and content type.
fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            if m.is_text() {
                format!("{}: {}", m.role, m.content)
            } else {
                format!("[{} sent {}]", m.role, m.content_type)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Compactor {
    store: Arc<dyn Store>,
    provider: Arc<dyn Provider>,
    config: CompactionConfig,
    estimator: Arc<dyn TokenEstimator>,
}

impl Compactor {
    pub fn new(store: Arc<dyn Store>, provider: Arc<dyn Provider>, config: CompactionConfig) -> Self {
        Self {
            store,
            provider,
            config,
            estimator: Arc::new(CharEstimator),
        }
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact a session if it is over the threshold. Safe to call before
    /// every turn.
    pub async fn compact_session(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
    ) -> Result<CompactionOutcome, GateError> {
        let count = self
            .store
            .message_count(session_id)
            .await
            .map_err(GateError::storage)?;
        if count <= self.config.threshold {
            return Ok(CompactionOutcome::Skipped { message_count: count });
        }

        let messages = self
            .store
            .recent_messages(session_id, count)
            .await
            .map_err(GateError::storage)?;
        let split = messages.len().saturating_sub(self.config.keep_recent);
        if split == 0 {
            return Ok(CompactionOutcome::Skipped { message_count: count });
        }
        let (old, recent) = messages.split_at(split);

        info!(session_id, old = old.len(), kept = recent.len(), "Compacting session history");

        let summary = self.summarize(cancel, session_id, old).await?;

        let created_at = match recent.first() {
            Some(first) => first.created_at - ChronoDuration::milliseconds(1),
            None => old[old.len() - 1].created_at,
        };
        let content = format!("{COMPACTION_MARKER}\n{summary}");
        let tokens = u32::try_from(self.estimator.estimate(&content)).unwrap_or(u32::MAX);
        let summary_msg = Message::user_text(session_id, content)
            .with_created_at(created_at)
            .with_token_count(tokens);

        self.store
            .append_message(&summary_msg)
            .await
            .map_err(GateError::storage)?;

        let ids: Vec<String> = old.iter().map(|m| m.id.clone()).collect();
        let removed = self.store.delete_messages(&ids).await.map_err(|e| {
            warn!(session_id, "Summary written but old history not deleted: {e}");
            GateError::storage(e)
        })?;

        info!(session_id, removed, summary_id = %summary_msg.id, "Session compacted");
        Ok(CompactionOutcome::Compacted {
            removed,
            summary_id: summary_msg.id,
        })
    }

    async fn summarize(
        &self,
        cancel: &CancellationToken,
        session_id: &str,
        old: &[Message],
    ) -> Result<String, GateError> {
        let provider_error = |message: String| GateError::Provider {
            provider: self.provider.name().to_string(),
            message,
        };

        let request = ChatRequest {
            model: self.config.model.clone(),
            system_prompt: SUMMARY_SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user_text(session_id, render_transcript(old))],
            tools: Vec::new(),
            max_tokens: self.config.max_summary_tokens,
            stream: false,
        };

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(provider_error("compaction cancelled".into())),
            result = self.provider.chat(request) => result.map_err(|e| provider_error(e.to_string()))?,
        };

        let mut summary = String::new();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => return Err(provider_error("compaction cancelled".into())),
                event = stream.next() => event,
            };
            match event {
                Some(ProviderEvent::Token(text)) => summary.push_str(&text),
                Some(ProviderEvent::Error(message)) => return Err(provider_error(message)),
                Some(ProviderEvent::ToolCall(call)) => {
                    debug!(tool = %call.name, "Ignoring tool call in summary response");
                }
                Some(ProviderEvent::Usage(_)) => {}
                None => break,
            }
        }

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(provider_error("empty summary".into()));
        }
        Ok(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use gatehouse_core::{Role, Session, SessionOrigin, ToolCall};
    use gatehouse_providers::ScriptedProvider;
    use gatehouse_store::SqliteStore;

    async fn seeded_store(n: usize) -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .create_session(&Session::new("s1", "main", &SessionOrigin::default()))
            .await
            .unwrap();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for i in 0..n {
            let msg = if i % 2 == 0 {
                Message::user_text("s1", format!("question {i}"))
            } else {
                Message::assistant_text("s1", format!("answer {i}"))
            };
            let msg = msg.with_created_at(base + ChronoDuration::seconds(i as i64));
            store.append_message(&msg).await.unwrap();
        }
        store
    }

    fn compactor(store: Arc<SqliteStore>, provider: Arc<ScriptedProvider>) -> Compactor {
        Compactor::new(store, provider, CompactionConfig::default())
    }

    #[tokio::test]
    async fn test_noop_at_threshold() {
        let store = seeded_store(40).await;
        let provider = Arc::new(ScriptedProvider::new("mock").with_text("- summary"));
        let outcome = compactor(store.clone(), provider.clone())
            .compact_session(&CancellationToken::new(), "s1")
            .await
            .unwrap();
        assert_eq!(outcome, CompactionOutcome::Skipped { message_count: 40 });
        assert_eq!(store.message_count("s1").await.unwrap(), 40);
        assert!(provider.requests().is_empty());
    }

    #[tokio::test]
    async fn test_compacts_and_keeps_recent_verbatim() {
        let store = seeded_store(45).await;
        let before = store.recent_messages("s1", 10).await.unwrap();
        let provider = Arc::new(ScriptedProvider::new("mock").with_text("- user asked 45 questions"));

        let outcome = compactor(store.clone(), provider.clone())
            .compact_session(&CancellationToken::new(), "s1")
            .await
            .unwrap();
        assert!(matches!(outcome, CompactionOutcome::Compacted { removed: 35, .. }));

        let after = store.recent_messages("s1", 100).await.unwrap();
        assert_eq!(after.len(), 11);
        assert_eq!(after[0].role, Role::User);
        assert!(after[0].content.starts_with(COMPACTION_MARKER));
        assert!(after[0].created_at < after[1].created_at);
        assert_eq!(&after[1..], &before[..]);
        assert_eq!(after[10].content, "question 44");

        let summaries = after
            .iter()
            .filter(|m| m.content.starts_with(COMPACTION_MARKER))
            .count();
        assert_eq!(summaries, 1);

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].stream);
        assert_eq!(requests[0].max_tokens, 1024);
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].messages[0].content.starts_with("user: question 0\nassistant: answer 1"));
    }

    #[tokio::test]
    async fn test_second_run_is_noop() {
        let store = seeded_store(45).await;
        let provider = Arc::new(ScriptedProvider::new("mock").with_text("- summary"));
        let compactor = compactor(store.clone(), provider);
        let cancel = CancellationToken::new();
        compactor.compact_session(&cancel, "s1").await.unwrap();
        let again = compactor.compact_session(&cancel, "s1").await.unwrap();
        assert_eq!(again, CompactionOutcome::Skipped { message_count: 11 });
    }

    #[tokio::test]
    async fn test_provider_failure_deletes_nothing() {
        let store = seeded_store(45).await;
        let provider = Arc::new(ScriptedProvider::new("mock").failing("upstream down"));
        let err = compactor(store.clone(), provider)
            .compact_session(&CancellationToken::new(), "s1")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Provider { .. }));
        assert_eq!(store.message_count("s1").await.unwrap(), 45);
    }

    #[tokio::test]
    async fn test_empty_summary_deletes_nothing() {
        let store = seeded_store(45).await;
        let provider = Arc::new(ScriptedProvider::new("mock").with_reply(vec![]));
        let result = compactor(store.clone(), provider)
            .compact_session(&CancellationToken::new(), "s1")
            .await;
        assert!(result.is_err());
        assert_eq!(store.message_count("s1").await.unwrap(), 45);
    }

    #[tokio::test]
    async fn test_mid_stream_error_deletes_nothing() {
        let store = seeded_store(45).await;
        let provider = Arc::new(ScriptedProvider::new("mock").with_reply(vec![
            ProviderEvent::Token("- partial".into()),
            ProviderEvent::Error("connection reset".into()),
        ]));
        let result = compactor(store.clone(), provider)
            .compact_session(&CancellationToken::new(), "s1")
            .await;
        assert!(result.is_err());
        assert_eq!(store.message_count("s1").await.unwrap(), 45);
    }

    #[test]
    fn test_structured_messages_rendered_as_placeholders() {
        let call = ToolCall {
            id: "c1".into(),
            name: "shell".into(),
            input: serde_json::json!({"command": "cat secrets"}),
        };
        let msgs = vec![
            Message::user_text("s1", "hi"),
            Message::assistant_tool_calls("s1", "", vec![call]).unwrap(),
        ];
        let transcript = render_transcript(&msgs);
        assert_eq!(transcript, "user: hi\n[assistant sent tool_calls]");
    }
}
