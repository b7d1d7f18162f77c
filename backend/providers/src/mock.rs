use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use gatehouse_core::{ChatRequest, Provider, ProviderEvent, ProviderStream, ToolCall, Usage};

/// A provider that replays scripted replies, one per `chat` call.
///
/// Once the script runs out the last reply repeats, so a single scripted
/// tool call models a model that never stops asking for tools.
pub struct ScriptedProvider {
    name: String,
    replies: Mutex<VecDeque<Vec<ProviderEvent>>>,
    last: Mutex<Vec<ProviderEvent>>,
    requests: Mutex<Vec<ChatRequest>>,
    fail_with: Option<String>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            fail_with: None,
            delay: None,
        }
    }

    pub fn with_reply(self, events: Vec<ProviderEvent>) -> Self {
        self.replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(events);
        self
    }

    /// A reply consisting of text tokens only.
    pub fn with_text(self, text: &str) -> Self {
        let tokens = text
            .split_inclusive(' ')
            .map(|t| ProviderEvent::Token(t.to_string()))
            .collect();
        self.with_reply(tokens)
    }

    pub fn with_tool_call(self, id: &str, name: &str, input: serde_json::Value) -> Self {
        self.with_reply(vec![ProviderEvent::ToolCall(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input,
        })])
    }

    /// Every `chat` call fails before streaming.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    /// Pause before each streamed event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn next_reply(&self) -> Vec<ProviderEvent> {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(reply) = self
            .replies
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
        {
            *last = reply;
        }
        last.clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ProviderStream> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request);
        if let Some(message) = &self.fail_with {
            anyhow::bail!("{message}");
        }

        let mut events = self.next_reply();
        if !events.iter().any(|e| matches!(e, ProviderEvent::Usage(_))) {
            events.push(ProviderEvent::Usage(Usage {
                input_tokens: 10,
                output_tokens: events.len() as u64,
            }));
        }

        let stream = futures::stream::iter(events);
        match self.delay {
            Some(delay) => Ok(Box::pin(stream.then(move |event| async move {
                tokio::time::sleep(delay).await;
                event
            }))),
            None => Ok(Box::pin(stream)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "mock".into(),
            system_prompt: String::new(),
            messages: Vec::new(),
            tools: Vec::new(),
            max_tokens: 100,
            stream: true,
        }
    }

    #[tokio::test]
    async fn test_replies_in_order_then_repeat_last() {
        let provider = ScriptedProvider::new("mock")
            .with_text("first reply")
            .with_text("second");

        let mut texts = Vec::new();
        for _ in 0..3 {
            let events: Vec<ProviderEvent> = provider.chat(request()).await.unwrap().collect().await;
            let text: String = events
                .iter()
                .filter_map(|e| match e {
                    ProviderEvent::Token(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect();
            texts.push(text);
        }
        assert_eq!(texts, vec!["first reply", "second", "second"]);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_provider() {
        let provider = ScriptedProvider::new("mock").failing("upstream down");
        let err = provider.chat(request()).await.err().unwrap();
        assert_eq!(err.to_string(), "upstream down");
        assert_eq!(provider.requests().len(), 1);
    }
}
