//! Incremental decoder for OpenAI-style `chat/completions` SSE streams.
//!
//! Text deltas become `Token` events as soon as they arrive. Tool-call
//! deltas are accumulated by index and emitted whole once the choice
//! finishes (or the stream ends).

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use gatehouse_core::{ProviderEvent, ToolCall, Usage};

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl From<WireUsage> for Usage {
    fn from(u: WireUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<WireUsage>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u64,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Tool arguments arrive as a JSON string. Anything unparseable is passed
/// through as a string so the tool can reject it.
pub(crate) fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| {
        warn!("Tool call arguments are not valid JSON");
        serde_json::Value::String(raw.to_string())
    })
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    calls: BTreeMap<u64, PartialCall>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns the events completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Vec<ProviderEvent> {
        self.buffer.extend_from_slice(data);
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            self.handle_line(line.trim_end_matches(['\r', '\n']), &mut events);
        }
        events
    }

    /// Flush whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.handle_line(line.trim(), &mut events);
        }
        self.flush_calls(&mut events);
        events
    }

    fn handle_line(&mut self, line: &str, events: &mut Vec<ProviderEvent>) {
        let Some(payload) = line.strip_prefix("data:") else {
            // Comments, `event:` and `id:` lines carry nothing we use.
            return;
        };
        let payload = payload.trim();
        if payload.is_empty() || self.done {
            return;
        }
        if payload == "[DONE]" {
            self.done = true;
            self.flush_calls(events);
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Skipping unparseable stream chunk: {e}");
                return;
            }
        };

        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            events.push(ProviderEvent::Error(message));
            return;
        }

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content {
                if !text.is_empty() {
                    events.push(ProviderEvent::Token(text));
                }
            }
            for delta in choice.delta.tool_calls {
                let partial = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    partial.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        partial.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        partial.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.flush_calls(events);
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(ProviderEvent::Usage(usage.into()));
        }
    }

    fn flush_calls(&mut self, events: &mut Vec<ProviderEvent>) {
        for (index, call) in std::mem::take(&mut self.calls) {
            if call.name.is_empty() {
                warn!(index, "Dropping tool call delta without a function name");
                continue;
            }
            let id = if call.id.is_empty() {
                format!("call_{index}")
            } else {
                call.id
            };
            events.push(ProviderEvent::ToolCall(ToolCall {
                id,
                name: call.name,
                input: parse_arguments(&call.arguments),
            }));
        }
    }
}
