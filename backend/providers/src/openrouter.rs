use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use gatehouse_core::{
    ChatRequest, ContentType, Message, Provider, ProviderEvent, ProviderStream, Role,
    ToolDefinition,
};

use crate::sse::{parse_arguments, SseDecoder, WireUsage};

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Any endpoint speaking the OpenAI `chat/completions` protocol
/// (OpenRouter, vLLM, llama.cpp server, Ollama's `/v1`).
pub struct OpenAiCompatProvider {
    name: String,
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(name: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            api_key,
            base_url: OPENROUTER_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(self)
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Translate stored history into the wire message list.
///
/// A `ToolResults` message expands into one `tool` message per result.
pub(crate) fn wire_messages(system_prompt: &str, history: &[Message]) -> Result<Vec<Value>> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(json!({"role": "system", "content": system_prompt}));
    }
    for msg in history {
        match msg.content_type {
            ContentType::Text => {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                messages.push(json!({"role": role, "content": msg.content}));
            }
            ContentType::ToolCalls => {
                let payload = serde_json::from_str::<gatehouse_core::ToolCallsPayload>(&msg.content)
                    .with_context(|| format!("message {} has a bad tool_calls payload", msg.id))?;
                let calls: Vec<Value> = payload
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.input.to_string()},
                        })
                    })
                    .collect();
                let content = if payload.text.is_empty() {
                    Value::Null
                } else {
                    Value::String(payload.text)
                };
                messages.push(json!({"role": "assistant", "content": content, "tool_calls": calls}));
            }
            ContentType::ToolResults => {
                let results = serde_json::from_str::<Vec<gatehouse_core::ToolResult>>(&msg.content)
                    .with_context(|| format!("message {} has a bad tool_results payload", msg.id))?;
                for r in results {
                    messages.push(json!({
                        "role": "tool",
                        "tool_call_id": r.tool_call_id,
                        "content": r.content,
                    }));
                }
            }
        }
    }
    Ok(messages)
}

fn wire_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

fn response_events(response: WireResponse) -> Vec<ProviderEvent> {
    let mut events = Vec::new();
    if let Some(choice) = response.choices.into_iter().next() {
        if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
            events.push(ProviderEvent::Token(text));
        }
        for call in choice.message.tool_calls {
            events.push(ProviderEvent::ToolCall(gatehouse_core::ToolCall {
                id: call.id,
                name: call.function.name,
                input: parse_arguments(&call.function.arguments),
            }));
        }
    }
    if let Some(usage) = response.usage {
        events.push(ProviderEvent::Usage(usage.into()));
    }
    events
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ProviderStream> {
        let body = WireRequest {
            messages: wire_messages(&request.system_prompt, &request.messages)?,
            tools: wire_tools(&request.tools),
            model: request.model.clone(),
            max_tokens: request.max_tokens,
            stream: request.stream,
            stream_options: request.stream.then(|| json!({"include_usage": true})),
        };

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = body.messages.len(),
            stream = request.stream,
            "Sending chat request"
        );

        let mut http = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            http = http.header("Authorization", format!("Bearer {key}"));
        }

        let response = http
            .send()
            .await
            .with_context(|| format!("{} HTTP request failed", self.name))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", self.name, status, error_body);
        }

        if !request.stream {
            let parsed: WireResponse = response
                .json()
                .await
                .with_context(|| format!("Failed to parse {} response", self.name))?;
            return Ok(Box::pin(futures::stream::iter(response_events(parsed))));
        }

        let bytes = Box::pin(response.bytes_stream());
        let events = futures::stream::unfold(
            (bytes, SseDecoder::new(), false),
            |(mut bytes, mut decoder, finished)| async move {
                if finished {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        let events = decoder.feed(&chunk);
                        Some((events, (bytes, decoder, false)))
                    }
                    Some(Err(e)) => {
                        let events = vec![ProviderEvent::Error(format!("stream read failed: {e}"))];
                        Some((events, (bytes, decoder, true)))
                    }
                    None => {
                        let events = decoder.finish();
                        Some((events, (bytes, decoder, true)))
                    }
                }
            },
        )
        .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }
}
