//! Anthropic messages backend.
//!
//! Structured output is implemented with a forced tool call whose input schema is
//! the target schema — the model's tool input IS the structured value. Vision uses
//! base64 image source blocks; chat maps tools and tool results onto the content
//! block protocol.

use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};
use tokio::time::sleep;

use super::chat::{ChatMessage, ChatRole, ContentBlock, MessageContent, ToolCall, ToolSpec};
use super::openai::to_vision_error;
use super::{provider_error, LlmProvider, RpmLimiter};
use crate::config::LlmConfig;
use crate::error::Result;

const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

/// Name of the synthetic tool used for structured output.
const OUTPUT_TOOL: &str = "structured_output";

pub(crate) struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
    limiter: RpmLimiter,
}

impl AnthropicProvider {
    pub(crate) fn new(
        api_key: String,
        model: Option<String>,
        config: &LlmConfig,
        limiter: RpmLimiter,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_retries: config.max_retries,
            limiter,
        }
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;

            let response = self
                .client
                .post(API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(body)
                .send()
                .await;

            let retryable = match &response {
                Ok(r) => {
                    let status = r.status().as_u16();
                    status == 429 || status >= 500
                }
                Err(_) => true,
            };

            if retryable && attempt < self.max_retries {
                let wait = Duration::from_secs(2_u64.pow(attempt).min(30));
                tracing::warn!(attempt = attempt + 1, "Anthropic request failed, retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
                continue;
            }

            let response = response
                .map_err(|e| provider_error("anthropic", &self.model, e.to_string()))?;
            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| provider_error("anthropic", &self.model, e.to_string()))?;

            if !status.is_success() {
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown API error");
                return Err(provider_error(
                    "anthropic",
                    &self.model,
                    format!("HTTP {status}: {message}"),
                ));
            }
            return Ok(body);
        }
    }

    /// Splits the system prompt off and renders the rest into the messages shape.
    fn render_conversation(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut rendered = Vec::new();

        for message in messages {
            match message.role {
                ChatRole::System => system = Some(message.normalized_text()),
                ChatRole::User => {
                    rendered.push(json!({ "role": "user", "content": message.normalized_text() }));
                }
                ChatRole::Assistant => {
                    let mut blocks = Vec::new();
                    let text = message.normalized_text();
                    if !text.is_empty() {
                        blocks.push(json!({ "type": "text", "text": text }));
                    }
                    for call in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    rendered.push(json!({ "role": "assistant", "content": blocks }));
                }
                ChatRole::Tool => {
                    rendered.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                            "content": message.normalized_text(),
                        }]
                    }));
                }
            }
        }

        (system, rendered)
    }

    fn parse_response(&self, body: &Value) -> ChatMessage {
        let mut blocks = Vec::new();
        let mut tool_calls = Vec::new();

        for block in body.get("content").and_then(Value::as_array).into_iter().flatten() {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        blocks.push(ContentBlock::Text { text: text.to_string() });
                    }
                }
                Some("tool_use") => {
                    let id = block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    blocks.push(ContentBlock::ToolUse { id: id.clone(), name: name.clone() });
                    tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: block.get("input").cloned().unwrap_or_else(|| json!({})),
                    });
                }
                _ => {}
            }
        }

        let content = if blocks.is_empty() {
            MessageContent::Null
        } else {
            MessageContent::Blocks(blocks)
        };
        ChatMessage::assistant(content, tool_calls)
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn invoke_structured_value(&self, prompt: &str, schema: &Value) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
            "tools": [{
                "name": OUTPUT_TOOL,
                "description": "Record the structured answer.",
                "input_schema": schema,
            }],
            "tool_choice": { "type": "tool", "name": OUTPUT_TOOL },
        });

        let response = self.post(&body).await?;
        response
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
            .and_then(|block| block.get("input").cloned())
            .ok_or_else(|| {
                provider_error("anthropic", &self.model, "response carried no tool output")
            })
    }

    async fn invoke_vision(&self, text_prompt: &str, image: &[u8], mime_type: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    {
                        "type": "image",
                        "source": { "type": "base64", "media_type": mime_type, "data": encoded }
                    },
                    { "type": "text", "text": text_prompt }
                ]
            }]
        });

        let response = self.post(&body).await.map_err(to_vision_error)?;
        let text = response
            .get("content")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find_map(|block| {
                (block.get("type").and_then(Value::as_str) == Some("text"))
                    .then(|| block.get("text").and_then(Value::as_str))
                    .flatten()
            })
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }

    async fn invoke_chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage> {
        let (system, rendered) = Self::render_conversation(messages);
        let mut body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": rendered,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.parameters,
                        })
                    })
                    .collect(),
            );
        }

        let response = self.post(&body).await?;
        Ok(self.parse_response(&response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_rendering_splits_system_and_maps_tool_results() {
        let messages = vec![
            ChatMessage::system("you are a research agent"),
            ChatMessage::user("find Toyota"),
            ChatMessage::assistant(
                MessageContent::Text("searching".into()),
                vec![ToolCall {
                    id: "t1".into(),
                    name: "search_company".into(),
                    arguments: json!({"query": "Toyota"}),
                }],
            ),
            ChatMessage::tool_result("t1", "{\"count\": 1}"),
        ];

        let (system, rendered) = AnthropicProvider::render_conversation(&messages);
        assert_eq!(system.as_deref(), Some("you are a research agent"));
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[1]["content"][1]["type"], "tool_use");
        assert_eq!(rendered[2]["content"][0]["type"], "tool_result");
        assert_eq!(rendered[2]["content"][0]["tool_use_id"], "t1");
    }
}
