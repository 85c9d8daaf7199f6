//! OpenAI chat-completions backend.
//!
//! Structured output uses the `json_schema` response format; vision sends the image
//! as a base64 `data:` URL inside a multimodal user message; chat maps tools onto
//! the function-calling surface.

use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};
use tokio::time::sleep;

use super::chat::{ChatMessage, ChatRole, ContentBlock, MessageContent, ToolCall, ToolSpec};
use super::{provider_error, LlmProvider, RpmLimiter};
use crate::config::LlmConfig;
use crate::error::Result;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub(crate) struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    max_retries: u32,
    limiter: RpmLimiter,
}

impl OpenAiProvider {
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
            url: API_URL.to_string(),
            max_retries: config.max_retries,
            limiter,
        }
    }

    /// POSTs a request body, retrying 429/5xx responses with exponential backoff.
    pub(crate) async fn post(&self, body: &Value) -> Result<Value> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;

            let response = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
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
                tracing::warn!(attempt = attempt + 1, "OpenAI request failed, retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
                continue;
            }

            let response = response
                .map_err(|e| provider_error("openai", &self.model, e.to_string()))?;
            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| provider_error("openai", &self.model, e.to_string()))?;

            if !status.is_success() {
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown API error");
                return Err(provider_error(
                    "openai",
                    &self.model,
                    format!("HTTP {status}: {message}"),
                ));
            }
            return Ok(body);
        }
    }

    fn message_text(body: &Value) -> Option<&str> {
        body.pointer("/choices/0/message/content").and_then(Value::as_str)
    }
}

/// Serializes provider-neutral messages into the chat-completions shape.
pub(crate) fn render_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Tool => "tool",
            };
            let mut entry = json!({ "role": role });

            match &message.content {
                MessageContent::Text(text) => entry["content"] = json!(text),
                MessageContent::Blocks(blocks) => {
                    // Only text survives the round trip; tool use is carried by
                    // the dedicated tool_calls field below.
                    let text = blocks
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::Text { text } => Some(text.as_str()),
                            ContentBlock::ToolUse { .. } => None,
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    entry["content"] = json!(text);
                }
                MessageContent::Null => entry["content"] = Value::Null,
            }

            if !message.tool_calls.is_empty() {
                entry["tool_calls"] = Value::Array(
                    message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect(),
                );
            }
            if let Some(id) = &message.tool_call_id {
                entry["tool_call_id"] = json!(id);
            }
            entry
        })
        .collect()
}

/// Parses an assistant response message back into the neutral model.
pub(crate) fn parse_assistant(message: &Value) -> ChatMessage {
    let content = match message.get("content") {
        Some(Value::String(text)) => MessageContent::Text(text.clone()),
        _ => MessageContent::Null,
    };

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id")?.as_str()?.to_string();
                    let name = call.pointer("/function/name")?.as_str()?.to_string();
                    let arguments = call
                        .pointer("/function/arguments")
                        .and_then(Value::as_str)
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_else(|| json!({}));
                    Some(ToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    ChatMessage::assistant(content, tool_calls)
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn invoke_structured_value(&self, prompt: &str, schema: &Value) -> Result<Value> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_output",
                    "schema": schema,
                }
            }
        });

        let response = self.post(&body).await?;
        let text = Self::message_text(&response).ok_or_else(|| {
            provider_error("openai", &self.model, "response carried no content")
        })?;
        serde_json::from_str(text)
            .map_err(|e| provider_error("openai", &self.model, format!("invalid JSON output: {e}")))
    }

    async fn invoke_vision(&self, text_prompt: &str, image: &[u8], mime_type: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": text_prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:{mime_type};base64,{encoded}") }
                    }
                ]
            }]
        });

        let response = self.post(&body).await.map_err(to_vision_error)?;
        Ok(Self::message_text(&response).unwrap_or_default().trim().to_string())
    }

    async fn invoke_chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage> {
        let mut body = json!({
            "model": self.model,
            "messages": render_messages(messages),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        let response = self.post(&body).await?;
        let message = response
            .pointer("/choices/0/message")
            .ok_or_else(|| provider_error("openai", &self.model, "response carried no message"))?;
        Ok(parse_assistant(message))
    }
}

/// Re-labels a provider failure on the vision path so rate-limit retries apply.
pub(crate) fn to_vision_error(e: crate::error::AgentError) -> crate::error::AgentError {
    crate::error::AgentError::vision(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_parsing_extracts_tool_calls() {
        let raw = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": "search_company", "arguments": "{\"query\": \"トヨタ\"}" }
            }]
        });
        let message = parse_assistant(&raw);
        assert_eq!(message.content, MessageContent::Null);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "search_company");
        assert_eq!(message.tool_calls[0].arguments["query"], "トヨタ");
    }

    #[test]
    fn malformed_arguments_degrade_to_empty_object() {
        let raw = json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": "x", "arguments": "not json" }
            }]
        });
        let message = parse_assistant(&raw);
        assert_eq!(message.tool_calls[0].arguments, json!({}));
    }

    #[test]
    fn tool_results_render_with_call_id() {
        let messages = vec![ChatMessage::tool_result("call_1", "{\"count\": 2}")];
        let rendered = render_messages(&messages);
        assert_eq!(rendered[0]["role"], "tool");
        assert_eq!(rendered[0]["tool_call_id"], "call_1");
    }
}
