//! Google Gemini backend over the generateContent REST API.
//!
//! Structured output uses JSON response mode with a response schema; the schema is
//! lightly sanitized because Gemini accepts an OpenAPI-style subset rather than
//! full JSON Schema. Vision sends inline base64 data; chat maps tools onto
//! function declarations.

use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};
use tokio::time::sleep;

use super::chat::{ChatMessage, ChatRole, MessageContent, ToolCall, ToolSpec};
use super::openai::to_vision_error;
use super::{provider_error, LlmProvider, RpmLimiter};
use crate::config::LlmConfig;
use crate::error::Result;

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub(crate) struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
    limiter: RpmLimiter,
}

impl GoogleProvider {
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
        let url = format!("{API_BASE}/{}:generateContent", self.model);

        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;

            let response = self
                .client
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
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
                tracing::warn!(attempt = attempt + 1, "Gemini request failed, retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
                continue;
            }

            let response = response
                .map_err(|e| provider_error("google", &self.model, e.to_string()))?;
            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| provider_error("google", &self.model, e.to_string()))?;

            if !status.is_success() {
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown API error");
                return Err(provider_error(
                    "google",
                    &self.model,
                    format!("HTTP {status}: {message}"),
                ));
            }
            return Ok(body);
        }
    }

    fn first_text(body: &Value) -> Option<String> {
        let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        (!text.is_empty()).then_some(text)
    }
}

/// Strips JSON Schema keywords Gemini's OpenAPI-subset validator rejects.
pub(crate) fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "$schema" | "$defs" | "definitions" | "additionalProperties" | "title" => {}
                    _ => {
                        out.insert(key.clone(), sanitize_schema(value));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

/// Renders the conversation into Gemini contents, returning the system
/// instruction separately.
pub(crate) fn render_contents(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system = None;
    let mut contents = Vec::new();

    for message in messages {
        match message.role {
            ChatRole::System => system = Some(message.normalized_text()),
            ChatRole::User => {
                contents.push(json!({
                    "role": "user",
                    "parts": [{ "text": message.normalized_text() }],
                }));
            }
            ChatRole::Assistant => {
                let mut parts = Vec::new();
                let text = message.normalized_text();
                if !text.is_empty() {
                    parts.push(json!({ "text": text }));
                }
                for call in &message.tool_calls {
                    parts.push(json!({
                        "functionCall": { "name": call.name, "args": call.arguments }
                    }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            ChatRole::Tool => {
                // Gemini has no tool-call ids; results are matched by function
                // name, which the orchestrator stores in tool_call_id as
                // "name:id".
                let name = message
                    .tool_call_id
                    .as_deref()
                    .and_then(|id| id.split(':').next())
                    .unwrap_or_default();
                let response: Value = serde_json::from_str(&message.normalized_text())
                    .unwrap_or_else(|_| json!({ "text": message.normalized_text() }));
                contents.push(json!({
                    "role": "function",
                    "parts": [{
                        "functionResponse": { "name": name, "response": { "result": response } }
                    }]
                }));
            }
        }
    }

    (system, contents)
}

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "google"
    }

    async fn invoke_structured_value(&self, prompt: &str, schema: &Value) -> Result<Value> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": sanitize_schema(schema),
            }
        });

        let response = self.post(&body).await?;
        let text = Self::first_text(&response).ok_or_else(|| {
            provider_error("google", &self.model, "response carried no content")
        })?;
        serde_json::from_str(&text)
            .map_err(|e| provider_error("google", &self.model, format!("invalid JSON output: {e}")))
    }

    async fn invoke_vision(&self, text_prompt: &str, image: &[u8], mime_type: &str) -> Result<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": text_prompt },
                    { "inline_data": { "mime_type": mime_type, "data": encoded } }
                ]
            }]
        });

        let response = self.post(&body).await.map_err(to_vision_error)?;
        Ok(Self::first_text(&response).unwrap_or_default().trim().to_string())
    }

    async fn invoke_chat(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<ChatMessage> {
        let (system, contents) = render_contents(messages);
        let mut body = json!({ "contents": contents });
        if let Some(system) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !tools.is_empty() {
            body["tools"] = json!([{
                "functionDeclarations": tools
                    .iter()
                    .map(|tool| json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": sanitize_schema(&tool.parameters),
                    }))
                    .collect::<Vec<_>>()
            }]);
        }

        let response = self.post(&body).await?;

        let parts = response
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                text_parts.push(text.to_string());
            }
            if let Some(call) = part.get("functionCall") {
                let name = call
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                tool_calls.push(ToolCall {
                    // Synthesize a stable id; Gemini does not provide one.
                    id: format!("{name}:{index}"),
                    name,
                    arguments: call.get("args").cloned().unwrap_or_else(|| json!({})),
                });
            }
        }

        let content = if text_parts.is_empty() {
            MessageContent::Null
        } else {
            MessageContent::Text(text_parts.join("\n"))
        };
        Ok(ChatMessage::assistant(content, tool_calls))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_sanitizer_strips_unsupported_keywords() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "Thing",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "name": { "type": "string", "title": "Name" }
            },
            "definitions": { "Other": { "type": "string" } }
        });
        let cleaned = sanitize_schema(&schema);
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("definitions").is_none());
        assert!(cleaned.pointer("/properties/name/title").is_none());
        assert_eq!(cleaned["type"], "object");
    }

    #[test]
    fn function_responses_match_by_name() {
        let messages = vec![ChatMessage::tool_result("search_documents:0", "{\"count\": 2}")];
        let (_, contents) = render_contents(&messages);
        assert_eq!(
            contents[0]["parts"][0]["functionResponse"]["name"],
            "search_documents"
        );
    }
}
