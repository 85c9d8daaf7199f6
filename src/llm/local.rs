//! OpenAI-compatible local backend (Ollama, LM Studio, vLLM, ...).
//!
//! Speaks the same chat-completions dialect as the OpenAI backend against a
//! configurable base URL and needs no credential. Local servers rarely implement
//! the `json_schema` response format, so structured output falls back to JSON mode
//! with the schema embedded in the prompt.
//!
//! Vision capability depends on which model is loaded; it is detected from the
//! model name against the known multimodal prefixes.

use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};
use tokio::time::sleep;

use super::chat::{ChatMessage, ToolSpec};
use super::openai::{parse_assistant, render_messages, to_vision_error};
use super::{provider_error, LlmProvider, RpmLimiter};
use crate::config::LlmConfig;
use crate::error::Result;

const DEFAULT_MODEL: &str = "llama3.2";

/// Model-name prefixes known to be multimodal.
const VISION_CAPABLE_PREFIXES: [&str; 5] = ["llava", "bakllava", "moondream", "qwen2-vl", "minicpm-v"];

pub(crate) struct LocalProvider {
    client: reqwest::Client,
    model: String,
    url: String,
    max_retries: u32,
    limiter: RpmLimiter,
}

impl LocalProvider {
    pub(crate) fn new(model: Option<String>, config: &LlmConfig, limiter: RpmLimiter) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.timeout)
                .build()
                .unwrap_or_default(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            url: format!("{}/chat/completions", config.local_base_url.trim_end_matches('/')),
            max_retries: config.max_retries,
            limiter,
        }
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;

            let response = self.client.post(&self.url).json(body).send().await;
            let retryable = match &response {
                Ok(r) => r.status().as_u16() >= 500,
                Err(_) => true,
            };

            if retryable && attempt < self.max_retries {
                let wait = Duration::from_secs(2_u64.pow(attempt).min(30));
                tracing::warn!(attempt = attempt + 1, "local LLM request failed, retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
                continue;
            }

            let response = response
                .map_err(|e| provider_error("local", &self.model, e.to_string()))?;
            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| provider_error("local", &self.model, e.to_string()))?;

            if !status.is_success() {
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown API error");
                return Err(provider_error(
                    "local",
                    &self.model,
                    format!("HTTP {status}: {message}"),
                ));
            }
            return Ok(body);
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "local"
    }

    fn supports_vision(&self) -> bool {
        let model = self.model.to_lowercase();
        VISION_CAPABLE_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
    }

    async fn invoke_structured_value(&self, prompt: &str, schema: &Value) -> Result<Value> {
        let prompt = format!(
            "{prompt}\n\n出力は次のJSONスキーマに厳密に従ったJSONのみを返してください:\n{schema}"
        );
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "response_format": { "type": "json_object" },
        });

        let response = self.post(&body).await?;
        let text = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| provider_error("local", &self.model, "response carried no content"))?;
        serde_json::from_str(text)
            .map_err(|e| provider_error("local", &self.model, format!("invalid JSON output: {e}")))
    }

    async fn invoke_vision(&self, text_prompt: &str, image: &[u8], mime_type: &str) -> Result<String> {
        if !self.supports_vision() {
            return Err(provider_error(
                "local",
                &self.model,
                format!("Vision not supported by model: {}", self.model),
            ));
        }

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
        Ok(response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string())
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
            .ok_or_else(|| provider_error("local", &self.model, "response carried no message"))?;
        Ok(parse_assistant(message))
    }
}
