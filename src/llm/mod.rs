//! Provider-agnostic LLM abstraction.
//!
//! One polymorphic interface covers four vendor backends (OpenAI, Google,
//! Anthropic, and an OpenAI-compatible local server). Every consumer of structured
//! output goes through [`invoke_structured`], which derives a JSON Schema from the
//! target type and lets the backend enforce it however its API allows.
//!
//! All backends share a client-side requests-per-minute ceiling on top of whatever
//! retries the vendor client performs; the ceiling is awaited before each call.

mod anthropic;
mod chat;
mod google;
mod local;
mod openai;

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, OnceLock};

use governor::{
    clock::DefaultClock, middleware::NoOpMiddleware, state::InMemoryState, state::NotKeyed, Quota,
    RateLimiter,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

pub use chat::{ChatMessage, ChatRole, ContentBlock, MessageContent, ToolCall, ToolSpec};

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::{AgentError, Result};

type Governor = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Client-side RPM ceiling, shared by every backend instance created from one
/// config.
#[derive(Clone)]
pub(crate) struct RpmLimiter {
    limiter: Arc<Governor>,
}

impl RpmLimiter {
    pub(crate) fn new(rpm_limit: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rpm_limit.max(1)).expect("clamped above"));
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    pub(crate) async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

/// The contract every LLM backend satisfies.
///
/// `invoke_structured_value` is schema-driven so the trait stays object-safe; the
/// typed entry point is the free function [`invoke_structured`].
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier actually in use (after defaults are applied).
    fn model_name(&self) -> &str;

    /// Vendor name: `"openai"`, `"google"`, `"anthropic"`, or `"local"`.
    fn provider_name(&self) -> &str;

    /// Whether the vision path is available on this model.
    fn supports_vision(&self) -> bool {
        true
    }

    /// Sends `prompt` and returns a JSON value conforming to `schema`.
    async fn invoke_structured_value(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Sends a text prompt plus one image.
    ///
    /// Must fail with a typed provider error when `supports_vision` is false. The
    /// image travels base64-encoded inside a `data:` URL (or the vendor's
    /// equivalent inline encoding).
    async fn invoke_vision(&self, text_prompt: &str, image: &[u8], mime_type: &str)
        -> Result<String>;

    /// One chat turn with optional tools; returns the assistant message, with any
    /// requested tool calls populated.
    async fn invoke_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<ChatMessage>;
}

/// Typed structured invocation: derives the schema from `T`, calls the provider,
/// and parses the result.
pub async fn invoke_structured<T>(provider: &dyn LlmProvider, prompt: &str) -> Result<T>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    let schema = serde_json::to_value(schema)?;
    let value = provider.invoke_structured_value(prompt, &schema).await?;
    serde_json::from_value(value.clone()).map_err(|e| AgentError::LlmProvider {
        message: format!("structured output did not match schema: {e}; got {value}"),
        provider: provider.provider_name().to_string(),
        model: provider.model_name().to_string(),
    })
}

/// Creates a provider for the configured vendor.
///
/// With `for_vision`, the `vision_provider`/`vision_model` overrides apply. The
/// required credential is validated here (the local backend needs none).
pub fn create_provider(config: &LlmConfig, for_vision: bool) -> Result<Arc<dyn LlmProvider>> {
    let kind = config.effective_provider(for_vision);
    let model = config.effective_model(for_vision);
    let limiter = RpmLimiter::new(config.rpm_limit);

    tracing::info!(
        provider = ?kind,
        model = model.as_deref().unwrap_or("default"),
        for_vision,
        "creating LLM provider"
    );

    let missing_key = |vendor: &str, var: &str| {
        AgentError::Config(format!(
            "{var} is required for the {vendor} provider; set the environment variable"
        ))
    };

    match kind {
        LlmProviderKind::OpenAi => {
            let api_key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| missing_key("OpenAI", "OPENAI_API_KEY"))?;
            Ok(Arc::new(openai::OpenAiProvider::new(api_key, model, config, limiter)))
        }
        LlmProviderKind::Google => {
            let api_key = config
                .google_api_key
                .clone()
                .ok_or_else(|| missing_key("Google", "GOOGLE_API_KEY"))?;
            Ok(Arc::new(google::GoogleProvider::new(api_key, model, config, limiter)))
        }
        LlmProviderKind::Anthropic => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .ok_or_else(|| missing_key("Anthropic", "ANTHROPIC_API_KEY"))?;
            Ok(Arc::new(anthropic::AnthropicProvider::new(api_key, model, config, limiter)))
        }
        LlmProviderKind::Local => {
            Ok(Arc::new(local::LocalProvider::new(model, config, limiter)))
        }
    }
}

struct ProviderCache {
    text: Mutex<Option<Arc<dyn LlmProvider>>>,
    vision: Mutex<Option<Arc<dyn LlmProvider>>>,
}

fn cache() -> &'static ProviderCache {
    static CACHE: OnceLock<ProviderCache> = OnceLock::new();
    CACHE.get_or_init(|| ProviderCache {
        text: Mutex::new(None),
        vision: Mutex::new(None),
    })
}

/// Memoized text provider for the given config.
///
/// The first call creates the instance; later calls return it regardless of the
/// config argument until [`reset_provider_cache`] is called. Prefer passing
/// providers explicitly; this is a convenience for thin entry points.
pub fn default_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let mut slot = cache().text.lock().expect("provider cache poisoned");
    if let Some(provider) = slot.as_ref() {
        return Ok(provider.clone());
    }
    let provider = create_provider(config, false)?;
    *slot = Some(provider.clone());
    Ok(provider)
}

/// Memoized vision provider; same caching contract as [`default_provider`].
pub fn vision_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    let mut slot = cache().vision.lock().expect("provider cache poisoned");
    if let Some(provider) = slot.as_ref() {
        return Ok(provider.clone());
    }
    let provider = create_provider(config, true)?;
    *slot = Some(provider.clone());
    Ok(provider)
}

/// Drops both memoized providers. For tests and reconfiguration.
pub fn reset_provider_cache() {
    *cache().text.lock().expect("provider cache poisoned") = None;
    *cache().vision.lock().expect("provider cache poisoned") = None;
    tracing::debug!("provider cache cleared");
}

/// Shared error constructor used by the backends.
pub(crate) fn provider_error(
    provider: &str,
    model: &str,
    message: impl Into<String>,
) -> AgentError {
    AgentError::LlmProvider {
        message: message.into(),
        provider: provider.to_string(),
        model: model.to_string(),
    }
}
