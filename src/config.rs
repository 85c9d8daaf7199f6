//! Configuration loading for all kaijikit subsystems.
//!
//! Configuration is sourced once through [`Config::load`], which walks a `.env` file
//! (via dotenvy), then the process environment, then built-in defaults, and returns a
//! frozen struct. Downstream code never reads environment variables directly — clients
//! and services receive the sub-config they need at construction.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AgentError, Result};

/// EDINET API base URL (v2).
pub const EDINET_BASE_URL: &str = "https://api.edinet-fsa.go.jp/api/v2";

/// Download URL of the EDINET code list (ZIP archive with one CSV inside).
pub const CODE_LIST_URL: &str =
    "https://disclosure2dl.edinet-fsa.go.jp/searchdocument/codelist/Edinetcode.zip";

/// Top-level configuration for the research agent.
///
/// Most users call [`Config::load`] once at startup and pass sub-configs down:
///
/// ```no_run
/// # use kaijikit::Config;
/// let config = Config::load()?;
/// println!("downloads go to {}", config.download.download_dir.display());
/// # Ok::<(), kaijikit::AgentError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub edinet: EdinetConfig,
    pub llm: LlmConfig,
    pub scraper: ScraperConfig,
    pub ir: IrConfig,
    pub download: DownloadConfig,
}

/// Settings for the EDINET filings client.
#[derive(Debug, Clone)]
pub struct EdinetConfig {
    /// API key, sent as the `Subscription-Key` query parameter on every request.
    pub api_key: String,

    /// Base URL of the filings API.
    pub base_url: String,

    /// Timeout for document-list requests.
    pub timeout_list: Duration,

    /// Timeout for binary document downloads.
    pub timeout_download: Duration,
}

/// Which LLM vendor backs a provider instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    OpenAi,
    Google,
    Anthropic,
    /// OpenAI-compatible local server (no credential required).
    Local,
}

impl LlmProviderKind {
    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(LlmProviderKind::OpenAi),
            "google" => Ok(LlmProviderKind::Google),
            "anthropic" => Ok(LlmProviderKind::Anthropic),
            "local" => Ok(LlmProviderKind::Local),
            other => Err(AgentError::Config(format!("unsupported LLM provider: {other}"))),
        }
    }
}

/// Settings shared by every LLM backend.
///
/// The vision path may use a different provider and model than the text path; the
/// `effective_*` accessors apply that override.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProviderKind,
    pub model: Option<String>,
    pub vision_provider: Option<LlmProviderKind>,
    pub vision_model: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Client-side requests-per-minute ceiling, enforced before each call.
    pub rpm_limit: u32,
    pub openai_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub local_base_url: String,
}

impl LlmConfig {
    /// Provider for the requested role, applying the vision override when set.
    pub fn effective_provider(&self, for_vision: bool) -> LlmProviderKind {
        if for_vision {
            self.vision_provider.unwrap_or(self.provider)
        } else {
            self.provider
        }
    }

    /// Model for the requested role.
    ///
    /// A vision provider override without a vision model deliberately falls back to
    /// that provider's default model, not the text model.
    pub fn effective_model(&self, for_vision: bool) -> Option<String> {
        if for_vision {
            if self.vision_model.is_some() {
                return self.vision_model.clone();
            }
            if self.vision_provider.is_some() {
                return None;
            }
        }
        self.model.clone()
    }
}

/// Settings for the IR scraping substrate.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    /// Minimum interval between outbound requests.
    pub rate_limit: Duration,

    /// Browser navigation / download timeout.
    pub timeout: Duration,

    /// User agent sent on browser and plain-HTTP requests alike.
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            rate_limit: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            user_agent: concat!(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) ",
                "AppleWebKit/537.36 (KHTML, like Gecko) ",
                "Chrome/120.0.0.0 Safari/537.36 Kaijikit/0.1"
            )
            .to_string(),
        }
    }
}

/// Settings for the IR pipeline.
#[derive(Debug, Clone)]
pub struct IrConfig {
    /// Directory holding `<sec_code>_<name>.yaml` templates.
    pub templates_dir: PathBuf,

    /// Default lookback window when a caller does not pass `since`.
    pub default_since_days: i64,
}

impl Default for IrConfig {
    fn default() -> Self {
        Self {
            templates_dir: PathBuf::from("config/ir_templates"),
            default_since_days: 90,
        }
    }
}

/// Settings for the filesystem download hierarchy.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Root of the hierarchical layout; also the root of the company-list cache.
    pub download_dir: PathBuf,

    /// Cache directory for the EDINET code list.
    pub code_list_cache_dir: PathBuf,

    /// Days the cached code list stays valid before a refresh.
    pub code_list_validity_days: i64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
            code_list_cache_dir: PathBuf::from("data/cache/edinet_code_list"),
            code_list_validity_days: 7,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    /// Loads configuration with precedence env > `.env` file > defaults.
    ///
    /// `EDINET_API_KEY` is required and has no default; everything else falls back.
    /// The returned struct is frozen — reconfiguration means calling `load` again.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::Config` when `EDINET_API_KEY` is missing or an enum-typed
    /// variable (e.g. `LLM_PROVIDER`) holds an unrecognized value.
    pub fn load() -> Result<Self> {
        // dotenvy never overrides variables already present in the environment,
        // which gives the env > file precedence for free.
        let _ = dotenvy::dotenv();

        let api_key = env_var("EDINET_API_KEY").ok_or_else(|| {
            AgentError::Config("EDINET_API_KEY is required and has no default".to_string())
        })?;

        let provider = match env_var("LLM_PROVIDER") {
            Some(v) => LlmProviderKind::parse(&v)?,
            None => LlmProviderKind::Google,
        };
        let vision_provider = match env_var("LLM_VISION_PROVIDER") {
            Some(v) => Some(LlmProviderKind::parse(&v)?),
            None => None,
        };

        let mut download = DownloadConfig::default();
        if let Some(dir) = env_var("DOWNLOAD_DIR") {
            download.download_dir = PathBuf::from(dir);
        }

        let mut ir = IrConfig::default();
        if let Some(dir) = env_var("IR_TEMPLATES_DIR") {
            ir.templates_dir = PathBuf::from(dir);
        }
        ir.default_since_days = env_parse("IR_DEFAULT_SINCE_DAYS", ir.default_since_days);

        Ok(Config {
            edinet: EdinetConfig {
                api_key,
                base_url: env_var("EDINET_BASE_URL").unwrap_or_else(|| EDINET_BASE_URL.to_string()),
                timeout_list: Duration::from_secs(env_parse("EDINET_TIMEOUT_LIST", 30u64)),
                timeout_download: Duration::from_secs(env_parse("EDINET_TIMEOUT_DOWNLOAD", 120u64)),
            },
            llm: LlmConfig {
                provider,
                model: env_var("LLM_MODEL"),
                vision_provider,
                vision_model: env_var("LLM_VISION_MODEL"),
                timeout: Duration::from_secs(env_parse("LLM_TIMEOUT", 120u64)),
                max_retries: env_parse("LLM_MAX_RETRIES", 3u32),
                rpm_limit: env_parse("LLM_RPM_LIMIT", 60u32),
                openai_api_key: env_var("OPENAI_API_KEY"),
                google_api_key: env_var("GOOGLE_API_KEY"),
                anthropic_api_key: env_var("ANTHROPIC_API_KEY"),
                local_base_url: env_var("LOCAL_BASE_URL")
                    .unwrap_or_else(|| "http://localhost:11434/v1".to_string()),
            },
            scraper: ScraperConfig::default(),
            ir,
            download,
        })
    }
}
