use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use kaijikit::{
    AgentError, ChatMessage, Config, DownloadConfig, EdinetConfig, IrConfig, LlmConfig,
    LlmProvider, LlmProviderKind, PageFetcher, ScraperConfig, ToolSpec,
};

pub fn fixture_path(relative: impl AsRef<Path>) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

#[allow(dead_code)]
pub fn read_fixture(relative: impl AsRef<Path>) -> String {
    std::fs::read_to_string(fixture_path(relative)).expect("fixture file should be readable")
}

/// EDINET client configuration pointed at a mock server.
#[allow(dead_code)]
pub fn edinet_config(base_url: &str) -> EdinetConfig {
    EdinetConfig {
        api_key: "test-key".to_string(),
        base_url: base_url.to_string(),
        timeout_list: Duration::from_secs(5),
        timeout_download: Duration::from_secs(5),
    }
}

#[allow(dead_code)]
pub fn llm_config() -> LlmConfig {
    LlmConfig {
        provider: LlmProviderKind::Local,
        model: None,
        vision_provider: None,
        vision_model: None,
        timeout: Duration::from_secs(5),
        max_retries: 0,
        rpm_limit: 600,
        openai_api_key: None,
        google_api_key: None,
        anthropic_api_key: None,
        local_base_url: "http://localhost:11434/v1".to_string(),
    }
}

/// A full config for agent tests: EDINET against `base_url`, downloads and the
/// code-list cache inside `root`.
#[allow(dead_code)]
pub fn test_config(base_url: &str, root: &Path) -> Config {
    Config {
        edinet: edinet_config(base_url),
        llm: llm_config(),
        scraper: ScraperConfig::default(),
        ir: IrConfig {
            templates_dir: root.join("templates"),
            default_since_days: 90,
        },
        download: DownloadConfig {
            download_dir: root.join("downloads"),
            code_list_cache_dir: root.join("code_list"),
            code_list_validity_days: 7,
        },
    }
}

/// Writes a cp932-encoded code-list cache (preamble + header + rows) with a fresh
/// timestamp so the directory loads it without any network access.
#[allow(dead_code)]
pub fn seed_code_list(cache_dir: &Path, rows: &[&str]) {
    std::fs::create_dir_all(cache_dir).unwrap();

    let mut csv = String::from("ダウンロード実行日,2025/07/01,,,,,\n");
    csv.push_str("ＥＤＩＮＥＴコード,提出者種別,上場区分,連結の有無,資本金,決算日,提出者名,提出者名（英字）,提出者名（カナ）,所在地,提出者業種,証券コード,提出者法人番号\n");
    for row in rows {
        csv.push_str(row);
        csv.push('\n');
    }

    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(&csv);
    std::fs::write(cache_dir.join("EdinetcodeDlInfo.csv"), encoded.as_ref()).unwrap();
    std::fs::write(
        cache_dir.join(".timestamp"),
        chrono::Local::now().to_rfc3339(),
    )
    .unwrap();
}

/// Fetcher with canned pages and a download counter, for pipeline tests.
#[allow(dead_code)]
pub struct MockFetcher {
    pub pages: Mutex<std::collections::HashMap<String, String>>,
    pub downloads: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockFetcher {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(std::collections::HashMap::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.pages.lock().unwrap().insert(url.to_string(), html.to_string());
        self
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_page(&self, url: &str) -> kaijikit::Result<String> {
        self.pages.lock().unwrap().get(url).cloned().ok_or_else(|| AgentError::PageAccess {
            message: "no canned page".to_string(),
            url: url.to_string(),
            status_code: Some(404),
        })
    }

    async fn download_pdf(
        &self,
        url: &str,
        save_path: &Path,
        force: bool,
        _referer: Option<&str>,
    ) -> kaijikit::Result<PathBuf> {
        if save_path.exists() && !force {
            return Ok(save_path.to_path_buf());
        }
        self.downloads.lock().unwrap().push(url.to_string());
        std::fs::create_dir_all(save_path.parent().unwrap()).unwrap();
        std::fs::write(save_path, b"%PDF-1.4 mock").unwrap();
        Ok(save_path.to_path_buf())
    }
}

/// Provider that replays scripts: assistant messages for `invoke_chat`, JSON
/// values for structured invocations.
#[allow(dead_code)]
pub struct ScriptedProvider {
    pub responses: Mutex<VecDeque<ChatMessage>>,
    pub structured: Mutex<VecDeque<serde_json::Value>>,
}

#[allow(dead_code)]
impl ScriptedProvider {
    pub fn new(responses: Vec<ChatMessage>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            structured: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_structured(self, values: Vec<serde_json::Value>) -> Self {
        *self.structured.lock().unwrap() = values.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "local"
    }

    async fn invoke_structured_value(
        &self,
        _prompt: &str,
        _schema: &serde_json::Value,
    ) -> kaijikit::Result<serde_json::Value> {
        self.structured
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::LlmProvider {
                message: "structured output not scripted".to_string(),
                provider: "local".to_string(),
                model: "scripted".to_string(),
            })
    }

    async fn invoke_vision(
        &self,
        _text_prompt: &str,
        _image: &[u8],
        _mime_type: &str,
    ) -> kaijikit::Result<String> {
        Err(AgentError::vision("vision not scripted"))
    }

    async fn invoke_chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> kaijikit::Result<ChatMessage> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::LlmProvider {
                message: "script exhausted".to_string(),
                provider: "local".to_string(),
                model: "scripted".to_string(),
            })
    }
}
