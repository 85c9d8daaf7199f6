//! # kaijikit — a research agent for Japanese corporate disclosures
//!
//! kaijikit combines four subsystems into one tool-using research agent over
//! Japanese listed companies:
//!
//! - **Filings retrieval** — a typed client for the EDINET disclosure portal with
//!   date-iterated, filtered search and early termination
//! - **IR scraping** — a declarative per-company template engine with an
//!   LLM-driven fallback explorer, on a rate-limited browser/HTTP substrate
//! - **PDF → markdown extraction** — a strategy chain (native parsers → OCR →
//!   vision LLM) behind a quality gate
//! - **Orchestration** — a provider-agnostic LLM abstraction driving the tool set
//!   in a ReAct loop
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use kaijikit::{Config, Orchestrator, ToolRuntime, IrService, Scraper, TemplateEngine, LlmExplorer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let provider = kaijikit::default_provider(&config.llm)?;
//!
//!     let scraper: Arc<Scraper> = Arc::new(Scraper::new(config.scraper.clone()));
//!     let ir = IrService::new(
//!         TemplateEngine::new(config.ir.templates_dir.clone()),
//!         LlmExplorer::new(provider.clone()),
//!         provider.clone(),
//!         scraper,
//!         config.download.download_dir.clone(),
//!         config.ir.clone(),
//!     );
//!
//!     let runtime = ToolRuntime::new(config, provider.clone(), ir)?;
//!     let agent = Orchestrator::new(provider, Arc::new(runtime));
//!
//!     let result = agent.process("トヨタの最新の有価証券報告書を要約して").await?;
//!     println!("{}", result.result);
//!     Ok(())
//! }
//! ```

mod agent;
mod cache;
mod config;
mod directory;
mod edinet;
mod error;
mod ir;
mod llm;
mod paths;
mod pdf;
mod scrape;

// Re-export the public surface for a clean API
pub use agent::{
    system_prompt, AnalysisReport, ComparisonReport, DocumentInfo, DocumentSummary, Orchestrator,
    OrchestratorResult, ToolRuntime,
};
pub use cache::{CacheStats, CachedDocument, LocalCache};
pub use config::{
    Config, DownloadConfig, EdinetConfig, IrConfig, LlmConfig, LlmProviderKind, ScraperConfig,
};
pub use directory::{normalize_sec_code, CompanyCandidate, CompanyDirectory, CompanyRecord};
pub use edinet::{
    DocumentFilter, DocumentListResponse, DocumentSearchService, DownloadType, EdinetClient,
    FilingMetadata, RequestParameter, ResponseMetadata, ResultSet, SearchOrder,
};
pub use error::{AgentError, Result};
pub use ir::{
    CustomScraper, ImpactLabel, ImpactPoint, IrCategory, IrDocument, IrService, IrSummary,
    IrTemplate, LlmExplorer, TemplateCompany, TemplateEngine, TemplateIrPage, TemplateSection,
};
pub use llm::{
    create_provider, default_provider, invoke_structured, reset_provider_cache, vision_provider,
    ChatMessage, ChatRole, ContentBlock, LlmProvider, MessageContent, ToolCall, ToolSpec,
};
pub use paths::{
    build_download_path, doc_type_name, find_document_in_hierarchy, parse_period_to_yyyymm,
    sanitize_filename,
};
pub use pdf::{OcrModelPaths, ParseStrategy, ParsedPdfContent, PdfExtractor, PdfInfo};
pub use scrape::{resolve_url, BrowserSession, PageFetcher, Scraper};

// Version information
/// Current crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
