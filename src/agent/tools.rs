//! Tool schemas and execution for the research agent.
//!
//! Each tool has a typed argument struct whose JSON Schema (derived with schemars)
//! is what the LLM sees. Results are plain JSON values; tools that touch documents
//! attach a `metadata` object carrying `doc_id` and the hierarchy fields so the
//! orchestrator can harvest them and downstream calls can preserve the download
//! layout.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::LocalCache;
use crate::config::Config;
use crate::directory::CompanyDirectory;
use crate::edinet::{
    DocumentFilter, DocumentSearchService, DownloadType, EdinetClient, SearchOrder,
};
use crate::error::{AgentError, Result};
use crate::ir::{IrCategory, IrService};
use crate::llm::{invoke_structured, LlmProvider, ToolSpec};
use crate::paths::build_download_path;
use crate::pdf::{ParseStrategy, PdfExtractor};

/// Cap on document text handed to analysis prompts.
const ANALYSIS_CONTENT_CAP: usize = 30_000;

fn schema_for<T: JsonSchema>() -> Value {
    let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}))
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchCompanyArgs {
    /// 企業名、EDINETコード、または証券コード
    query: String,
    /// 返す候補の最大数
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchDocumentsArgs {
    /// 企業のEDINETコード（例: E02144）
    #[serde(default)]
    edinet_code: Option<String>,
    /// 証券コード（5桁）
    #[serde(default)]
    sec_code: Option<String>,
    /// 企業名の部分一致フィルタ
    #[serde(default)]
    company_name: Option<String>,
    /// 書類種別コード（120=有価証券報告書, 140=四半期報告書, 160=半期報告書, 180=臨時報告書）
    #[serde(default)]
    doc_type_codes: Option<Vec<String>>,
    /// 検索開始日（YYYY-MM-DD）
    #[serde(default)]
    start_date: Option<String>,
    /// 検索終了日（YYYY-MM-DD）
    #[serde(default)]
    end_date: Option<String>,
    /// newest_first または oldest_first
    #[serde(default)]
    search_order: Option<String>,
    /// 取得する書類の最大数（指定すると早期終了する）
    #[serde(default)]
    max_documents: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DownloadDocumentArgs {
    /// 書類管理番号（8文字）
    doc_id: String,
    #[serde(default)]
    sec_code: Option<String>,
    #[serde(default)]
    filer_name: Option<String>,
    #[serde(default)]
    doc_type_code: Option<String>,
    #[serde(default)]
    period_end: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AnalyzeDocumentArgs {
    /// 分析対象の書類管理番号
    doc_id: String,
    /// 比較する過去の書類管理番号
    #[serde(default)]
    previous_doc_id: Option<String>,
    #[serde(default)]
    sec_code: Option<String>,
    #[serde(default)]
    filer_name: Option<String>,
    #[serde(default)]
    doc_type_code: Option<String>,
    #[serde(default)]
    doc_description: Option<String>,
    #[serde(default)]
    period_start: Option<String>,
    #[serde(default)]
    period_end: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SummarizeDocumentArgs {
    /// 要約対象の書類管理番号
    doc_id: String,
    /// 要約の観点（例: 収益性、リスク）
    #[serde(default)]
    focus: Option<String>,
    #[serde(default)]
    sec_code: Option<String>,
    #[serde(default)]
    filer_name: Option<String>,
    #[serde(default)]
    doc_type_code: Option<String>,
    #[serde(default)]
    period_end: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CompareDocumentsArgs {
    /// 比較する書類管理番号（2件以上）
    doc_ids: Vec<String>,
    /// 比較の観点
    #[serde(default)]
    aspects: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FetchIrDocumentsArgs {
    /// 証券コード（5桁）
    sec_code: String,
    /// earnings | news | disclosures（省略時は全カテゴリ）
    #[serde(default)]
    category: Option<IrCategory>,
    /// 過去何日分を取得するか
    #[serde(default)]
    since_days: Option<i64>,
    /// 要約を生成するか
    #[serde(default)]
    with_summary: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FetchIrNewsArgs {
    /// 証券コード（5桁）
    sec_code: String,
    /// 取得件数
    #[serde(default)]
    limit: Option<usize>,
    /// 過去何日分を取得するか
    #[serde(default)]
    since_days: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExploreIrPageArgs {
    /// IRページのURL
    url: String,
    /// 過去何日分を取得するか
    #[serde(default)]
    since_days: Option<i64>,
}

/// Structured analysis report produced by `analyze_document`.
#[derive(Debug, Deserialize, JsonSchema, serde::Serialize)]
pub struct AnalysisReport {
    /// 事業内容の要約
    pub business_summary: String,
    /// 主要なリスク要因
    pub risk_factors: Vec<String>,
    /// 財務ハイライト
    pub financial_highlights: Vec<String>,
    /// 今後の見通し
    pub outlook: String,
}

#[derive(Debug, Deserialize, JsonSchema, serde::Serialize)]
pub struct DocumentSummary {
    /// 書類全体の要約
    pub summary: String,
    /// 重要なポイント
    pub key_points: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema, serde::Serialize)]
pub struct AspectComparison {
    pub aspect: String,
    pub comparison: String,
}

#[derive(Debug, Deserialize, JsonSchema, serde::Serialize)]
pub struct ComparisonReport {
    pub aspects: Vec<AspectComparison>,
    /// 全体的な比較の結論
    pub overall: String,
}

/// Human-readable label for a lookback window.
pub(crate) fn format_period_days(days: i64) -> String {
    match days {
        ..=7 => "直近1週間".to_string(),
        8..=14 => "直近2週間".to_string(),
        15..=31 => "直近1ヶ月".to_string(),
        32..=62 => "直近2ヶ月".to_string(),
        63..=93 => "直近3ヶ月".to_string(),
        94..=186 => "直近6ヶ月".to_string(),
        187..=365 => "直近1年".to_string(),
        _ => format!("過去{days}日間"),
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    let raw = value?;
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            tracing::warn!(raw, "invalid date format, expected YYYY-MM-DD");
            None
        }
    }
}

/// Everything the tools need to run, owned once per agent.
pub struct ToolRuntime {
    config: Config,
    edinet: EdinetClient,
    directory: tokio::sync::Mutex<CompanyDirectory>,
    cache: LocalCache,
    ir: IrService,
    provider: Arc<dyn LlmProvider>,
    extractor: PdfExtractor,
}

impl ToolRuntime {
    pub fn new(config: Config, provider: Arc<dyn LlmProvider>, ir: IrService) -> Result<Self> {
        // The vision path is best-effort: without a credential for the vision
        // provider the auto chain simply stops at OCR.
        let extractor = match crate::llm::create_provider(&config.llm, true) {
            Ok(vision) => PdfExtractor::new().with_vision_provider(vision),
            Err(e) => {
                tracing::debug!(error = %e, "vision provider unavailable, extraction stops at OCR");
                PdfExtractor::new()
            }
        };

        Ok(Self {
            edinet: EdinetClient::new(config.edinet.clone())?,
            directory: tokio::sync::Mutex::new(CompanyDirectory::new(config.download.clone())),
            cache: LocalCache::new(config.download.download_dir.clone()),
            ir,
            provider,
            extractor,
            config,
        })
    }

    /// The tool table shown to the LLM.
    pub fn tool_specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec {
                name: "search_company".into(),
                description: "企業名・EDINETコード・証券コードで企業を検索し、類似度付き候補リストを返す".into(),
                parameters: schema_for::<SearchCompanyArgs>(),
            },
            ToolSpec {
                name: "search_documents".into(),
                description: "EDINET書類を検索する。書類種別・日付範囲・検索順序・取得上限でフィルタできる".into(),
                parameters: schema_for::<SearchDocumentsArgs>(),
            },
            ToolSpec {
                name: "download_document".into(),
                description: "EDINET書類のPDFをダウンロードする（doc_idが必要）".into(),
                parameters: schema_for::<DownloadDocumentArgs>(),
            },
            ToolSpec {
                name: "analyze_document".into(),
                description: "書類を詳細に分析し、事業・リスク・財務の統合レポートを生成する".into(),
                parameters: schema_for::<AnalyzeDocumentArgs>(),
            },
            ToolSpec {
                name: "summarize_document".into(),
                description: "書類を要約する".into(),
                parameters: schema_for::<SummarizeDocumentArgs>(),
            },
            ToolSpec {
                name: "compare_documents".into(),
                description: "複数の書類を指定の観点で比較分析する".into(),
                parameters: schema_for::<CompareDocumentsArgs>(),
            },
            ToolSpec {
                name: "fetch_ir_documents".into(),
                description: "登録企業のIRページからIR資料をダウンロードする（証券コードで指定）".into(),
                parameters: schema_for::<FetchIrDocumentsArgs>(),
            },
            ToolSpec {
                name: "fetch_ir_news".into(),
                description: "登録企業のIRニュース一覧を取得する（要約なし）".into(),
                parameters: schema_for::<FetchIrNewsArgs>(),
            },
            ToolSpec {
                name: "explore_ir_page".into(),
                description: "未登録企業のIRページをLLMで探索して資料を取得する".into(),
                parameters: schema_for::<ExploreIrPageArgs>(),
            },
        ]
    }

    /// Executes one tool call. Unknown names and argument mismatches are errors the
    /// orchestrator serializes back to the model.
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value> {
        tracing::info!(tool = name, "executing tool");
        match name {
            "search_company" => self.search_company(serde_json::from_value(args)?).await,
            "search_documents" => self.search_documents(serde_json::from_value(args)?).await,
            "download_document" => self.download_document(serde_json::from_value(args)?).await,
            "analyze_document" => self.analyze_document(serde_json::from_value(args)?).await,
            "summarize_document" => self.summarize_document(serde_json::from_value(args)?).await,
            "compare_documents" => self.compare_documents(serde_json::from_value(args)?).await,
            "fetch_ir_documents" => self.fetch_ir_documents(serde_json::from_value(args)?).await,
            "fetch_ir_news" => self.fetch_ir_news(serde_json::from_value(args)?).await,
            "explore_ir_page" => self.explore_ir_page(serde_json::from_value(args)?).await,
            other => Err(AgentError::Config(format!("unknown tool: {other}"))),
        }
    }

    async fn search_company(&self, args: SearchCompanyArgs) -> Result<Value> {
        let limit = args.limit.unwrap_or(10);
        let candidates = self.directory.lock().await.search(&args.query, limit).await?;

        let results: Vec<Value> = candidates
            .iter()
            .map(|c| {
                json!({
                    "edinet_code": c.company.edinet_code,
                    "sec_code": c.company.sec_code,
                    "company_name": c.company.company_name,
                    "company_name_en": c.company.company_name_en,
                    "similarity": c.similarity,
                    "match_field": c.match_field,
                })
            })
            .collect();

        Ok(json!({ "count": results.len(), "candidates": results }))
    }

    async fn search_documents(&self, args: SearchDocumentsArgs) -> Result<Value> {
        let order = match args.search_order.as_deref() {
            Some("oldest_first") => SearchOrder::OldestFirst,
            _ => SearchOrder::NewestFirst,
        };

        let filter = DocumentFilter {
            sec_code: args.sec_code,
            edinet_code: args.edinet_code,
            company_name: args.company_name,
            doc_type_codes: args.doc_type_codes,
            start_date: parse_date(args.start_date.as_deref()),
            end_date: parse_date(args.end_date.as_deref()),
            search_order: order,
            max_documents: args.max_documents,
        };

        let service = DocumentSearchService::new(self.edinet.clone());
        let documents = service.search(&filter).await?;

        // Serialized to plain objects so the tool message survives the round trip.
        let results: Vec<Value> = documents
            .iter()
            .map(|doc| serde_json::to_value(doc).unwrap_or_else(|_| json!({})))
            .collect();

        Ok(json!({ "count": results.len(), "documents": results }))
    }

    async fn download_document(&self, args: DownloadDocumentArgs) -> Result<Value> {
        // The cache is consulted first: a hit means no network call at all.
        if let Some(cached) = self.cache.find_by_doc_id(&args.doc_id) {
            return Ok(json!({
                "file_path": cached.file_path.display().to_string(),
                "from_cache": true,
                "metadata": {
                    "doc_id": cached.doc_id,
                    "sec_code": cached.sec_code,
                    "doc_type_code": cached.doc_type_code,
                },
            }));
        }

        let save_path = build_download_path(
            &self.config.download.download_dir,
            args.sec_code.as_deref(),
            args.filer_name.as_deref(),
            args.doc_type_code.as_deref(),
            args.period_end.as_deref(),
            &args.doc_id,
        );

        let path = self
            .edinet
            .download_document(&args.doc_id, DownloadType::Pdf, &save_path)
            .await?;

        Ok(json!({
            "file_path": path.display().to_string(),
            "from_cache": false,
            "metadata": {
                "doc_id": args.doc_id,
                "sec_code": args.sec_code,
                "filer_name": args.filer_name,
                "doc_type_code": args.doc_type_code,
                "period_end": args.period_end,
            },
        }))
    }

    /// Locates a document on disk (cache first, then download) and extracts its
    /// markdown, capped for prompting.
    async fn document_markdown(
        &self,
        doc_id: &str,
        sec_code: Option<&str>,
        filer_name: Option<&str>,
        doc_type_code: Option<&str>,
        period_end: Option<&str>,
    ) -> Result<(PathBuf, String)> {
        let path = match self.cache.find_by_doc_id(doc_id) {
            Some(cached) => cached.file_path,
            None => {
                let save_path = build_download_path(
                    &self.config.download.download_dir,
                    sec_code,
                    filer_name,
                    doc_type_code,
                    period_end,
                    doc_id,
                );
                self.edinet
                    .download_document(doc_id, DownloadType::Pdf, &save_path)
                    .await?
            }
        };

        let parsed = self
            .extractor
            .to_markdown(&path, None, None, ParseStrategy::Auto)
            .await?;
        let mut text = parsed.text;
        if text.chars().count() > ANALYSIS_CONTENT_CAP {
            text = text.chars().take(ANALYSIS_CONTENT_CAP).collect();
            text.push_str("\n\n[以下省略...]");
        }
        Ok((path, text))
    }

    async fn analyze_document(&self, args: AnalyzeDocumentArgs) -> Result<Value> {
        let (path, content) = self
            .document_markdown(
                &args.doc_id,
                args.sec_code.as_deref(),
                args.filer_name.as_deref(),
                args.doc_type_code.as_deref(),
                args.period_end.as_deref(),
            )
            .await?;

        let mut previous_section = String::new();
        if let Some(previous_doc_id) = &args.previous_doc_id {
            if let Ok((_, previous)) = self
                .document_markdown(previous_doc_id, None, None, None, None)
                .await
            {
                previous_section = format!("\n\n## 前期の書類（比較用）\n{previous}");
            }
        }

        let prompt = format!(
            "あなたは企業分析の専門家です。以下の開示書類を分析してください。\n\
\n\
- 企業名: {filer}\n\
- 書類: {description}\n\
- 対象期間: {start} 〜 {end}\n\
\n\
## 書類本文\n\
{content}{previous_section}",
            filer = args.filer_name.as_deref().unwrap_or("不明"),
            description = args.doc_description.as_deref().unwrap_or("不明"),
            start = args.period_start.as_deref().unwrap_or("不明"),
            end = args.period_end.as_deref().unwrap_or("不明"),
        );

        let report: AnalysisReport = invoke_structured(self.provider.as_ref(), &prompt).await?;

        Ok(json!({
            "report": report,
            "file_path": path.display().to_string(),
            "metadata": {
                "doc_id": args.doc_id,
                "sec_code": args.sec_code,
                "filer_name": args.filer_name,
                "doc_type_code": args.doc_type_code,
                "period_start": args.period_start,
                "period_end": args.period_end,
                "doc_description": args.doc_description,
            },
        }))
    }

    async fn summarize_document(&self, args: SummarizeDocumentArgs) -> Result<Value> {
        let (path, content) = self
            .document_markdown(
                &args.doc_id,
                args.sec_code.as_deref(),
                args.filer_name.as_deref(),
                args.doc_type_code.as_deref(),
                args.period_end.as_deref(),
            )
            .await?;

        let focus_section = args
            .focus
            .as_deref()
            .map(|focus| format!("\n特に「{focus}」の観点を重視してください。"))
            .unwrap_or_default();

        let prompt = format!(
            "以下の開示書類を要約してください。{focus_section}\n\n## 書類本文\n{content}"
        );
        let summary: DocumentSummary = invoke_structured(self.provider.as_ref(), &prompt).await?;

        Ok(json!({
            "summary": summary,
            "file_path": path.display().to_string(),
            "metadata": {
                "doc_id": args.doc_id,
                "sec_code": args.sec_code,
                "filer_name": args.filer_name,
                "doc_type_code": args.doc_type_code,
                "period_end": args.period_end,
            },
        }))
    }

    async fn compare_documents(&self, args: CompareDocumentsArgs) -> Result<Value> {
        if args.doc_ids.len() < 2 {
            return Err(AgentError::Config(
                "compare_documents requires at least two doc_ids".to_string(),
            ));
        }

        let mut sections = Vec::new();
        for doc_id in &args.doc_ids {
            let (_, content) = self.document_markdown(doc_id, None, None, None, None).await?;
            sections.push(format!("## 書類 {doc_id}\n{content}"));
        }

        let aspects = args
            .aspects
            .clone()
            .unwrap_or_else(|| vec!["業績".to_string(), "リスク".to_string(), "見通し".to_string()]);

        let prompt = format!(
            "以下の複数の開示書類を、次の観点で比較分析してください: {}\n\n{}",
            aspects.join("、"),
            sections.join("\n\n")
        );
        let report: ComparisonReport = invoke_structured(self.provider.as_ref(), &prompt).await?;

        Ok(json!({
            "comparison": report,
            "doc_ids": args.doc_ids,
        }))
    }

    async fn fetch_ir_documents(&self, args: FetchIrDocumentsArgs) -> Result<Value> {
        let since_days = args.since_days.unwrap_or(self.config.ir.default_since_days);
        let since = Local::now().date_naive() - chrono::Duration::days(since_days);
        let with_summary = args.with_summary.unwrap_or(false);

        let documents = self
            .ir
            .fetch_ir_documents(&args.sec_code, args.category, Some(since), false, with_summary)
            .await?;

        Ok(json!({
            "period": format_period_days(since_days),
            "since_date": since.format("%Y-%m-%d").to_string(),
            "count": documents.len(),
            "documents": documents
                .iter()
                .map(|doc| ir_document_json(doc))
                .collect::<Vec<_>>(),
        }))
    }

    async fn fetch_ir_news(&self, args: FetchIrNewsArgs) -> Result<Value> {
        let since_days = args.since_days.unwrap_or(self.config.ir.default_since_days);
        let since = Local::now().date_naive() - chrono::Duration::days(since_days);
        let limit = args.limit.unwrap_or(10);

        let documents = self
            .ir
            .fetch_ir_documents(&args.sec_code, Some(IrCategory::News), Some(since), false, false)
            .await?;

        let items: Vec<Value> = documents
            .iter()
            .take(limit)
            .map(|doc| {
                json!({
                    "title": doc.title,
                    "url": doc.url,
                    "published_date": doc.published_date.map(|d| d.format("%Y-%m-%d").to_string()),
                })
            })
            .collect();

        Ok(json!({ "count": items.len(), "news": items }))
    }

    async fn explore_ir_page(&self, args: ExploreIrPageArgs) -> Result<Value> {
        let since_days = args.since_days.unwrap_or(self.config.ir.default_since_days);
        let since = Local::now().date_naive() - chrono::Duration::days(since_days);

        let documents = self.ir.explore_ir_page(&args.url, Some(since), false, true).await?;

        Ok(json!({
            "count": documents.len(),
            "documents": documents.iter().map(ir_document_json).collect::<Vec<_>>(),
        }))
    }
}

fn ir_document_json(doc: &crate::ir::IrDocument) -> Value {
    let mut value = json!({
        "title": doc.title,
        "url": doc.url,
        "category": doc.category,
        "published_date": doc.published_date.map(|d| d.format("%Y-%m-%d").to_string()),
        "is_skipped": doc.is_skipped,
        "file_path": doc.file_path.as_ref().map(|p| p.display().to_string()),
        "is_downloaded": doc.file_path.is_some(),
    });
    if let Some(summary) = &doc.summary {
        value["summary"] = serde_json::to_value(summary).unwrap_or(Value::Null);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_specs_cover_the_full_table() {
        let specs = ToolRuntime::tool_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "search_company",
                "search_documents",
                "download_document",
                "analyze_document",
                "summarize_document",
                "compare_documents",
                "fetch_ir_documents",
                "fetch_ir_news",
                "explore_ir_page",
            ]
        );
        for spec in &specs {
            assert!(spec.parameters.get("properties").is_some(), "{} lacks schema", spec.name);
        }
    }

    #[test]
    fn period_labels() {
        assert_eq!(format_period_days(7), "直近1週間");
        assert_eq!(format_period_days(30), "直近1ヶ月");
        assert_eq!(format_period_days(90), "直近3ヶ月");
        assert_eq!(format_period_days(365), "直近1年");
        assert_eq!(format_period_days(400), "過去400日間");
    }

    #[test]
    fn invalid_dates_are_dropped_with_a_warning() {
        assert_eq!(parse_date(Some("2024-06-20")), NaiveDate::from_ymd_opt(2024, 6, 20));
        assert_eq!(parse_date(Some("not a date")), None);
        assert_eq!(parse_date(None), None);
    }
}
