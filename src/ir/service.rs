//! The IR pipeline: strategy selection, dedup, reclassification, download, and
//! summarization.
//!
//! Integration layer over the template engine, the LLM explorer, the scraper, the
//! PDF extractor, and the summarizing LLM. Template scraping is preferred; the LLM
//! explorer covers companies without templates and templates that come back empty.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, NaiveDate};

use super::explorer::LlmExplorer;
use super::template::TemplateEngine;
use super::{IrCategory, IrDocument, IrSummary};
use crate::config::IrConfig;
use crate::error::{AgentError, Result};
use crate::llm::{invoke_structured, LlmProvider};
use crate::paths::sanitize_filename;
use crate::pdf::{ParseStrategy, PdfExtractor};
use crate::scrape::PageFetcher;

/// Cap on document text handed to the summarizer.
const SUMMARY_CONTENT_CAP: usize = 30_000;

/// Keyword families used for both dedup scoring and title reclassification.
const DISCLOSURE_KEYWORDS: [&str; 16] = [
    "自己株式", "業績予想", "配当予想", "修正", "異動", "提携", "子会社", "合併", "分割",
    "増資", "減資", "訴訟", "行政処分", "取得状況", "処分", "消却",
];
const EARNINGS_KEYWORDS: [&str; 19] = [
    "決算", "業績", "四半期", "通期", "月次", "売上", "財務", "有価証券報告", "報告書",
    "説明会", "ファクトシート", "ハイライト", "レポート", "quarterly", "annual", "financial",
    "results", "briefing", "presentation",
];
const NEWS_KEYWORDS: [&str; 15] = [
    "新製品", "新サービス", "発売", "開始", "受注", "契約", "発表", "リリース", "参入",
    "特許", "受賞", "認定", "launch", "release", "announce",
];

/// Integrated IR document retrieval.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use kaijikit::{Config, IrService, Scraper, TemplateEngine, LlmExplorer};
/// # async fn example() -> Result<(), kaijikit::AgentError> {
/// let config = Config::load()?;
/// let provider = kaijikit::default_provider(&config.llm)?;
/// let scraper = Arc::new(Scraper::new(config.scraper.clone()));
/// let service = IrService::new(
///     TemplateEngine::new(config.ir.templates_dir.clone()),
///     LlmExplorer::new(provider.clone()),
///     provider,
///     scraper,
///     config.download.download_dir.clone(),
///     config.ir.clone(),
/// );
/// let docs = service.fetch_ir_documents("72030", None, None, false, true).await?;
/// # Ok(())
/// # }
/// ```
pub struct IrService {
    templates: TemplateEngine,
    explorer: LlmExplorer,
    provider: Arc<dyn LlmProvider>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: PdfExtractor,
    data_dir: PathBuf,
    config: IrConfig,
    /// Known company homepages by securities code, for IR-page discovery when no
    /// template exists.
    homepages: HashMap<String, String>,
}

impl IrService {
    pub fn new(
        templates: TemplateEngine,
        explorer: LlmExplorer,
        provider: Arc<dyn LlmProvider>,
        fetcher: Arc<dyn PageFetcher>,
        data_dir: PathBuf,
        config: IrConfig,
    ) -> Self {
        Self {
            templates,
            explorer,
            provider,
            fetcher,
            extractor: PdfExtractor::new(),
            data_dir,
            config,
            homepages: HashMap::new(),
        }
    }

    /// Enables the vision-LLM fallback for PDF summarization.
    pub fn with_vision_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.extractor = PdfExtractor::new().with_vision_provider(provider);
        self
    }

    /// Registers company homepages by securities code.
    ///
    /// For companies without a template, the homepage is walked to discover their
    /// IR page before the LLM explorer runs. Like custom scrapers, this is an
    /// explicit registry: nothing is guessed from the code alone.
    pub fn with_company_homepages(mut self, homepages: HashMap<String, String>) -> Self {
        self.homepages = homepages;
        self
    }

    fn default_since(&self) -> NaiveDate {
        Local::now().date_naive() - chrono::Duration::days(self.config.default_since_days)
    }

    /// Fetches IR documents for a registered company.
    ///
    /// Template scraping runs first; an empty result falls back to LLM exploration
    /// of the template's base URL. Companies without a template get IR-page
    /// discovery from scratch. See the module docs for the post-processing steps.
    ///
    /// # Errors
    ///
    /// `TemplateNotFound` when neither path can produce documents.
    pub async fn fetch_ir_documents(
        &self,
        sec_code: &str,
        category: Option<IrCategory>,
        since: Option<NaiveDate>,
        force: bool,
        with_summary: bool,
    ) -> Result<Vec<IrDocument>> {
        let since = since.unwrap_or_else(|| self.default_since());

        let template = self.templates.load_template(sec_code)?;
        let mut documents: Vec<IrDocument> = Vec::new();
        let mut company_name: Option<String> = None;

        if let Some(template) = &template {
            company_name = Some(template.company.name.clone());
            tracing::info!(sec_code, company = template.company.name, "using IR template");

            match self.templates.scrape(self.fetcher.as_ref(), template, category).await {
                Ok(scraped) => documents = scraped,
                Err(e @ AgentError::PageAccess { .. }) => {
                    tracing::warn!(sec_code, error = %e, "template scraping failed, falling back to LLM");
                }
                Err(e) => return Err(e),
            }

            if documents.is_empty() && !template.ir_page.base_url.is_empty() {
                tracing::info!(sec_code, "falling back to LLM exploration");
                documents = self
                    .explorer
                    .explore_ir_page(self.fetcher.as_ref(), &template.ir_page.base_url)
                    .await;
            }

            if documents.is_empty() {
                return Err(AgentError::TemplateNotFound {
                    message: format!(
                        "Template found but no IR documents discovered from {}",
                        template.ir_page.base_url
                    ),
                    sec_code: sec_code.to_string(),
                });
            }
        } else {
            let Some(ir_url) = self.discover_ir_page(sec_code).await else {
                return Err(AgentError::TemplateNotFound {
                    message: "No template found and IR page could not be discovered".to_string(),
                    sec_code: sec_code.to_string(),
                });
            };
            documents = self.explorer.explore_ir_page(self.fetcher.as_ref(), &ir_url).await;
            if documents.is_empty() {
                return Err(AgentError::TemplateNotFound {
                    message: format!("IR page {ir_url} yielded no documents"),
                    sec_code: sec_code.to_string(),
                });
            }
        }

        let documents = filter_by_date(documents, since);
        let documents = deduplicate_by_url(documents);
        let documents = reclassify_by_title(documents);

        let folder = match &company_name {
            Some(name) => format!("{sec_code}_{}", sanitize_filename(Some(name))),
            None => sec_code.to_string(),
        };

        self.download_and_summarize(documents, &folder, force, with_summary)
            .await
    }

    /// Explores an arbitrary IR page URL through the same pipeline.
    ///
    /// The save folder is derived from the domain's second-level label.
    pub async fn explore_ir_page(
        &self,
        url: &str,
        since: Option<NaiveDate>,
        force: bool,
        with_summary: bool,
    ) -> Result<Vec<IrDocument>> {
        let since = since.unwrap_or_else(|| self.default_since());

        let documents = self.explorer.explore_ir_page(self.fetcher.as_ref(), url).await;
        let documents = filter_by_date(documents, since);
        let documents = deduplicate_by_url(documents);
        let documents = reclassify_by_title(documents);

        let folder = folder_name_from_url(url);
        self.download_and_summarize(documents, &folder, force, with_summary)
            .await
    }

    /// Fetches IR documents for every registered template.
    ///
    /// Per-company failures are logged and recorded as empty results; the batch
    /// never fails as a whole.
    pub async fn fetch_all_registered(
        &self,
        category: Option<IrCategory>,
        since: Option<NaiveDate>,
        force: bool,
    ) -> HashMap<String, Vec<IrDocument>> {
        let sec_codes = self.templates.list_templates();
        tracing::info!(count = sec_codes.len(), "fetching IR documents for registered companies");

        let mut results = HashMap::new();
        for sec_code in sec_codes {
            match self
                .fetch_ir_documents(&sec_code, category, since, force, true)
                .await
            {
                Ok(documents) => {
                    tracing::info!(sec_code, count = documents.len(), "fetched IR documents");
                    results.insert(sec_code, documents);
                }
                Err(e) => {
                    tracing::error!(sec_code, error = %e, "failed to fetch IR documents");
                    results.insert(sec_code, Vec::new());
                }
            }
        }
        results
    }

    /// Lists the securities codes that have templates.
    pub fn list_registered_companies(&self) -> Vec<String> {
        self.templates.list_templates()
    }

    /// Finds the IR page for a template-less company by walking its registered
    /// homepage. No registered homepage means no discovery.
    async fn discover_ir_page(&self, sec_code: &str) -> Option<String> {
        let Some(homepage) = self.homepages.get(sec_code) else {
            tracing::debug!(sec_code, "no template and no registered homepage");
            return None;
        };
        tracing::debug!(sec_code, homepage, "discovering IR page from homepage");
        self.explorer
            .find_ir_page_url(self.fetcher.as_ref(), homepage)
            .await
    }

    async fn download_and_summarize(
        &self,
        documents: Vec<IrDocument>,
        folder: &str,
        force: bool,
        with_summary: bool,
    ) -> Result<Vec<IrDocument>> {
        let mut out = Vec::with_capacity(documents.len());

        for mut doc in documents {
            let is_pdf = doc.url.to_lowercase().ends_with(".pdf");

            if !is_pdf {
                // HTML news page: never downloaded, optionally summarized in place.
                if with_summary {
                    match self.summarize_html_page(&doc).await {
                        Ok(summary) => {
                            tracing::info!(title = doc.title, "summarized HTML page");
                            doc.summary = Some(summary);
                        }
                        Err(e) => {
                            tracing::error!(title = doc.title, error = %e, "failed to summarize HTML page");
                        }
                    }
                }
                out.push(doc);
                continue;
            }

            let save_path = self.save_path(folder, &doc);

            if save_path.exists() && !force {
                doc.file_path = Some(save_path.clone());
                doc.is_skipped = true;
                tracing::debug!(path = %save_path.display(), "skipped (already cached)");
            } else {
                match self.fetcher.download_pdf(&doc.url, &save_path, force, None).await {
                    Ok(path) => {
                        tracing::info!(title = doc.title, "downloaded IR document");
                        doc.file_path = Some(path);
                    }
                    Err(e) => {
                        tracing::error!(url = doc.url, error = %e, "failed to download IR document");
                        continue;
                    }
                }
            }

            // Summaries are only regenerated for newly downloaded files.
            if with_summary && doc.file_path.is_some() && !doc.is_skipped {
                match self.summarize_pdf(&doc).await {
                    Ok(summary) => doc.summary = Some(summary),
                    Err(e) => {
                        tracing::error!(title = doc.title, error = %e, "failed to summarize document");
                    }
                }
            }

            out.push(doc);
        }

        Ok(out)
    }

    fn save_path(&self, folder: &str, doc: &IrDocument) -> PathBuf {
        let filename = url::Url::parse(&doc.url)
            .ok()
            .and_then(|u| {
                Path::new(u.path())
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .map(|name| urlencoding::decode(&name).map(|d| d.into_owned()).unwrap_or(name))
            .unwrap_or_else(|| "document.pdf".to_string())
            .replace(['/', '\\'], "_");

        self.data_dir
            .join(folder)
            .join("ir")
            .join(doc.category.as_str())
            .join(filename)
    }

    async fn summarize_pdf(&self, doc: &IrDocument) -> Result<IrSummary> {
        let path = doc.file_path.as_ref().ok_or_else(|| AgentError::Parse {
            message: "file_path is required for summarization".to_string(),
            pdf_path: String::new(),
            strategy: None,
        })?;

        let parsed = self
            .extractor
            .to_markdown(path, None, None, ParseStrategy::Auto)
            .await?;
        let content = truncate_for_summary(&parsed.text);
        self.summarize_content(doc, &content).await
    }

    async fn summarize_html_page(&self, doc: &IrDocument) -> Result<IrSummary> {
        let html = self.fetcher.fetch_page(&doc.url).await?;
        let content = extract_main_content(&html);
        let content = truncate_for_summary(&content);
        self.summarize_content(doc, &content).await
    }

    async fn summarize_content(&self, doc: &IrDocument, content: &str) -> Result<IrSummary> {
        let published = doc
            .published_date
            .map(|d| d.format("%Y年%m月%d日").to_string())
            .unwrap_or_else(|| "不明".to_string());

        let prompt = format!(
            "あなたは機関投資家向けのアナリストです。以下のIR資料を要約してください。\n\
\n\
## 資料情報\n\
- タイトル: {title}\n\
- カテゴリ: {category}\n\
- 公開日: {published}\n\
\n\
## 本文\n\
{content}\n\
\n\
## 出力要件\n\
- overview: 資料の要点を3〜5文でまとめる\n\
- impact_points: 株価に影響し得るポイントを挙げ、それぞれに\n\
  bullish（好材料）/ bearish（悪材料）/ warning(注意点) のラベルを付ける",
            title = doc.title,
            category = doc.category.display_name_ja(),
        );

        invoke_structured::<IrSummary>(self.provider.as_ref(), &prompt).await
    }
}

/// Keeps documents published on or after `since`; undated documents stay.
fn filter_by_date(documents: Vec<IrDocument>, since: NaiveDate) -> Vec<IrDocument> {
    documents
        .into_iter()
        .filter(|doc| doc.published_date.is_none_or(|date| date >= since))
        .collect()
}

/// Collapses documents sharing a URL into one, choosing the category whose keyword
/// family scores the title highest (first entry wins ties).
fn deduplicate_by_url(documents: Vec<IrDocument>) -> Vec<IrDocument> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<IrDocument>> = HashMap::new();

    for doc in documents {
        if !groups.contains_key(&doc.url) {
            order.push(doc.url.clone());
        }
        groups.entry(doc.url.clone()).or_default().push(doc);
    }

    order
        .into_iter()
        .map(|url| {
            let mut group = groups.remove(&url).expect("grouped above");
            if group.len() == 1 {
                group.pop().expect("non-empty")
            } else {
                let chosen = select_best_category(&group);
                tracing::debug!(url, category = %chosen.category, "deduplicated URL across categories");
                chosen
            }
        })
        .collect()
}

fn keyword_score(title: &str, keywords: &[&str]) -> u32 {
    keywords.iter().filter(|kw| title.contains(*kw)).count() as u32 * 2
}

fn select_best_category(group: &[IrDocument]) -> IrDocument {
    let title = group[0].title.to_lowercase();

    let scores = [
        (IrCategory::Disclosures, keyword_score(&title, &DISCLOSURE_KEYWORDS)),
        (IrCategory::Earnings, keyword_score(&title, &EARNINGS_KEYWORDS)),
        (IrCategory::News, keyword_score(&title, &NEWS_KEYWORDS)),
    ];
    // Ties keep the first entry, so only a strictly greater score displaces the
    // running maximum.
    let (mut best_category, mut best_score) = scores[0];
    for &(category, score) in &scores[1..] {
        if score > best_score {
            best_category = category;
            best_score = score;
        }
    }

    group
        .iter()
        .find(|doc| doc.category == best_category)
        .unwrap_or(&group[0])
        .clone()
}

/// Reclassifies every document by title with strict keyword precedence:
/// disclosures first, then earnings, then news; ambiguous titles default to
/// disclosures.
fn reclassify_by_title(documents: Vec<IrDocument>) -> Vec<IrDocument> {
    documents
        .into_iter()
        .map(|mut doc| {
            let correct = category_for_title(&doc.title);
            if correct != doc.category {
                tracing::debug!(
                    title = doc.title,
                    from = %doc.category,
                    to = %correct,
                    "reclassified by title"
                );
                doc.category = correct;
            }
            doc
        })
        .collect()
}

fn category_for_title(title: &str) -> IrCategory {
    let title = title.to_lowercase();

    if DISCLOSURE_KEYWORDS.iter().any(|kw| title.contains(kw)) {
        return IrCategory::Disclosures;
    }
    if EARNINGS_KEYWORDS.iter().any(|kw| title.contains(kw)) {
        return IrCategory::Earnings;
    }
    if NEWS_KEYWORDS.iter().any(|kw| title.contains(kw)) {
        return IrCategory::News;
    }
    // Untagged IR notices are most commonly timely disclosures.
    IrCategory::Disclosures
}

/// Prefers `<article>` over `<main>` over `<body>`, with boilerplate stripped.
fn extract_main_content(html: &str) -> String {
    let document = scraper::Html::parse_document(html);

    for selector in ["article", "main", "body"] {
        let selector = scraper::Selector::parse(selector).expect("static selector");
        if let Some(element) = document.select(&selector).next() {
            // scraper cannot mutate the DOM, so boilerplate subtrees are removed
            // by excluding the text fragments they contribute.
            let strip =
                scraper::Selector::parse("script, style, nav, footer, noscript").expect("static");
            let stripped: std::collections::HashSet<&str> = element
                .select(&strip)
                .flat_map(|e| e.text())
                .map(str::trim)
                .collect();
            return element
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty() && !stripped.contains(t))
                .collect::<Vec<_>>()
                .join("\n");
        }
    }

    String::new()
}

fn truncate_for_summary(content: &str) -> String {
    if content.chars().count() <= SUMMARY_CONTENT_CAP {
        return content.to_string();
    }
    let truncated: String = content.chars().take(SUMMARY_CONTENT_CAP).collect();
    format!("{truncated}\n\n[以下省略...]")
}

fn folder_name_from_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .map(|host| host.trim_start_matches("www.").to_string())
        .and_then(|host| host.split('.').next().map(str::to_owned))
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str, url: &str, category: IrCategory, date: Option<(i32, u32, u32)>) -> IrDocument {
        IrDocument::new(
            title,
            url,
            category,
            date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
        )
    }

    #[test]
    fn date_filter_keeps_undated_documents() {
        let since = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let docs = vec![
            doc("old", "https://x/a.pdf", IrCategory::News, Some((2024, 12, 31))),
            doc("new", "https://x/b.pdf", IrCategory::News, Some((2025, 1, 1))),
            doc("undated", "https://x/c.pdf", IrCategory::News, None),
        ];
        let kept = filter_by_date(docs, since);
        let titles: Vec<&str> = kept.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "undated"]);
    }

    #[test]
    fn dedup_picks_highest_scoring_category() {
        let docs = vec![
            doc("2025年3月期 決算短信", "https://x/a.pdf", IrCategory::News, None),
            doc("2025年3月期 決算短信", "https://x/a.pdf", IrCategory::Earnings, None),
        ];
        let deduped = deduplicate_by_url(docs);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].category, IrCategory::Earnings);
    }

    #[test]
    fn dedup_tie_falls_through_to_the_first_scored_category() {
        // 子会社 scores +2 for disclosures and 新製品 scores +2 for news; the tie
        // resolves to disclosures, which is scored first.
        let docs = vec![
            doc("子会社の新製品について", "https://x/a.pdf", IrCategory::News, None),
            doc("子会社の新製品について", "https://x/a.pdf", IrCategory::Disclosures, None),
        ];
        let deduped = deduplicate_by_url(docs);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].category, IrCategory::Disclosures);
    }

    #[test]
    fn dedup_all_zero_scores_keep_the_first_document() {
        let docs = vec![
            doc("タイトルのみ", "https://x/a.pdf", IrCategory::News, None),
            doc("タイトルのみ", "https://x/a.pdf", IrCategory::Earnings, None),
        ];
        let deduped = deduplicate_by_url(docs);
        assert_eq!(deduped.len(), 1);
        // No keyword family matches, so the highest score is the zero in first
        // position (disclosures); with no disclosures entry in the group, the
        // first document wins.
        assert_eq!(deduped[0].category, IrCategory::News);
    }

    #[test]
    fn dedup_preserves_first_seen_order() {
        let docs = vec![
            doc("b", "https://x/b.pdf", IrCategory::News, None),
            doc("a", "https://x/a.pdf", IrCategory::News, None),
            doc("b again", "https://x/b.pdf", IrCategory::Earnings, None),
        ];
        let deduped = deduplicate_by_url(docs);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].url, "https://x/b.pdf");
        assert_eq!(deduped[1].url, "https://x/a.pdf");
    }

    #[test]
    fn reclassification_uses_strict_precedence() {
        // 業績予想の修正 contains both an earnings keyword (業績) and a
        // disclosure keyword (修正); disclosures wins.
        assert_eq!(category_for_title("業績予想の修正に関するお知らせ"), IrCategory::Disclosures);
        assert_eq!(category_for_title("2025年3月期 第1四半期決算短信"), IrCategory::Earnings);
        assert_eq!(category_for_title("新製品「X100」を発売"), IrCategory::News);
        assert_eq!(category_for_title("その他のお知らせ"), IrCategory::Disclosures);
    }

    #[test]
    fn reclassify_replaces_in_place_keeping_order() {
        let docs = vec![
            doc("自己株式の取得状況", "https://x/a.pdf", IrCategory::News, None),
            doc("月次売上レポート", "https://x/b.pdf", IrCategory::Disclosures, None),
        ];
        let reclassified = reclassify_by_title(docs);
        assert_eq!(reclassified[0].category, IrCategory::Disclosures);
        assert_eq!(reclassified[1].category, IrCategory::Earnings);
        assert_eq!(reclassified[0].url, "https://x/a.pdf");
    }

    #[test]
    fn folder_name_uses_second_level_label() {
        assert_eq!(folder_name_from_url("https://www.example.co.jp/ir/"), "example");
        assert_eq!(folder_name_from_url("https://global.toyota/jp/ir/"), "global");
        assert_eq!(folder_name_from_url("not a url"), "unknown");
    }

    #[test]
    fn summary_truncation_appends_marker() {
        let long = "あ".repeat(SUMMARY_CONTENT_CAP + 10);
        let truncated = truncate_for_summary(&long);
        assert!(truncated.ends_with("[以下省略...]"));
        assert!(truncated.chars().count() < long.chars().count() + 20);

        let short = "短い本文";
        assert_eq!(truncate_for_summary(short), short);
    }

    #[test]
    fn main_content_prefers_article() {
        let html = r#"<html><body>
            <nav>メニュー</nav>
            <article><p>本文はこちらにあります。</p></article>
            <footer>フッター</footer>
        </body></html>"#;
        let content = extract_main_content(html);
        assert!(content.contains("本文はこちらにあります。"));
        assert!(!content.contains("メニュー"));
    }
}
