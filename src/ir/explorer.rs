//! LLM-driven IR page exploration.
//!
//! Used when no template exists or a template yields nothing. The page is first
//! compacted into a markdown-ish representation that keeps link targets intact
//! while cutting token usage by an order of magnitude versus raw HTML, then a
//! structured LLM call classifies the links into the category taxonomy.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use schemars::JsonSchema;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

use super::{IrCategory, IrDocument};
use crate::error::Result;
use crate::llm::{invoke_structured, LlmProvider};
use crate::scrape::{resolve_url, PageFetcher};

/// Hard cap on the compacted page content sent to the model.
const CONTENT_CAP: usize = 15_000;

/// Ancestor tags whose content is boilerplate, not document links.
const STRIP_TAGS: [&str; 6] = ["script", "style", "nav", "footer", "header", "noscript"];

/// Minimum length for free text fragments; shorter ones are chrome.
const MIN_TEXT_LEN: usize = 10;

/// One link the model extracted.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractedLink {
    pub title: String,
    pub url: String,
    pub category: IrCategory,
    /// `YYYY-MM-DD`, or empty when the page shows no date.
    pub published_date: String,
    /// Model confidence, 0..1.
    pub confidence: f64,
}

/// Structured response schema for link extraction.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExtractedLinksResponse {
    pub links: Vec<ExtractedLink>,
}

/// Explores IR pages with an LLM when no declarative template applies.
pub struct LlmExplorer {
    provider: Arc<dyn LlmProvider>,
    max_links: usize,
}

impl LlmExplorer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_links: 10,
        }
    }

    pub fn with_max_links(mut self, max_links: usize) -> Self {
        self.max_links = max_links;
        self
    }

    /// Fetches a page and extracts IR document links from it.
    ///
    /// Failures (page access, LLM errors, unparsable output) are logged and yield
    /// an empty list — exploration is always a best-effort fallback.
    pub async fn explore_ir_page(
        &self,
        fetcher: &dyn PageFetcher,
        url: &str,
    ) -> Vec<IrDocument> {
        match self.try_explore(fetcher, url).await {
            Ok(documents) => {
                tracing::info!(url, count = documents.len(), "extracted IR documents");
                documents
            }
            Err(e) => {
                tracing::error!(url, error = %e, "failed to explore IR page");
                Vec::new()
            }
        }
    }

    async fn try_explore(&self, fetcher: &dyn PageFetcher, url: &str) -> Result<Vec<IrDocument>> {
        let html = fetcher.fetch_page(url).await?;
        let compact = compact_markdown(&html);

        let base_url = url::Url::parse(url)
            .map(|u| format!("{}://{}", u.scheme(), u.host_str().unwrap_or_default()))
            .unwrap_or_else(|_| url.to_string());

        let prompt = build_prompt(self.max_links, url, &base_url, &compact);
        let response: ExtractedLinksResponse =
            invoke_structured(self.provider.as_ref(), &prompt).await?;

        let documents = response
            .links
            .into_iter()
            .filter_map(|link| {
                let absolute = resolve_url(url, &link.url).ok()?;
                let published_date = (!link.published_date.is_empty())
                    .then(|| NaiveDate::parse_from_str(&link.published_date, "%Y-%m-%d").ok())
                    .flatten();
                Some(IrDocument::new(link.title, absolute, link.category, published_date))
            })
            .collect();

        Ok(documents)
    }

    /// Finds a company's IR page from its homepage.
    ///
    /// Walks the anchors looking for the usual URL patterns (`/ir`, `/investor`,
    /// ...) or link-text keywords, returning the first absolute match.
    pub async fn find_ir_page_url(
        &self,
        fetcher: &dyn PageFetcher,
        company_url: &str,
    ) -> Option<String> {
        let html = match fetcher.fetch_page(company_url).await {
            Ok(html) => html,
            Err(e) => {
                tracing::error!(company_url, error = %e, "failed to fetch company homepage");
                return None;
            }
        };
        find_ir_link(&html, company_url)
    }
}

/// Compacts HTML into the link-preserving representation fed to the model.
///
/// Walks `a`, `p`, `h1`–`h4`, `li`, `td`, and `div` elements in document order,
/// emitting markdown links (with a `[PDF]` marker), `#`-prefixed headings, and
/// free text over ten characters; fragments are deduplicated preserving order and
/// the result is capped at 15,000 characters.
pub(crate) fn compact_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let selector = Selector::parse("a, p, h1, h2, h3, h4, li, td, div").expect("static selector");

    let mut parts: Vec<String> = Vec::new();
    for element in document.select(&selector) {
        if has_stripped_ancestor(element) {
            continue;
        }

        let name = element.value().name();
        match name {
            "a" => {
                let Some(href) = element.value().attr("href") else { continue };
                let text = element_text(element);
                if href.is_empty() || text.is_empty() {
                    continue;
                }
                if href.to_lowercase().ends_with(".pdf") {
                    parts.push(format!("[PDF] [{text}]({href})"));
                } else {
                    parts.push(format!("[{text}]({href})"));
                }
            }
            "h1" | "h2" | "h3" | "h4" => {
                let text = element_text(element);
                if !text.is_empty() {
                    let level = name[1..].parse::<usize>().unwrap_or(1);
                    parts.push(format!("{} {text}", "#".repeat(level)));
                }
            }
            _ => {
                let text = element_text(element);
                if text.chars().count() > MIN_TEXT_LEN {
                    parts.push(text);
                }
            }
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut unique: Vec<&str> = Vec::new();
    for part in &parts {
        if seen.insert(part.as_str()) {
            unique.push(part.as_str());
        }
    }

    let joined = unique.join("\n\n");
    truncate_chars(&joined, CONTENT_CAP)
}

fn truncate_chars(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    text.chars().take(cap).collect()
}

fn has_stripped_ancestor(element: ElementRef<'_>) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| STRIP_TAGS.contains(&ancestor.value().name()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// IR link discovery over a homepage's anchors.
pub(crate) fn find_ir_link(html: &str, base_url: &str) -> Option<String> {
    let patterns = [
        regex::Regex::new(r"/ir/?").expect("static pattern"),
        regex::Regex::new(r"/investor/?").expect("static pattern"),
        regex::Regex::new(r"/investors/?").expect("static pattern"),
        regex::Regex::new(r"/stockholders/?").expect("static pattern"),
        regex::Regex::new(r"investor[-_]?relations").expect("static pattern"),
    ];
    let keywords = ["ir", "投資家", "株主", "investor"];

    let document = Html::parse_document(html);
    let selector = Selector::parse("a[href]").expect("static selector");

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else { continue };
        let href_lower = href.to_lowercase();
        let text = element_text(element).to_lowercase();

        if patterns.iter().any(|p| p.is_match(&href_lower))
            || keywords.iter().any(|kw| text.contains(kw))
        {
            if let Ok(absolute) = resolve_url(base_url, href) {
                return Some(absolute);
            }
        }
    }

    None
}

fn build_prompt(max_links: usize, page_url: &str, base_url: &str, content: &str) -> String {
    format!(
        "あなたは企業のIRページを解析する専門家です。\n\
以下のウェブページから、IR資料やIRニュースへのリンクを抽出し、正確に分類してください。\n\
\n\
## カテゴリ定義（重要：正確に分類すること）\n\
\n\
### 1. 決算関連 (earnings)\n\
**定義**: 会社の業績・財務状況を報告する資料\n\
**該当するもの**: 決算短信（四半期・通期）、決算説明会資料、有価証券報告書、四半期報告書、月次売上レポート、業績ハイライト、ファクトシート\n\
**キーワード例**: 決算、業績、売上、利益、財務、quarterly、annual、financial results\n\
\n\
### 2. 適時開示 (disclosures)\n\
**定義**: 証券取引所への開示義務がある重要情報\n\
**該当するもの**: 業績予想の修正、配当予想の修正、自己株式の取得・処分、M&A・資本業務提携、役員の異動、株式分割・増資・減資、訴訟、行政処分\n\
**キーワード例**: 修正、お知らせ、自己株式、取得、異動、提携、公開買付け、notice\n\
\n\
### 3. 事業ニュース (news)\n\
**定義**: 事業活動に関するプレスリリース・ニュース\n\
**該当するもの**: 新製品・新サービスの発表、大型受注、新規事業参入、技術開発・特許、受賞・認定\n\
**キーワード例**: 発表、リリース、開始、発売、受注、release、launch\n\
\n\
## 分類の優先ルール\n\
- 「業績予想修正」「配当予想修正」→ disclosures（earningsではない）\n\
- 「自己株式取得」「公開買付け」→ disclosures（newsではない）\n\
- 「月次レポート」「月次売上」→ earnings\n\
- 迷った場合は最も適切と思われるカテゴリ1つのみに分類\n\
\n\
## 抽出ルール\n\
- 最新のニュースを優先して抽出すること（日付が新しいものを優先）\n\
- PDFファイル（.pdf拡張子）へのリンクを優先\n\
- PDFがない場合はIRニュースページ（HTML）へのリンクも抽出可\n\
- 同じ資料を複数カテゴリに重複して抽出しないこと\n\
- 最大{max_links}件まで\n\
- 公開日が分かる場合はYYYY-MM-DD形式で記載（不明な場合は空文字列）\n\
\n\
## ページ情報\n\
- URL: {page_url}\n\
- ベースURL: {base_url}\n\
\n\
## ページコンテンツ\n\
```\n\
{content}\n\
```\n\
\n\
上記から、IR資料・IRニュースのリンク情報を抽出してください。"
    )
}
