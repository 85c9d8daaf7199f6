//! Investor-relations documents: types, templates, and the scraping pipeline.
//!
//! IR documents are voluntary disclosures hosted on company websites, distinct from
//! regulatory filings. Every document is classified into one of three categories —
//! earnings, news, or disclosures — whether it was found through a per-company YAML
//! template or by the LLM explorer.

mod explorer;
mod service;
mod template;

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use explorer::LlmExplorer;
pub use service::IrService;
pub use template::{CustomScraper, TemplateEngine};

/// The closed category set for IR documents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum IrCategory {
    /// Earnings briefings, quarterly results, monthly sales reports.
    Earnings,
    /// Business press releases: product launches, large orders, awards.
    News,
    /// Timely-disclosure items: forecast revisions, buybacks, M&A, personnel.
    Disclosures,
}

impl IrCategory {
    pub const ALL: [IrCategory; 3] = [IrCategory::Earnings, IrCategory::News, IrCategory::Disclosures];

    pub fn as_str(self) -> &'static str {
        match self {
            IrCategory::Earnings => "earnings",
            IrCategory::News => "news",
            IrCategory::Disclosures => "disclosures",
        }
    }

    /// Japanese display name used in summarization prompts.
    pub fn display_name_ja(self) -> &'static str {
        match self {
            IrCategory::Earnings => "決算関連",
            IrCategory::News => "事業ニュース",
            IrCategory::Disclosures => "適時開示",
        }
    }
}

impl std::fmt::Display for IrCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction label on a summary impact point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLabel {
    Bullish,
    Bearish,
    Warning,
}

/// One labeled takeaway from a document summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImpactPoint {
    pub label: ImpactLabel,
    pub content: String,
}

/// LLM-generated summary of an IR document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IrSummary {
    /// Short overview prose.
    pub overview: String,
    /// Labeled points an investor would care about.
    pub impact_points: Vec<ImpactPoint>,
}

/// A scraped IR artifact.
///
/// Invariant: `is_skipped` is only true when `file_path` points at a file that
/// already existed in the cache before this run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrDocument {
    pub title: String,

    /// Absolute URL after resolution.
    pub url: String,

    pub category: IrCategory,

    pub published_date: Option<NaiveDate>,

    /// Local path once downloaded (or found cached).
    pub file_path: Option<PathBuf>,

    pub summary: Option<IrSummary>,

    /// True when the file was already cached and no download was attempted.
    pub is_skipped: bool,
}

impl IrDocument {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        category: IrCategory,
        published_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            category,
            published_date,
            file_path: None,
            summary: None,
            is_skipped: false,
        }
    }
}

/// Company identity block of an IR template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCompany {
    /// 5-digit securities code; must match the template filename prefix.
    pub sec_code: String,
    pub name: String,
    #[serde(default)]
    pub edinet_code: Option<String>,
}

/// One category section of an IR template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSection {
    /// Section URL, resolved against `base_url`.
    pub url: String,

    /// CSS selector collecting candidate elements.
    pub selector: String,

    /// Optional regex filter applied to candidate hrefs.
    #[serde(default)]
    pub link_pattern: Option<String>,

    /// Optional sub-selector for the publish date element.
    #[serde(default)]
    pub date_selector: Option<String>,

    /// chrono format string for the date text (e.g. `%Y.%m.%d`).
    #[serde(default)]
    pub date_format: Option<String>,
}

/// IR-page block of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateIrPage {
    pub base_url: String,
    pub sections: BTreeMap<IrCategory, TemplateSection>,
}

/// A per-company IR template, loaded from `<sec_code>_<name>.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrTemplate {
    pub company: TemplateCompany,
    pub ir_page: TemplateIrPage,

    /// Name of a registered [`CustomScraper`] that replaces selector scraping.
    #[serde(default)]
    pub custom_class: Option<String>,
}
