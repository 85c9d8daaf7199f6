//! Declarative template engine for IR pages.
//!
//! A YAML template per company describes where each category section lives and
//! which CSS selector yields its document links. The engine does no downloading —
//! it returns [`IrDocument`]s with resolved URLs and leaves fetching to the
//! pipeline service.
//!
//! For sites a selector cannot express, a template may name a custom scraper. The
//! registry is explicit and closed: templates referencing an unregistered name fail
//! validation instead of silently falling back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};

use super::{IrCategory, IrDocument, IrTemplate, TemplateSection};
use crate::error::{AgentError, Result};
use crate::scrape::{resolve_url, PageFetcher};

/// Replacement scraping logic for one company.
///
/// Implementations must satisfy the same contract as selector scraping: return the
/// documents (no downloading), resolved to absolute URLs.
#[async_trait::async_trait]
pub trait CustomScraper: Send + Sync {
    async fn scrape(
        &self,
        fetcher: &dyn PageFetcher,
        template: &IrTemplate,
        category: Option<IrCategory>,
    ) -> Result<Vec<IrDocument>>;
}

/// Loads templates and extracts documents with their selectors.
pub struct TemplateEngine {
    templates_dir: PathBuf,
    cache: Mutex<HashMap<String, Arc<IrTemplate>>>,
    custom_scrapers: HashMap<String, Arc<dyn CustomScraper>>,
}

impl TemplateEngine {
    pub fn new(templates_dir: PathBuf) -> Self {
        Self {
            templates_dir,
            cache: Mutex::new(HashMap::new()),
            custom_scrapers: HashMap::new(),
        }
    }

    /// Registers the custom scrapers templates may reference by name.
    pub fn with_custom_scrapers(
        mut self,
        scrapers: HashMap<String, Arc<dyn CustomScraper>>,
    ) -> Self {
        self.custom_scrapers = scrapers;
        self
    }

    /// Loads (and caches) the template for a securities code.
    ///
    /// The file is located by the `<sec_code>_*.yaml` pattern; the first match in
    /// name order wins. Returns `Ok(None)` when no template exists.
    ///
    /// # Errors
    ///
    /// Fails closed when the template names a `custom_class` that is not in the
    /// registry, or when the YAML does not parse.
    pub fn load_template(&self, sec_code: &str) -> Result<Option<Arc<IrTemplate>>> {
        if let Some(cached) = self.cache.lock().expect("template cache poisoned").get(sec_code) {
            return Ok(Some(cached.clone()));
        }

        let Some(path) = self.find_template_file(sec_code) else {
            tracing::debug!(sec_code, "no IR template found");
            return Ok(None);
        };

        let raw = std::fs::read_to_string(&path)?;
        let template: IrTemplate = serde_yaml::from_str(&raw)?;

        if let Some(custom_class) = &template.custom_class {
            if !self.custom_scrapers.contains_key(custom_class) {
                return Err(AgentError::TemplateNotFound {
                    message: format!(
                        "template {} names unregistered custom scraper '{custom_class}'",
                        path.display()
                    ),
                    sec_code: sec_code.to_string(),
                });
            }
        }

        tracing::debug!(sec_code, path = %path.display(), "loaded IR template");
        let template = Arc::new(template);
        self.cache
            .lock()
            .expect("template cache poisoned")
            .insert(sec_code.to_string(), template.clone());
        Ok(Some(template))
    }

    fn find_template_file(&self, sec_code: &str) -> Option<PathBuf> {
        let prefix = format!("{sec_code}_");
        let mut matches: Vec<PathBuf> = std::fs::read_dir(&self.templates_dir)
            .ok()?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|e| e == "yaml")
                    && path
                        .file_stem()
                        .is_some_and(|stem| stem.to_string_lossy().starts_with(&prefix))
            })
            .collect();
        matches.sort();
        matches.into_iter().next()
    }

    /// Lists the securities codes of every registered template.
    ///
    /// Only files whose stem starts with exactly five digits count.
    pub fn list_templates(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.templates_dir) else {
            return Vec::new();
        };

        let mut codes: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|e| e == "yaml"))
            .filter_map(|path| {
                let stem = path.file_stem()?.to_string_lossy().into_owned();
                let code = stem.split('_').next()?;
                (code.len() == 5 && code.chars().all(|c| c.is_ascii_digit()))
                    .then(|| code.to_string())
            })
            .collect();
        codes.sort();
        codes.dedup();
        codes
    }

    /// Scrapes the template's sections (or one category of them).
    ///
    /// Section failures are logged and skipped so one broken selector never hides
    /// the others. When the template names a custom scraper, the whole job is
    /// delegated to it.
    pub async fn scrape(
        &self,
        fetcher: &dyn PageFetcher,
        template: &IrTemplate,
        category: Option<IrCategory>,
    ) -> Result<Vec<IrDocument>> {
        if let Some(custom_class) = &template.custom_class {
            let scraper = self.custom_scrapers.get(custom_class).ok_or_else(|| {
                AgentError::TemplateNotFound {
                    message: format!("custom scraper '{custom_class}' is not registered"),
                    sec_code: template.company.sec_code.clone(),
                }
            })?;
            return scraper.scrape(fetcher, template, category).await;
        }

        let mut documents = Vec::new();

        for (&section_category, section) in &template.ir_page.sections {
            if category.is_some_and(|wanted| wanted != section_category) {
                continue;
            }

            let section_url = resolve_url(&template.ir_page.base_url, &section.url)?;
            match fetcher.fetch_page(&section_url).await {
                Ok(html) => {
                    let extracted =
                        extract_documents(&html, &section_url, section_category, section);
                    tracing::debug!(
                        category = %section_category,
                        url = section_url,
                        count = extracted.len(),
                        "scraped template section"
                    );
                    documents.extend(extracted);
                }
                Err(e) => {
                    tracing::error!(
                        category = %section_category,
                        url = section_url,
                        error = %e,
                        "failed to scrape template section"
                    );
                }
            }
        }

        Ok(documents)
    }
}

/// Pulls documents out of one section's HTML. Synchronous on purpose: the parsed
/// DOM is not `Send` and must not live across await points.
fn extract_documents(
    html: &str,
    section_url: &str,
    category: IrCategory,
    section: &TemplateSection,
) -> Vec<IrDocument> {
    let Ok(selector) = Selector::parse(&section.selector) else {
        tracing::error!(selector = section.selector, "invalid CSS selector in template");
        return Vec::new();
    };
    let link_pattern = section
        .link_pattern
        .as_deref()
        .and_then(|pattern| regex::Regex::new(pattern).ok());

    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|element| {
            extract_one(element, section_url, category, link_pattern.as_ref(), section)
        })
        .collect()
}

fn extract_one(
    element: ElementRef<'_>,
    section_url: &str,
    category: IrCategory,
    link_pattern: Option<&regex::Regex>,
    section: &TemplateSection,
) -> Option<IrDocument> {
    // The element itself may be the anchor; otherwise take the first nested one.
    let anchor_selector = Selector::parse("a").expect("static selector");
    let (href, anchor_text) = if element.value().name() == "a" {
        (element.value().attr("href")?, element_text(element))
    } else {
        let anchor = element.select(&anchor_selector).next()?;
        (anchor.value().attr("href")?, element_text(element))
    };

    if let Some(pattern) = link_pattern {
        if !pattern.is_match(href) {
            return None;
        }
    }

    // Template scraping is strictly for PDF artifacts.
    if !href.to_lowercase().ends_with(".pdf") {
        return None;
    }

    let url = resolve_url(section_url, href).ok()?;

    let title = if anchor_text.is_empty() {
        Path::new(href)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| href.to_string())
    } else {
        anchor_text
    };

    let published_date = parse_section_date(element, section);

    Some(IrDocument::new(title, url, category, published_date))
}

fn parse_section_date(element: ElementRef<'_>, section: &TemplateSection) -> Option<NaiveDate> {
    let date_selector = section.date_selector.as_deref()?;
    let date_format = section.date_format.as_deref()?;
    let selector = Selector::parse(date_selector).ok()?;
    let date_text = element_text(element.select(&selector).next()?);
    NaiveDate::parse_from_str(date_text.trim(), date_format).ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(selector: &str) -> TemplateSection {
        TemplateSection {
            url: "library/".into(),
            selector: selector.into(),
            link_pattern: None,
            date_selector: None,
            date_format: None,
        }
    }

    #[test]
    fn extracts_pdf_links_with_titles() {
        let html = r#"<div class="ir-list">
            <a href="q1.pdf">Q1 briefing</a>
            <a href="notes.html">not a pdf</a>
        </div>"#;
        let docs = extract_documents(
            html,
            "https://example.com/ir/library/",
            IrCategory::Earnings,
            &section("div.ir-list a"),
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Q1 briefing");
        assert_eq!(docs[0].url, "https://example.com/ir/library/q1.pdf");
        assert_eq!(docs[0].category, IrCategory::Earnings);
    }

    #[test]
    fn nested_anchor_and_date_selector() {
        let html = r#"<ul>
          <li class="row"><span class="date">2025.06.20</span><a href="/docs/q1.pdf">第1四半期決算</a></li>
        </ul>"#;
        let mut s = section("li.row");
        s.date_selector = Some("span.date".into());
        s.date_format = Some("%Y.%m.%d".into());

        let docs = extract_documents(html, "https://example.com/ir/", IrCategory::Earnings, &s);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].url, "https://example.com/docs/q1.pdf");
        assert_eq!(
            docs[0].published_date,
            NaiveDate::from_ymd_opt(2025, 6, 20)
        );
    }

    #[test]
    fn link_pattern_filters_candidates() {
        let html = r#"<div><a href="ir_q1.pdf">Q1</a><a href="recruit.pdf">採用情報</a></div>"#;
        let mut s = section("div a");
        s.link_pattern = Some("^ir_".into());

        let docs = extract_documents(html, "https://example.com/", IrCategory::Earnings, &s);
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Q1");
    }

    #[test]
    fn filename_fallback_for_empty_anchor_text() {
        let html = r#"<div><a href="fy2025_results.pdf"><img src="icon.png"></a></div>"#;
        let docs = extract_documents(html, "https://example.com/", IrCategory::Earnings, &section("div a"));
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "fy2025_results");
    }

    #[test]
    fn template_listing_requires_five_digit_prefix() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["72030_toyota.yaml", "67580_sony.yaml", "readme_notes.yaml", "123_x.yaml"] {
            std::fs::write(dir.path().join(name), "company:\n  sec_code: \"x\"\n  name: x\nir_page:\n  base_url: x\n  sections: {}\n").unwrap();
        }
        let engine = TemplateEngine::new(dir.path().to_path_buf());
        assert_eq!(engine.list_templates(), vec!["67580", "72030"]);
    }

    #[test]
    fn unregistered_custom_class_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("72030_toyota.yaml"),
            "company:\n  sec_code: \"72030\"\n  name: トヨタ\nir_page:\n  base_url: https://example.com\n  sections: {}\ncustom_class: toyota_scraper\n",
        )
        .unwrap();
        let engine = TemplateEngine::new(dir.path().to_path_buf());
        assert!(matches!(
            engine.load_template("72030"),
            Err(AgentError::TemplateNotFound { .. })
        ));
    }
}
