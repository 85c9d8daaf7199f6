//! The extractor: strategy dispatch, native parsing, and the auto fallback chain.

use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use pdfium_render::prelude::*;

use super::ocr::{OcrModelPaths, OcrRunner};
use super::vision;
use super::{has_meaningful_content, resolve_page_range, ParseStrategy, ParsedPdfContent};
use crate::error::{AgentError, Result};
use crate::llm::LlmProvider;

/// Render scale for OCR and vision: 300 DPI over the PDF's native 72 points/inch.
const RENDER_SCALE: f32 = 300.0 / 72.0;

/// Maximum number of TOC lines collected by [`PdfExtractor::info`].
const TOC_LIMIT: usize = 30;

/// PDF metadata returned by [`PdfExtractor::info`].
#[derive(Debug, Clone)]
pub struct PdfInfo {
    pub file_name: String,
    pub file_path: String,
    pub total_pages: usize,
    /// Width and height of the first page, in points.
    pub page_size: Option<(f32, f32)>,
    pub metadata: Vec<(String, String)>,
    /// Heuristically detected table-of-contents lines from the first pages.
    pub table_of_contents: Vec<String>,
}

/// Converts PDFs on disk to markdown text.
///
/// Strategies form an explicit chain; `Auto` tries native structured extraction,
/// then OCR, then (when a vision provider is configured) the vision LLM, accepting
/// the first result whose trimmed length exceeds 100 characters.
///
/// # Example
///
/// ```no_run
/// # use kaijikit::{PdfExtractor, ParseStrategy};
/// # async fn example() -> Result<(), kaijikit::AgentError> {
/// let extractor = PdfExtractor::new();
/// let result = extractor
///     .to_markdown("downloads/S100ABCD.pdf".as_ref(), None, None, ParseStrategy::Auto)
///     .await?;
/// println!("{} pages via {}", result.pages, result.strategy_used);
/// # Ok(())
/// # }
/// ```
pub struct PdfExtractor {
    vision_provider: Option<Arc<dyn LlmProvider>>,
    ocr_models: OcrModelPaths,
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfExtractor {
    /// Creates an extractor without a vision fallback.
    pub fn new() -> Self {
        Self {
            vision_provider: None,
            ocr_models: OcrModelPaths::default(),
        }
    }

    /// Enables the vision-LLM strategy (and the last step of the auto chain).
    pub fn with_vision_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.vision_provider = Some(provider);
        self
    }

    /// Overrides the OCR model locations.
    pub fn with_ocr_models(mut self, models: OcrModelPaths) -> Self {
        self.ocr_models = models;
        self
    }

    fn require_exists(pdf_path: &Path) -> Result<()> {
        if !pdf_path.exists() {
            return Err(AgentError::FileNotFound(pdf_path.to_path_buf()));
        }
        Ok(())
    }

    fn bind_pdfium() -> Result<Pdfium> {
        let bindings = Pdfium::bind_to_system_library().map_err(|e| AgentError::Parse {
            message: format!("pdfium library unavailable: {e}"),
            pdf_path: String::new(),
            strategy: None,
        })?;
        Ok(Pdfium::new(bindings))
    }

    fn parse_error(pdf_path: &Path, strategy: ParseStrategy, message: impl Into<String>) -> AgentError {
        AgentError::Parse {
            message: message.into(),
            pdf_path: pdf_path.display().to_string(),
            strategy: Some(strategy.as_str().to_string()),
        }
    }

    /// Reads PDF metadata: page count, first-page size, document info, and a
    /// TOC heuristic over the first five pages.
    pub fn info(&self, pdf_path: &Path) -> Result<PdfInfo> {
        Self::require_exists(pdf_path)?;

        let pdfium = Self::bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Self::parse_error(pdf_path, ParseStrategy::NativeBasic, e.to_string()))?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;

        let page_size = pages
            .first()
            .ok()
            .map(|page| (page.width().value, page.height().value));

        let metadata = document
            .metadata()
            .iter()
            .map(|tag| (format!("{:?}", tag.tag_type()), tag.value().to_string()))
            .collect();

        let mut toc = Vec::new();
        for index in 0..total_pages.min(5) {
            let Ok(page) = pages.get(index as u16) else { continue };
            let Ok(text) = page.text() else { continue };
            for line in text.all().lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if looks_like_toc_line(line) {
                    toc.push(line.to_string());
                    if toc.len() >= TOC_LIMIT {
                        break;
                    }
                }
            }
            if toc.len() >= TOC_LIMIT {
                break;
            }
        }

        Ok(PdfInfo {
            file_name: pdf_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_path: pdf_path
                .canonicalize()
                .unwrap_or_else(|_| pdf_path.to_path_buf())
                .display()
                .to_string(),
            total_pages,
            page_size,
            metadata,
            table_of_contents: toc,
        })
    }

    /// Extracts raw text with `--- Page N ---` markers for the given 1-based
    /// inclusive range.
    pub fn extract_text(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
    ) -> Result<String> {
        Self::require_exists(pdf_path)?;

        let pdfium = Self::bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Self::parse_error(pdf_path, ParseStrategy::NativeBasic, e.to_string()))?;
        let pages = document.pages();
        let (start_idx, end_idx) = resolve_page_range(pages.len() as usize, start_page, end_page)?;

        let mut texts = Vec::new();
        for index in start_idx..end_idx {
            let page = pages
                .get(index as u16)
                .map_err(|e| Self::parse_error(pdf_path, ParseStrategy::NativeBasic, e.to_string()))?;
            let text = page
                .text()
                .map(|t| t.all())
                .unwrap_or_default();
            texts.push(format!("--- Page {} ---\n{text}", index + 1));
        }

        Ok(texts.join("\n\n"))
    }

    /// Converts the PDF to markdown with the requested strategy.
    ///
    /// Page numbers are 1-based and inclusive; `None` means first/last. The result's
    /// `strategy_used` reports the worker that actually produced the text.
    pub async fn to_markdown(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
        strategy: ParseStrategy,
    ) -> Result<ParsedPdfContent> {
        Self::require_exists(pdf_path)?;

        match strategy {
            ParseStrategy::Auto => self.parse_auto(pdf_path, start_page, end_page).await,
            ParseStrategy::NativeBasic => self.parse_basic(pdf_path, start_page, end_page),
            ParseStrategy::NativeStructured => self.parse_structured(pdf_path, start_page, end_page),
            ParseStrategy::Ocr => self.parse_ocr(pdf_path, start_page, end_page),
            ParseStrategy::VisionLlm => self.parse_vision(pdf_path, start_page, end_page).await,
        }
    }

    /// The fallback orchestrator. Tries native structured extraction, then OCR,
    /// each gated on meaningful content, then the vision LLM unconditionally when a
    /// provider is configured. When everything fails the error message reports each
    /// strategy's failure cause, semicolon-joined.
    async fn parse_auto(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
    ) -> Result<ParsedPdfContent> {
        let mut errors: Vec<String> = Vec::new();

        tracing::info!(path = %pdf_path.display(), "auto extraction: trying native-structured");
        match self.parse_structured(pdf_path, start_page, end_page) {
            Ok(result) if has_meaningful_content(&result.text) => return Ok(result),
            Ok(_) => {
                tracing::warn!(path = %pdf_path.display(), "native-structured returned insufficient content");
                errors.push("native-structured: insufficient content".to_string());
            }
            Err(e) => {
                tracing::warn!(path = %pdf_path.display(), error = %e, "native-structured failed");
                errors.push(format!("native-structured: {e}"));
            }
        }

        tracing::info!(path = %pdf_path.display(), "auto extraction: trying ocr");
        match self.parse_ocr(pdf_path, start_page, end_page) {
            Ok(result) if has_meaningful_content(&result.text) => return Ok(result),
            Ok(_) => {
                tracing::warn!(path = %pdf_path.display(), "ocr returned insufficient content");
                errors.push("ocr: insufficient content".to_string());
            }
            Err(e) => {
                tracing::warn!(path = %pdf_path.display(), error = %e, "ocr failed");
                errors.push(format!("ocr: {e}"));
            }
        }

        if self.vision_provider.is_some() {
            tracing::info!(path = %pdf_path.display(), "auto extraction: trying vision-llm");
            match self.parse_vision(pdf_path, start_page, end_page).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!(path = %pdf_path.display(), error = %e, "vision-llm failed");
                    errors.push(format!("vision-llm: {e}"));
                }
            }
        } else {
            errors.push("vision-llm: provider not configured".to_string());
        }

        Err(AgentError::Parse {
            message: format!("All strategies failed: {}", errors.join("; ")),
            pdf_path: pdf_path.display().to_string(),
            strategy: Some(ParseStrategy::Auto.as_str().to_string()),
        })
    }

    /// Plain per-page text under `## Page N` headers.
    fn parse_basic(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
    ) -> Result<ParsedPdfContent> {
        let pdfium = Self::bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Self::parse_error(pdf_path, ParseStrategy::NativeBasic, e.to_string()))?;
        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let (start_idx, end_idx) = resolve_page_range(total_pages, start_page, end_page)?;

        let mut texts = Vec::new();
        for index in start_idx..end_idx {
            let page = pages
                .get(index as u16)
                .map_err(|e| Self::parse_error(pdf_path, ParseStrategy::NativeBasic, e.to_string()))?;
            let text = page.text().map(|t| t.all()).unwrap_or_default();
            texts.push(format!("## Page {}\n\n{text}", index + 1));
        }

        Ok(content(
            texts.join("\n\n"),
            end_idx - start_idx,
            ParseStrategy::NativeBasic,
            total_pages,
            start_idx + 1,
            end_idx,
        ))
    }

    /// Markdown-shaped extraction: headings are inferred from font sizes relative
    /// to the page's body text.
    fn parse_structured(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
    ) -> Result<ParsedPdfContent> {
        let pdfium = Self::bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Self::parse_error(pdf_path, ParseStrategy::NativeStructured, e.to_string()))?;
        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let (start_idx, end_idx) = resolve_page_range(total_pages, start_page, end_page)?;

        let mut texts = Vec::new();
        for index in start_idx..end_idx {
            let page = pages.get(index as u16).map_err(|e| {
                Self::parse_error(pdf_path, ParseStrategy::NativeStructured, e.to_string())
            })?;
            let markdown = structured_page_markdown(&page);
            texts.push(format!("## Page {}\n\n{markdown}", index + 1));
        }

        Ok(content(
            texts.join("\n\n"),
            end_idx - start_idx,
            ParseStrategy::NativeStructured,
            total_pages,
            start_idx + 1,
            end_idx,
        ))
    }

    /// OCR over 300-DPI renders of each page.
    fn parse_ocr(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
    ) -> Result<ParsedPdfContent> {
        let runner = OcrRunner::load(&self.ocr_models)?;
        let path_str = pdf_path.display().to_string();

        let (renders, total_pages, start_idx, end_idx) =
            self.render_pages(pdf_path, start_page, end_page, ParseStrategy::Ocr)?;

        let mut texts = Vec::new();
        for (offset, image) in renders.iter().enumerate() {
            let rgb = image.to_rgb8();
            let text = runner.recognize_page(&rgb, &path_str)?;
            texts.push(format!("## Page {}\n\n{text}", start_idx + offset + 1));
        }

        Ok(content(
            texts.join("\n\n"),
            end_idx - start_idx,
            ParseStrategy::Ocr,
            total_pages,
            start_idx + 1,
            end_idx,
        ))
    }

    /// Vision-LLM extraction: render, then transcribe page by page.
    async fn parse_vision(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
    ) -> Result<ParsedPdfContent> {
        let provider = self.vision_provider.clone().ok_or_else(|| {
            Self::parse_error(
                pdf_path,
                ParseStrategy::VisionLlm,
                "vision provider is required for the vision-llm strategy",
            )
        })?;

        // Render everything up front; the pdfium handle must not be held across
        // await points.
        let (renders, total_pages, start_idx, end_idx) =
            self.render_pages(pdf_path, start_page, end_page, ParseStrategy::VisionLlm)?;

        let mut page_numbers = Vec::new();
        let mut texts = Vec::new();
        for (offset, image) in renders.into_iter().enumerate() {
            let page_number = start_idx + offset + 1;
            let png = encode_png(&image)
                .map_err(|e| Self::parse_error(pdf_path, ParseStrategy::VisionLlm, e))?;
            tracing::debug!(page = page_number, "extracting page via vision LLM");
            let text = vision::extract_page(&provider, &png).await?;
            page_numbers.push(page_number);
            texts.push(text);
        }

        let joined = vision::join_pages(&page_numbers, &texts);
        let mut result = content(
            joined,
            end_idx - start_idx,
            ParseStrategy::VisionLlm,
            total_pages,
            start_idx + 1,
            end_idx,
        );
        result.metadata.insert(
            "model".to_string(),
            serde_json::Value::String(provider.model_name().to_string()),
        );
        Ok(result)
    }

    /// Renders the requested page range at 300 DPI.
    fn render_pages(
        &self,
        pdf_path: &Path,
        start_page: Option<usize>,
        end_page: Option<usize>,
        strategy: ParseStrategy,
    ) -> Result<(Vec<DynamicImage>, usize, usize, usize)> {
        let pdfium = Self::bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Self::parse_error(pdf_path, strategy, e.to_string()))?;
        let pages = document.pages();
        let total_pages = pages.len() as usize;
        let (start_idx, end_idx) = resolve_page_range(total_pages, start_page, end_page)?;

        let config = PdfRenderConfig::new().scale_page_by_factor(RENDER_SCALE);

        let mut renders = Vec::with_capacity(end_idx - start_idx);
        for index in start_idx..end_idx {
            let page = pages
                .get(index as u16)
                .map_err(|e| Self::parse_error(pdf_path, strategy, e.to_string()))?;
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| Self::parse_error(pdf_path, strategy, e.to_string()))?;
            renders.push(bitmap.as_image());
        }

        Ok((renders, total_pages, start_idx, end_idx))
    }
}

/// Groups a page's text by lines and promotes unusually large fonts to headings.
fn structured_page_markdown(page: &PdfPage<'_>) -> String {
    let Ok(text_page) = page.text() else {
        return String::new();
    };

    // Collect (font_size, text) per text segment, in reading order.
    let mut segments: Vec<(f32, String)> = Vec::new();
    for segment in text_page.segments().iter() {
        let content = segment.text();
        let trimmed = content.trim();
        if trimmed.is_empty() {
            continue;
        }
        let size = segment.bounds().height().value;
        segments.push((size, trimmed.to_string()));
    }

    if segments.is_empty() {
        return String::new();
    }

    // Body size = the most common segment height, rounded to a point.
    let mut counts: std::collections::HashMap<i32, usize> = std::collections::HashMap::new();
    for (size, _) in &segments {
        *counts.entry(size.round() as i32).or_default() += 1;
    }
    let body_size = counts
        .into_iter()
        .max_by_key(|&(_, count)| count)
        .map(|(size, _)| size as f32)
        .unwrap_or(12.0);

    segments
        .into_iter()
        .map(|(size, text)| {
            if size >= body_size * 1.6 {
                format!("# {text}")
            } else if size >= body_size * 1.25 {
                format!("### {text}")
            } else {
                text
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn looks_like_toc_line(line: &str) -> bool {
    let is_numbered = (1..20).any(|n| line.starts_with(&format!("{n}.")));
    let has_dot_leaders = line.contains(".....");
    let has_trailing_page_num = line.len() > 5
        && line.chars().last().is_some_and(|c| c.is_ascii_digit())
        && line.contains(' ');
    is_numbered || has_dot_leaders || has_trailing_page_num
}

fn content(
    text: String,
    pages: usize,
    strategy: ParseStrategy,
    total_pages: usize,
    start_page: usize,
    end_page: usize,
) -> ParsedPdfContent {
    let mut metadata = serde_json::Map::new();
    metadata.insert("total_pages".to_string(), total_pages.into());
    metadata.insert("start_page".to_string(), start_page.into());
    metadata.insert("end_page".to_string(), end_page.into());
    ParsedPdfContent {
        text,
        pages,
        strategy_used: strategy,
        metadata,
    }
}

fn encode_png(image: &DynamicImage) -> std::result::Result<Vec<u8>, String> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .map_err(|e| format!("failed to encode page image: {e}"))?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toc_heuristics() {
        assert!(looks_like_toc_line("1. 企業の概況"));
        assert!(looks_like_toc_line("第2章 事業の状況 ..... 12"));
        assert!(looks_like_toc_line("事業等のリスク 34"));
        assert!(!looks_like_toc_line("通常の本文です"));
        assert!(!looks_like_toc_line("短い 1"));
    }

    #[test]
    fn missing_file_is_a_typed_error() {
        let extractor = PdfExtractor::new();
        let err = extractor.extract_text("/no/such/file.pdf".as_ref(), None, None).unwrap_err();
        assert!(matches!(err, AgentError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn missing_file_checked_before_strategy_dispatch() {
        let extractor = PdfExtractor::new();
        let err = extractor
            .to_markdown("/no/such/file.pdf".as_ref(), None, None, ParseStrategy::Auto)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::FileNotFound(_)));
    }
}
