//! PDF → markdown extraction with a strategy-fallback chain.
//!
//! Corporate disclosure PDFs range from clean digital documents to scanned images of
//! paper filings. No single extractor handles all of them, so extraction is an
//! explicit strategy enum with an `auto` orchestrator that tries the cheap parsers
//! first and escalates — native structured extraction, then OCR, then a
//! vision-capable LLM — accepting the first result that clears a quality gate.

mod extractor;
mod ocr;
mod vision;

pub use extractor::{PdfExtractor, PdfInfo};
pub use ocr::OcrModelPaths;

use serde::{Deserialize, Serialize};

/// Extraction strategies, from cheapest to most expensive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseStrategy {
    /// Try strategies in order, gated on meaningful content.
    Auto,
    /// Plain text per page with page markers.
    NativeBasic,
    /// Markdown preserving headings, inferred from font metrics.
    NativeStructured,
    /// OCR over rendered pages, for scanned documents.
    Ocr,
    /// Render each page at 300 DPI and ask a vision LLM to transcribe it.
    VisionLlm,
}

impl ParseStrategy {
    /// Stable name used in errors and metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            ParseStrategy::Auto => "auto",
            ParseStrategy::NativeBasic => "native-basic",
            ParseStrategy::NativeStructured => "native-structured",
            ParseStrategy::Ocr => "ocr",
            ParseStrategy::VisionLlm => "vision-llm",
        }
    }
}

impl std::fmt::Display for ParseStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of a successful extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedPdfContent {
    /// Extracted text or markdown.
    pub text: String,

    /// Number of pages actually processed.
    pub pages: usize,

    /// The strategy that produced the text (never `Auto`).
    pub strategy_used: ParseStrategy,

    /// Strategy-specific details (total pages, page range, model, ...).
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Quality gate for the auto chain: image-only PDFs "succeed" with an empty string
/// or a lone footer page number, which this rejects.
pub(crate) fn has_meaningful_content(text: &str) -> bool {
    text.trim().chars().count() > 100
}

/// Normalizes a 1-based inclusive page range against the document length.
///
/// Returns 0-based `(start_idx, end_idx_exclusive)`.
pub(crate) fn resolve_page_range(
    total_pages: usize,
    start_page: Option<usize>,
    end_page: Option<usize>,
) -> crate::error::Result<(usize, usize)> {
    let start = start_page.unwrap_or(1);
    if start < 1 {
        return Err(crate::error::AgentError::InvalidPageRange(format!(
            "start_page must be >= 1, got {start}"
        )));
    }
    if start > total_pages && total_pages > 0 {
        return Err(crate::error::AgentError::InvalidPageRange(format!(
            "start_page ({start}) exceeds total pages ({total_pages})"
        )));
    }
    if let Some(end) = end_page {
        if end < start {
            return Err(crate::error::AgentError::InvalidPageRange(format!(
                "end_page ({end}) must be >= start_page ({start})"
            )));
        }
    }

    let end = end_page.unwrap_or(total_pages).min(total_pages);
    Ok((start - 1, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_rejects_short_content() {
        assert!(!has_meaningful_content(""));
        assert!(!has_meaningful_content("   \n\n  "));
        assert!(!has_meaningful_content("Page 1 header\n\n\n\n\n"));
        assert!(has_meaningful_content(&"lorem ".repeat(40)));
    }

    #[test]
    fn gate_counts_characters_not_bytes() {
        // 101 multibyte characters must pass even though a byte count would lie.
        let japanese = "あ".repeat(101);
        assert!(has_meaningful_content(&japanese));
        assert!(!has_meaningful_content(&"あ".repeat(100)));
    }

    #[test]
    fn page_range_defaults_and_bounds() {
        assert_eq!(resolve_page_range(10, None, None).unwrap(), (0, 10));
        assert_eq!(resolve_page_range(10, Some(3), Some(5)).unwrap(), (2, 5));
        assert_eq!(resolve_page_range(10, Some(8), Some(99)).unwrap(), (7, 10));
        assert!(resolve_page_range(10, Some(0), None).is_err());
        assert!(resolve_page_range(10, Some(11), None).is_err());
        assert!(resolve_page_range(10, Some(5), Some(4)).is_err());
    }

    #[test]
    fn strategy_names_are_stable() {
        assert_eq!(ParseStrategy::NativeStructured.as_str(), "native-structured");
        assert_eq!(ParseStrategy::VisionLlm.to_string(), "vision-llm");
    }
}
