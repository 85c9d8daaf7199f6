//! Error types for the kaijikit library.
//!
//! All fallible operations in kaijikit return `Result<T, AgentError>` where `AgentError`
//! is a single enum covering the various failure modes: EDINET API errors (with the
//! portal's dual-layer status codes), scraping failures, PDF parsing failures across
//! the strategy chain, and LLM provider errors.
//!
//! Errors carry the context needed to act on them — HTTP/internal status codes, the
//! endpoint or URL involved, and for PDF parsing the strategy that was running. The
//! error types use `thiserror` for clean `Display` implementations and proper `Error`
//! trait support.

use std::path::PathBuf;
use thiserror::Error;

/// Comprehensive error type for all kaijikit operations.
///
/// The first four variants form the EDINET API taxonomy. The portal reports failures
/// both through HTTP status codes and through an internal status embedded in otherwise
/// successful (HTTP 200) JSON bodies; both layers are normalized into these variants,
/// so callers never need to care which layer produced the error.
///
/// Only [`AgentError::Server`] is retryable — authentication and not-found conditions
/// are terminal and surface immediately.
#[derive(Error, Debug)]
pub enum AgentError {
    /// EDINET rejected the API key (HTTP or internal status 401).
    #[error("EDINET authentication error [{status_code}] at {endpoint}: {message}")]
    Authentication {
        status_code: u16,
        message: String,
        endpoint: String,
    },

    /// The requested date or document does not exist (HTTP or internal status 404).
    #[error("EDINET not found [{status_code}] at {endpoint}: {message}")]
    NotFound {
        status_code: u16,
        message: String,
        endpoint: String,
    },

    /// EDINET server error (5xx). Retried with exponential backoff before surfacing.
    #[error("EDINET server error [{status_code}] at {endpoint}: {message}")]
    Server {
        status_code: u16,
        message: String,
        endpoint: String,
    },

    /// Any other EDINET API failure, including the unexpected-JSON download response
    /// (reported with `status_code: 0`).
    #[error("EDINET API error [{status_code}] at {endpoint}: {message}")]
    Api {
        status_code: u16,
        message: String,
        endpoint: String,
    },

    /// PDF parsing failed. For the `auto` strategy the message is a semicolon-joined
    /// report of every attempted strategy's failure cause.
    #[error("PDF parse error for {pdf_path}: {message}")]
    Parse {
        message: String,
        pdf_path: String,
        strategy: Option<String>,
    },

    /// Vision-LLM extraction failed.
    #[error("vision API error: {message}")]
    VisionApi { message: String, rate_limited: bool },

    /// OCR failed. `not_installed` distinguishes missing models/engine from a
    /// processing failure on a valid setup.
    #[error("OCR error: {message}")]
    Ocr {
        message: String,
        pdf_path: Option<String>,
        not_installed: bool,
    },

    /// A structured-output or chat invocation against an LLM backend failed.
    #[error("LLM provider error [{provider}] ({model}): {message}")]
    LlmProvider {
        message: String,
        provider: String,
        model: String,
    },

    /// The EDINET code list could not be downloaded or extracted.
    #[error("code list download error: {message}")]
    CodeListDownload { message: String, url: Option<String> },

    /// An IR page could not be fetched (browser navigation failure or HTTP >= 400).
    #[error("page access error for {url}: {message}")]
    PageAccess {
        message: String,
        url: String,
        status_code: Option<u16>,
    },

    /// An IR document download failed on both the HTTP and the browser path.
    #[error("document download error for {url}: {message}")]
    DocumentDownload { message: String, url: String },

    /// No IR template exists and the LLM fallback could not produce documents either.
    #[error("IR template error for {sec_code}: {message}")]
    TemplateNotFound { message: String, sec_code: String },

    /// A company lookup produced no usable record.
    #[error("company not found: {message}")]
    CompanyNotFound {
        message: String,
        query: Option<String>,
    },

    /// A PDF path handed to the extractor does not exist on disk.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("file error: {0}")]
    File(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid page range: {0}")]
    InvalidPageRange(String),
}

impl AgentError {
    /// Returns true when the error is worth retrying inside a client.
    ///
    /// Covers EDINET 5xx responses and rate-limited vision calls; everything else is
    /// either terminal (auth, not-found) or already wrapped by its own retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::Server { .. } | AgentError::VisionApi { rate_limited: true, .. }
        )
    }

    /// Builds the vision error, detecting rate limiting from the vendor message.
    ///
    /// Rate limits show up either as a literal `429` or as a quota complaint in the
    /// message body depending on the backend.
    pub fn vision(message: impl Into<String>) -> Self {
        let message = message.into();
        let rate_limited = message.contains("429") || message.to_lowercase().contains("quota");
        AgentError::VisionApi { message, rate_limited }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vision_error_detects_rate_limits() {
        assert!(AgentError::vision("HTTP 429 Too Many Requests").is_retryable());
        assert!(AgentError::vision("Quota exceeded for model").is_retryable());
        assert!(!AgentError::vision("model refused the image").is_retryable());
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = AgentError::Server {
            status_code: 503,
            message: "unavailable".into(),
            endpoint: "/documents.json".into(),
        };
        assert!(err.is_retryable());

        let err = AgentError::NotFound {
            status_code: 404,
            message: "missing".into(),
            endpoint: "/documents/S100XXXX".into(),
        };
        assert!(!err.is_retryable());
    }
}
