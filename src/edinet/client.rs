//! Typed HTTP client for the EDINET filings API.
//!
//! The client owns the API key (sent as a `Subscription-Key` query parameter on every
//! request; callers never handle credentials) and normalizes the portal's two error
//! channels into the [`AgentError`] taxonomy:
//!
//! 1. **HTTP status**: 401 → `Authentication`, 404 → `NotFound`, 5xx → `Server`,
//!    any other non-2xx → `Api`. Messages are pulled from the JSON body when present.
//! 2. **Internal status on HTTP 200**: the portal sometimes reports errors inside a
//!    successful response, either as a top-level `{statusCode, message}` or nested as
//!    `{metadata: {status, message}}`. Both shapes map through the same taxonomy.
//!
//! Binary downloads add a third check: a 200 response with an `application/json`
//! content type is an error disguised as success and is re-run through the
//! internal-status inspection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::sleep;

use super::schemas::{DocumentListResponse, DownloadType};
use crate::config::EdinetConfig;
use crate::error::{AgentError, Result};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_MIN: Duration = Duration::from_secs(4);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Async client for the EDINET API.
///
/// Server errors are retried up to three times with exponential backoff and jitter;
/// authentication and not-found errors surface immediately.
///
/// # Example
///
/// ```no_run
/// # use kaijikit::{Config, EdinetClient, DownloadType};
/// # use chrono::NaiveDate;
/// # async fn example() -> Result<(), kaijikit::AgentError> {
/// let config = Config::load()?;
/// let client = EdinetClient::new(config.edinet)?;
///
/// let list = client
///     .document_list(NaiveDate::from_ymd_opt(2024, 6, 20).unwrap(), true)
///     .await?;
/// for doc in list.results.unwrap_or_default() {
///     if doc.pdf_flag {
///         client
///             .download_document(&doc.doc_id, DownloadType::Pdf, "downloads/doc.pdf".as_ref())
///             .await?;
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct EdinetClient {
    client: reqwest::Client,
    config: EdinetConfig,
}

impl EdinetClient {
    /// Creates a client from the frozen EDINET configuration.
    pub fn new(config: EdinetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Calculates the wait before the next retry: exponential from 4 s, capped at
    /// 60 s, with ±20% jitter so clients don't retry in lockstep.
    fn calculate_backoff(attempt: u32) -> Duration {
        let base = BACKOFF_MIN.as_millis() as u64 * 2_u64.pow(attempt);
        let capped = base.min(BACKOFF_MAX.as_millis() as u64);
        let jitter = (capped as f64 * 0.2 * (fastrand::f64() - 0.5)) as i64;
        Duration::from_millis((capped as i64 + jitter).max(0) as u64)
    }

    /// Fetches the document list for one date.
    ///
    /// `include_details = true` requests type=2 (full metadata per document);
    /// `false` requests type=1, which returns only the envelope with counts.
    ///
    /// # Errors
    ///
    /// `Authentication`, `NotFound`, `Api` surface immediately; `Server` is retried
    /// and surfaces after the final attempt.
    pub async fn document_list(
        &self,
        target_date: NaiveDate,
        include_details: bool,
    ) -> Result<DocumentListResponse> {
        let endpoint = "/documents.json";
        let url = format!("{}{}", self.config.base_url, endpoint);
        let date = target_date.format("%Y-%m-%d").to_string();
        let type_param = if include_details { "2" } else { "1" };

        let mut attempt = 0;
        loop {
            let result = self.document_list_once(&url, endpoint, &date, type_param).await;
            match result {
                Err(ref e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let wait = Self::calculate_backoff(attempt);
                    tracing::warn!(
                        endpoint,
                        date,
                        attempt = attempt + 1,
                        "server error from document list, retrying in {wait:?}"
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn document_list_once(
        &self,
        url: &str,
        endpoint: &str,
        date: &str,
        type_param: &str,
    ) -> Result<DocumentListResponse> {
        let response = self
            .client
            .get(url)
            .query(&[
                ("date", date),
                ("type", type_param),
                ("Subscription-Key", self.config.api_key.as_str()),
            ])
            .timeout(self.config.timeout_list)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(error_for_http_status(status.as_u16(), &body, endpoint));
        }

        let data: serde_json::Value = serde_json::from_str(&body)?;
        check_internal_status(&data, endpoint)?;

        Ok(serde_json::from_value(data)?)
    }

    /// Downloads a document in the requested format and writes it to `save_path`.
    ///
    /// The parent directory is created as needed. A 200 response carrying JSON is
    /// treated as an error: its internal status is inspected, and an unrecognizable
    /// JSON body raises `Api { status_code: 0 }`.
    pub async fn download_document(
        &self,
        doc_id: &str,
        doc_type: DownloadType,
        save_path: &Path,
    ) -> Result<PathBuf> {
        let endpoint = format!("/documents/{doc_id}");
        let url = format!("{}{}", self.config.base_url, endpoint);

        let mut attempt = 0;
        loop {
            let result = self
                .download_document_once(&url, &endpoint, doc_type, save_path)
                .await;
            match result {
                Err(ref e) if e.is_retryable() && attempt + 1 < MAX_ATTEMPTS => {
                    let wait = Self::calculate_backoff(attempt);
                    tracing::warn!(
                        endpoint,
                        attempt = attempt + 1,
                        "server error from document download, retrying in {wait:?}"
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn download_document_once(
        &self,
        url: &str,
        endpoint: &str,
        doc_type: DownloadType,
        save_path: &Path,
    ) -> Result<PathBuf> {
        let response = self
            .client
            .get(url)
            .query(&[
                ("type", doc_type.as_query_value()),
                ("Subscription-Key", self.config.api_key.as_str()),
            ])
            .timeout(self.config.timeout_download)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_http_status(status.as_u16(), &body, endpoint));
        }

        if content_type.contains("application/json") {
            // Error response disguised as success.
            let body = response.text().await.unwrap_or_default();
            if let Ok(data) = serde_json::from_str::<serde_json::Value>(&body) {
                check_internal_status(&data, endpoint)?;
            }
            return Err(AgentError::Api {
                status_code: 0,
                message: "Unexpected JSON response for document download".to_string(),
                endpoint: endpoint.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(save_path, &bytes).await?;

        tracing::info!(doc_id = endpoint, path = %save_path.display(), "downloaded document");
        Ok(save_path.to_path_buf())
    }
}

/// Maps an HTTP-layer error status into the shared taxonomy, pulling the message
/// from the JSON body when one is present.
fn error_for_http_status(status: u16, body: &str, endpoint: &str) -> AgentError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
        .unwrap_or_else(|| format!("HTTP {status}"));

    error_for_status_code(status, message, endpoint)
}

fn error_for_status_code(status: u16, message: String, endpoint: &str) -> AgentError {
    let endpoint = endpoint.to_string();
    match status {
        401 => AgentError::Authentication { status_code: status, message, endpoint },
        404 => AgentError::NotFound { status_code: status, message, endpoint },
        500.. => AgentError::Server { status_code: status, message, endpoint },
        _ => AgentError::Api { status_code: status, message, endpoint },
    }
}

/// Inspects a parsed JSON body for the portal's internal error shapes.
///
/// Shape A is a top-level integer `statusCode` with `message`; shape B is a nested
/// `metadata.status` numeric string. A status of 200 in either shape passes.
pub(crate) fn check_internal_status(data: &serde_json::Value, endpoint: &str) -> Result<()> {
    if let Some(code) = data.get("statusCode").and_then(|v| v.as_i64()) {
        if code != 200 {
            let message = data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(error_for_status_code(code.clamp(0, u16::MAX as i64) as u16, message, endpoint));
        }
    }

    let Some(metadata) = data.get("metadata").and_then(|m| m.as_object()) else {
        return Ok(());
    };
    let Some(status) = metadata.get("status").and_then(|s| s.as_str()) else {
        return Ok(());
    };
    if status == "200" {
        return Ok(());
    }

    let status_code = status.parse::<u16>().unwrap_or(0);
    let message = metadata
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Unknown error")
        .to_string();

    Err(error_for_status_code(status_code, message, endpoint))
}
