//! Rate-limited scraping substrate shared by the IR pipeline.
//!
//! Two complementary clients sit behind one facade: a plain reqwest client for
//! idempotent GETs and quick downloads, and a lazily launched headless-browser
//! session for JS-rendered pages and bot-walled PDFs. Both honor a per-instance
//! minimum request interval and the target's `robots.txt` (advisory, logged).
//!
//! The key design decision is the dual download strategy: PDFs are fetched with
//! browser-like headers over plain HTTP first, and only a 403 pays the cost of the
//! browser fallback. See [`Scraper::download_pdf`].

mod browser;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use url::Url;

pub use browser::BrowserSession;

use crate::config::ScraperConfig;
use crate::error::{AgentError, Result};

const FETCH_ATTEMPTS: u32 = 3;
const RETRY_MIN: Duration = Duration::from_secs(2);
const RETRY_MAX: Duration = Duration::from_secs(30);

/// The page-level operations the IR components need from a scraper.
///
/// The template engine, LLM explorer, and pipeline all talk to this trait rather
/// than the concrete [`Scraper`], which keeps them testable without a browser.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the rendered HTML of a page.
    async fn fetch_page(&self, url: &str) -> Result<String>;

    /// Downloads a PDF to `save_path`, honoring the existing-file short-circuit.
    async fn download_pdf(
        &self,
        url: &str,
        save_path: &Path,
        force: bool,
        referer: Option<&str>,
    ) -> Result<PathBuf>;
}

/// Resolves a possibly-relative URL against a base; absolute URLs pass through.
pub fn resolve_url(base: &str, relative: &str) -> Result<String> {
    if let Ok(absolute) = Url::parse(relative) {
        return Ok(absolute.to_string());
    }
    let base = Url::parse(base).map_err(|e| AgentError::PageAccess {
        message: format!("invalid base URL: {e}"),
        url: base.to_string(),
        status_code: None,
    })?;
    let resolved = base.join(relative).map_err(|e| AgentError::PageAccess {
        message: format!("failed to resolve URL: {e}"),
        url: relative.to_string(),
        status_code: None,
    })?;
    Ok(resolved.to_string())
}

/// Minimum-interval rate limiter.
///
/// Before each request the caller sleeps for whatever remains of the interval; the
/// "last request" timestamp is taken at request initiation, not completion.
#[derive(Debug)]
struct MinIntervalLimiter {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl MinIntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                tracing::debug!(?wait, "rate limiting before request");
                sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Parses the `Disallow` rules that apply to the wildcard user agent.
fn parse_robots_disallows(body: &str) -> HashSet<String> {
    let mut disallowed = HashSet::new();
    let mut current_agent = String::new();

    for line in body.lines() {
        let line = line.trim().to_lowercase();
        if let Some(agent) = line.strip_prefix("user-agent:") {
            current_agent = agent.trim().to_string();
        } else if let Some(path) = line.strip_prefix("disallow:") {
            if current_agent == "*" || current_agent.is_empty() {
                let path = path.trim();
                if !path.is_empty() {
                    disallowed.insert(path.to_string());
                }
            }
        }
    }

    disallowed
}

/// Rate-limited scraper with robots.txt discipline and dual PDF download.
///
/// # Example
///
/// ```no_run
/// # use kaijikit::{Scraper, ScraperConfig};
/// # use kaijikit::PageFetcher;
/// # async fn example() -> Result<(), kaijikit::AgentError> {
/// let scraper = Scraper::new(ScraperConfig::default());
/// let html = scraper.fetch_page("https://example.com/ir/").await?;
/// scraper
///     .download_pdf(
///         "https://example.com/ir/earnings/q1.pdf",
///         "downloads/q1.pdf".as_ref(),
///         false,
///         None,
///     )
///     .await?;
/// scraper.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Scraper {
    config: ScraperConfig,
    http: reqwest::Client,
    limiter: MinIntervalLimiter,
    robots_cache: Mutex<HashMap<String, HashSet<String>>>,
    browser: Mutex<Option<BrowserSession>>,
}

impl Scraper {
    pub fn new(config: ScraperConfig) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .unwrap_or_default();

        Self {
            limiter: MinIntervalLimiter::new(config.rate_limit),
            robots_cache: Mutex::new(HashMap::new()),
            browser: Mutex::new(None),
            http,
            config,
        }
    }

    /// Releases the browser session, if one was ever launched.
    ///
    /// Safe to call multiple times; subsequent scraping relaunches on demand.
    pub async fn close(&self) -> Result<()> {
        if let Some(session) = self.browser.lock().await.take() {
            session.close().await?;
        }
        Ok(())
    }

    async fn with_browser<'a>(
        &'a self,
        guard: &'a mut tokio::sync::MutexGuard<'_, Option<BrowserSession>>,
    ) -> Result<&'a BrowserSession> {
        if guard.is_none() {
            **guard = Some(BrowserSession::launch(&self.config).await?);
        }
        Ok(guard.as_ref().expect("launched above"))
    }

    /// Checks `robots.txt` for the URL's origin. Advisory: the result is logged and
    /// returned, but fetch failures and missing files default to permit.
    pub async fn check_robots(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let origin = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        );
        let path = parsed.path().to_string();

        let mut cache = self.robots_cache.lock().await;
        if !cache.contains_key(&origin) {
            let robots_url = format!("{origin}/robots.txt");
            let disallows = match self.http.get(&robots_url).timeout(Duration::from_secs(10)).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    HashSet::new()
                }
                Ok(response) if response.status().is_success() => {
                    let body = response.text().await.unwrap_or_default();
                    parse_robots_disallows(&body)
                }
                Ok(_) | Err(_) => {
                    tracing::warn!(robots_url, "failed to fetch robots.txt, defaulting to permit");
                    HashSet::new()
                }
            };
            cache.insert(origin.clone(), disallows);
        }

        let disallowed = &cache[&origin];
        let allowed = !disallowed.iter().any(|d| path.starts_with(d.as_str()));
        tracing::debug!(url, allowed, "robots.txt check");
        allowed
    }

    fn retry_backoff(attempt: u32) -> Duration {
        let base = RETRY_MIN.as_millis() as u64 * 2_u64.pow(attempt);
        Duration::from_millis(base.min(RETRY_MAX.as_millis() as u64))
    }

    /// Builds the browser-like header set for direct PDF downloads.
    ///
    /// The Referer defaults to the URL's origin; some IR servers reject requests
    /// without one.
    fn download_headers(&self, url: &str, referer: Option<&str>) -> reqwest::header::HeaderMap {
        use reqwest::header::{HeaderMap, HeaderValue};

        let referer = referer.map(str::to_owned).or_else(|| {
            Url::parse(url)
                .ok()
                .map(|u| format!("{}://{}/", u.scheme(), u.host_str().unwrap_or_default()))
        });

        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };

        if let Some(referer) = &referer {
            put("Referer", referer);
        }
        put("Accept", "application/pdf,application/octet-stream,*/*;q=0.9");
        put("Accept-Language", "ja,en;q=0.9");
        put("Sec-Fetch-Dest", "document");
        put("Sec-Fetch-Mode", "navigate");
        put("Sec-Fetch-Site", "same-origin");
        put("Sec-Fetch-User", "?1");
        put("Upgrade-Insecure-Requests", "1");
        headers
    }

    async fn download_pdf_once(
        &self,
        url: &str,
        save_path: &Path,
        referer: Option<&str>,
    ) -> Result<PathBuf> {
        self.limiter.acquire().await;

        let response = self
            .http
            .get(url)
            .headers(self.download_headers(url, referer))
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| AgentError::DocumentDownload {
                message: e.to_string(),
                url: url.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            // Server wants a full browser fingerprint.
            tracing::warn!(url, "403 on direct download, falling back to browser");
            let mut guard = self.browser.lock().await;
            let session = self.with_browser(&mut guard).await?;
            return session.download(url, save_path).await;
        }
        if !status.is_success() {
            return Err(AgentError::DocumentDownload {
                message: format!("HTTP error: {status}"),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| AgentError::DocumentDownload {
            message: e.to_string(),
            url: url.to_string(),
        })?;

        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(save_path, &bytes).await?;

        tracing::info!(url, path = %save_path.display(), "downloaded PDF");
        Ok(save_path.to_path_buf())
    }
}

#[async_trait]
impl PageFetcher for Scraper {
    /// Fetches rendered HTML through the browser session, retrying page-access
    /// failures with exponential backoff.
    async fn fetch_page(&self, url: &str) -> Result<String> {
        self.check_robots(url).await;

        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;

            let result = {
                let mut guard = self.browser.lock().await;
                let session = self.with_browser(&mut guard).await?;
                session.fetch_page(url).await
            };

            match result {
                Err(e @ AgentError::PageAccess { .. }) if attempt + 1 < FETCH_ATTEMPTS => {
                    let wait = Self::retry_backoff(attempt);
                    tracing::warn!(url, error = %e, "page fetch failed, retrying in {wait:?}");
                    sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Downloads a PDF with the dual strategy.
    ///
    /// 1. If `save_path` exists and `force` is false, return it without touching the
    ///    network.
    /// 2. Direct GET with browser-like headers (fast path).
    /// 3. On 403, the browser session takes over.
    ///
    /// Download errors are retried up to three times before surfacing.
    async fn download_pdf(
        &self,
        url: &str,
        save_path: &Path,
        force: bool,
        referer: Option<&str>,
    ) -> Result<PathBuf> {
        if save_path.exists() && !force {
            tracing::debug!(path = %save_path.display(), "file already exists, skipping download");
            return Ok(save_path.to_path_buf());
        }

        self.check_robots(url).await;

        let mut attempt = 0;
        loop {
            match self.download_pdf_once(url, save_path, referer).await {
                Err(e @ AgentError::DocumentDownload { .. }) if attempt + 1 < FETCH_ATTEMPTS => {
                    let wait = Self::retry_backoff(attempt);
                    tracing::warn!(url, error = %e, "download failed, retrying in {wait:?}");
                    sleep(wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_handles_relative_and_absolute() {
        let resolved = resolve_url("https://example.com/ir/news/", "../docs/q1.pdf").unwrap();
        assert_eq!(resolved, "https://example.com/ir/docs/q1.pdf");

        let passthrough =
            resolve_url("https://example.com/ir/", "https://cdn.example.net/a.pdf").unwrap();
        assert_eq!(passthrough, "https://cdn.example.net/a.pdf");
    }

    #[test]
    fn robots_parsing_scopes_to_wildcard_agent() {
        let body = "\
User-agent: evilbot\n\
Disallow: /\n\
\n\
User-agent: *\n\
Disallow: /private\n\
Disallow: /tmp/\n\
Allow: /public\n";
        let disallows = parse_robots_disallows(body);
        assert!(disallows.contains("/private"));
        assert!(disallows.contains("/tmp/"));
        // The evilbot-only rule must not leak into the wildcard set.
        assert!(!disallows.contains("/"));
    }

    #[test]
    fn robots_empty_disallow_is_ignored() {
        let body = "User-agent: *\nDisallow:\n";
        assert!(parse_robots_disallows(body).is_empty());
    }

    #[tokio::test]
    async fn limiter_spaces_out_requests() {
        tokio::time::pause();
        let limiter = MinIntervalLimiter::new(Duration::from_secs(1));

        limiter.acquire().await;
        let before = Instant::now();
        limiter.acquire().await;
        // With paused time, the sleep advances the clock by the full remainder.
        assert!(before.elapsed() >= Duration::from_millis(900));
    }
}
