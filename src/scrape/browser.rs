//! Headless-browser session over the Chrome DevTools Protocol.
//!
//! Some IR sites render their document lists with JavaScript, and some PDF servers
//! refuse anything that does not look like a full browser. This module wraps
//! chromiumoxide behind the two operations the scraper needs: fetching rendered HTML
//! and saving a navigation-triggered download.
//!
//! A session is acquired once and reused; the CDP event handler runs on its own task
//! and both are torn down by [`BrowserSession::close`] (and, as a backstop, on drop).

use std::path::{Path, PathBuf};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, ResourceType, SetBlockedUrLsParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::config::ScraperConfig;
use crate::error::{AgentError, Result};

/// URL patterns blocked on every page for speed: static assets contribute nothing to
/// link extraction.
const BLOCKED_PATTERNS: [&str; 11] = [
    "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.woff", "*.woff2", "*.ttf", "*.eot",
    "*.css", "*.ico",
];

/// Chromium reports a navigation that turns into a file download as an aborted
/// navigation; that specific failure is expected on the download path.
const DOWNLOAD_NAV_SENTINEL: &str = "net::ERR_ABORTED";

/// A running headless-browser session.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    timeout: Duration,
    user_agent: String,
}

impl BrowserSession {
    /// Launches headless Chromium and starts the CDP event pump.
    pub async fn launch(config: &ScraperConfig) -> Result<Self> {
        let browser_config = BrowserConfig::builder()
            .arg(format!("--user-agent={}", config.user_agent))
            .build()
            .map_err(|e| AgentError::Config(format!("failed to configure browser: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
            AgentError::Config(format!("failed to launch headless browser: {e}"))
        })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        tracing::debug!("browser session started");
        Ok(Self {
            browser,
            handler_task,
            timeout: config.timeout,
            user_agent: config.user_agent.clone(),
        })
    }

    async fn new_page(&self) -> Result<Page> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(browser_error)?;
        page.set_user_agent(self.user_agent.as_str())
            .await
            .map_err(browser_error)?;
        page.execute(EnableParams::default())
            .await
            .map_err(browser_error)?;
        page.execute(SetBlockedUrLsParams::new(
            BLOCKED_PATTERNS.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
        ))
        .await
        .map_err(browser_error)?;
        Ok(page)
    }

    /// Navigates to `url`, waits for the page to settle, and returns the rendered
    /// HTML.
    ///
    /// An HTTP status of 400 or above on the document response surfaces as a typed
    /// [`AgentError::PageAccess`] carrying the status. The page is closed after the
    /// content is read.
    pub async fn fetch_page(&self, url: &str) -> Result<String> {
        let page = self.new_page().await?;

        let result = self.fetch_page_inner(&page, url).await;
        let _ = page.close().await;
        result
    }

    async fn fetch_page_inner(&self, page: &Page, url: &str) -> Result<String> {
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_error)?;

        let navigation = async {
            page.goto(url).await.map_err(|e| AgentError::PageAccess {
                message: e.to_string(),
                url: url.to_string(),
                status_code: None,
            })?;
            page.wait_for_navigation().await.map_err(|e| AgentError::PageAccess {
                message: e.to_string(),
                url: url.to_string(),
                status_code: None,
            })?;
            Ok::<_, AgentError>(())
        };

        tokio::time::timeout(self.timeout, navigation)
            .await
            .map_err(|_| AgentError::PageAccess {
                message: format!("navigation timed out after {:?}", self.timeout),
                url: url.to_string(),
                status_code: None,
            })??;

        // Inspect the document response for an error status. The event stream may
        // hold several responses (redirects, frames); the document one wins.
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), responses.next()).await
        {
            if event.r#type == ResourceType::Document {
                let status = event.response.status as u16;
                if status >= 400 {
                    return Err(AgentError::PageAccess {
                        message: format!("HTTP error: {status}"),
                        url: url.to_string(),
                        status_code: Some(status),
                    });
                }
                break;
            }
        }

        let html = page.content().await.map_err(|e| AgentError::PageAccess {
            message: e.to_string(),
            url: url.to_string(),
            status_code: None,
        })?;

        tracing::debug!(url, bytes = html.len(), "fetched page");
        Ok(html)
    }

    /// Downloads a file by navigating to its URL and capturing the browser download.
    ///
    /// The download lands in a scratch directory next to `save_path`, is watched
    /// until Chromium finishes writing it, then moved into place. Navigation
    /// failures other than the download sentinel propagate; a hard timeout bounds
    /// the whole operation.
    pub async fn download(&self, url: &str, save_path: &Path) -> Result<PathBuf> {
        let page = self.new_page().await?;
        let result = self.download_inner(&page, url, save_path).await;
        let _ = page.close().await;
        result
    }

    async fn download_inner(&self, page: &Page, url: &str, save_path: &Path) -> Result<PathBuf> {
        let parent = save_path.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;

        let scratch = parent.join(format!(".browser-download-{:08x}", fastrand::u32(..)));
        tokio::fs::create_dir_all(&scratch).await?;

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(scratch.to_string_lossy().into_owned())
            .build()
            .map_err(|e| AgentError::DocumentDownload {
                message: format!("failed to configure download behavior: {e}"),
                url: url.to_string(),
            })?;
        page.execute(behavior).await.map_err(|e| AgentError::DocumentDownload {
            message: e.to_string(),
            url: url.to_string(),
        })?;

        if let Err(e) = page.goto(url).await {
            let message = e.to_string();
            if !message.contains(DOWNLOAD_NAV_SENTINEL) {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return Err(AgentError::DocumentDownload {
                    message,
                    url: url.to_string(),
                });
            }
        }

        let downloaded = self.wait_for_download(&scratch, url).await;
        match downloaded {
            Ok(temp_path) => {
                tokio::fs::rename(&temp_path, save_path).await?;
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                tracing::info!(url, path = %save_path.display(), "downloaded via browser");
                Ok(save_path.to_path_buf())
            }
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                Err(e)
            }
        }
    }

    /// Polls the scratch directory until a completed download appears.
    ///
    /// Chromium writes in-progress files with a `.crdownload` suffix; completion is
    /// the moment a file without that suffix exists.
    async fn wait_for_download(&self, scratch: &Path, url: &str) -> Result<PathBuf> {
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            if let Ok(mut entries) = std::fs::read_dir(scratch) {
                let complete = entries.find_map(|entry| {
                    let path = entry.ok()?.path();
                    let name = path.file_name()?.to_string_lossy().into_owned();
                    (path.is_file() && !name.ends_with(".crdownload")).then_some(path)
                });
                if let Some(path) = complete {
                    return Ok(path);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(AgentError::DocumentDownload {
                    message: "download timeout".to_string(),
                    url: url.to_string(),
                });
            }
            sleep(Duration::from_millis(250)).await;
        }
    }

    /// Shuts the browser down and stops the event pump.
    pub async fn close(mut self) -> Result<()> {
        let _ = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        tracing::debug!("browser session closed");
        Ok(())
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Backstop for cancellation paths that never reach close(); aborting the
        // handler task lets the child process get reaped.
        self.handler_task.abort();
    }
}

fn browser_error(e: chromiumoxide::error::CdpError) -> AgentError {
    AgentError::Config(format!("browser error: {e}"))
}
