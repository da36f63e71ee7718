use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use metrics::{counter, histogram};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, ScraperError};

const SETTLE_POLL: Duration = Duration::from_millis(250);

/// Page state probe: ready state plus serialized DOM size.
const SETTLE_PROBE: &str = "[document.readyState, document.documentElement.outerHTML.length]";

/// Timeouts for one render. Navigation is a hard bound; settle only limits
/// how long we wait for the page to go quiet before reading it anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTimeouts {
    pub navigation: Duration,
    pub settle: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("could not open a page for {url}: {reason}")]
    PageOpen { url: String, reason: String },

    #[error("navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("reading {url} failed after one reload: {reason}")]
    ContentRead { url: String, reason: String },
}

impl RenderError {
    pub fn url(&self) -> &str {
        match self {
            RenderError::PageOpen { url, .. }
            | RenderError::NavigationTimeout { url, .. }
            | RenderError::Navigation { url, .. }
            | RenderError::ContentRead { url, .. } => url,
        }
    }
}

/// Turns a URL into HTML as it stands after the page's scripts ran.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str, timeouts: RenderTimeouts) -> std::result::Result<String, RenderError>;
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Browser binary override, for images without a bundled Chromium.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub launch_timeout: Duration,
}

/// The process-wide browser. Opened once, lends out one page per render,
/// closed at shutdown.
pub struct BrowserSession {
    browser: Mutex<Browser>,
    handler: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BrowserSession {
    pub async fn launch(options: &BrowserOptions) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .launch_timeout(options.launch_timeout)
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-accelerated-2d-canvas")
            .arg("--disable-gpu")
            .arg("--no-first-run");
        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &options.executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ScraperError::Browser)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScraperError::Browser(format!("Failed to launch browser: {e}")))?;

        // The handler drives the CDP connection and must be polled for the
        // browser to respond at all.
        let handle = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        info!(executable = ?options.executable, headless = options.headless, "Browser session opened");
        Ok(Self {
            browser: Mutex::new(browser),
            handler: std::sync::Mutex::new(Some(handle)),
        })
    }

    async fn open_page(&self) -> std::result::Result<ScopedPage<Page>, String> {
        let browser = self.browser.lock().await;
        let page = browser.new_page("about:blank").await.map_err(|e| e.to_string())?;
        Ok(ScopedPage::new(page))
    }

    pub async fn close(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Closing browser failed: {}", e);
        }
        let _ = browser.wait().await;

        let handle = self.handler.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            handle.abort();
        }
        info!("Browser session closed");
        Ok(())
    }
}

/// Page operations one render needs. Errors are reported as text, since
/// they only ever end up in a [`RenderError`].
#[async_trait]
trait BrowserPage: Clone + Send + Sync + 'static {
    async fn goto(&self, url: &str) -> std::result::Result<(), String>;

    /// Ready state and serialized DOM size, or `None` if the probe failed.
    async fn probe(&self) -> Option<(String, u64)>;

    async fn content(&self) -> std::result::Result<String, String>;

    async fn reload(&self) -> std::result::Result<(), String>;

    async fn close(&self) -> std::result::Result<(), String>;
}

#[async_trait]
impl BrowserPage for Page {
    async fn goto(&self, url: &str) -> std::result::Result<(), String> {
        Page::goto(self, url).await.map(|_| ()).map_err(|e| e.to_string())
    }

    async fn probe(&self) -> Option<(String, u64)> {
        match self.evaluate(SETTLE_PROBE).await {
            Ok(result) => result.into_value::<(String, u64)>().ok(),
            Err(e) => {
                debug!("Settle probe failed: {}", e);
                None
            }
        }
    }

    async fn content(&self) -> std::result::Result<String, String> {
        Page::content(self).await.map_err(|e| e.to_string())
    }

    async fn reload(&self) -> std::result::Result<(), String> {
        Page::reload(self).await.map(|_| ()).map_err(|e| e.to_string())
    }

    async fn close(&self) -> std::result::Result<(), String> {
        Page::close(self.clone()).await.map_err(|e| e.to_string())
    }
}

/// A page that is closed on every exit path. `release` closes it in line;
/// dropping it unreleased (an early return or a cancelled future) closes it
/// in the background.
struct ScopedPage<P: BrowserPage> {
    page: P,
    released: bool,
}

impl<P: BrowserPage> ScopedPage<P> {
    fn new(page: P) -> Self {
        Self { page, released: false }
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.page.close().await {
            debug!("Closing page failed: {}", e);
        }
    }
}

impl<P: BrowserPage> Drop for ScopedPage<P> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let page = self.page.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

async fn navigate<P: BrowserPage>(page: &P, url: &str, timeout: Duration) -> std::result::Result<(), RenderError> {
    match tokio::time::timeout(timeout, page.goto(url)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(RenderError::Navigation { url: url.to_string(), reason }),
        Err(_) => Err(RenderError::NavigationTimeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Waits until the document reports `complete` and its size stops
/// changing between two probes, or the settle timeout passes.
async fn settle<P: BrowserPage>(page: &P, url: &str, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut last_len = None;

    while Instant::now() < deadline {
        if let Some((ready_state, len)) = page.probe().await {
            if ready_state == "complete" && last_len == Some(len) {
                return;
            }
            last_len = Some(len);
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
    debug!(url, timeout_ms = timeout.as_millis() as u64, "Page did not settle, reading it anyway");
}

/// Navigates, settles and reads the page. A failed read gets exactly one
/// reload before it becomes [`RenderError::ContentRead`].
async fn render_in<P: BrowserPage>(page: &P, url: &str, timeouts: RenderTimeouts) -> std::result::Result<String, RenderError> {
    navigate(page, url, timeouts.navigation).await?;
    settle(page, url, timeouts.settle).await;

    let first_error = match page.content().await {
        Ok(html) => return Ok(html),
        Err(e) => e,
    };

    warn!(url, error = %first_error, "Reading page content failed, reloading once");
    counter!("show_scraper_render_retries_total").increment(1);

    let content_read = |reason: String| RenderError::ContentRead { url: url.to_string(), reason };
    match tokio::time::timeout(timeouts.navigation, page.reload()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(content_read(format!("{first_error}; reload failed: {e}"))),
        Err(_) => return Err(content_read(format!("{first_error}; reload timed out"))),
    }
    settle(page, url, timeouts.settle).await;
    page.content().await.map_err(content_read)
}

/// Renders on `page` and closes it, whatever the outcome.
async fn render_scoped<P: BrowserPage>(
    page: ScopedPage<P>,
    url: &str,
    timeouts: RenderTimeouts,
) -> std::result::Result<String, RenderError> {
    let result = render_in(&page.page, url, timeouts).await;
    page.release().await;
    result
}

/// [`PageRenderer`] backed by a headless Chromium session.
pub struct ChromeRenderer {
    session: std::sync::Arc<BrowserSession>,
}

impl ChromeRenderer {
    pub fn new(session: std::sync::Arc<BrowserSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl PageRenderer for ChromeRenderer {
    #[instrument(skip(self, timeouts))]
    async fn render(&self, url: &str, timeouts: RenderTimeouts) -> std::result::Result<String, RenderError> {
        let started = Instant::now();
        let page = self
            .session
            .open_page()
            .await
            .map_err(|reason| RenderError::PageOpen { url: url.to_string(), reason })?;

        let result = render_scoped(page, url, timeouts).await;

        histogram!("show_scraper_render_duration_seconds").record(started.elapsed().as_secs_f64());
        match &result {
            Ok(html) => debug!(bytes = html.len(), "Rendered page"),
            Err(e) => warn!(error = %e, "Render failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn render_error_reports_its_url() {
        let err = RenderError::NavigationTimeout { url: "https://v.test".into(), timeout_ms: 5 };
        assert_eq!(err.url(), "https://v.test");
        assert_eq!(err.to_string(), "navigation to https://v.test timed out after 5ms");
    }

    /// Scripted page: fails the first `failing_reads` content reads and
    /// counts reloads and closes.
    #[derive(Clone, Default)]
    struct ScriptedPage {
        failing_reads: Arc<AtomicUsize>,
        reloads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        hang_on_goto: bool,
    }

    impl ScriptedPage {
        fn failing(reads: usize) -> Self {
            let page = Self::default();
            page.failing_reads.store(reads, Ordering::SeqCst);
            page
        }

        fn reloads(&self) -> usize {
            self.reloads.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BrowserPage for ScriptedPage {
        async fn goto(&self, _url: &str) -> std::result::Result<(), String> {
            if self.hang_on_goto {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(())
        }

        async fn probe(&self) -> Option<(String, u64)> {
            Some(("complete".to_string(), 42))
        }

        async fn content(&self) -> std::result::Result<String, String> {
            let left = self.failing_reads.load(Ordering::SeqCst);
            if left > 0 {
                self.failing_reads.store(left - 1, Ordering::SeqCst);
                return Err("Execution context was destroyed".to_string());
            }
            Ok("<html><body>shows</body></html>".to_string())
        }

        async fn reload(&self) -> std::result::Result<(), String> {
            self.reloads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) -> std::result::Result<(), String> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn timeouts() -> RenderTimeouts {
        RenderTimeouts { navigation: Duration::from_millis(50), settle: Duration::ZERO }
    }

    #[tokio::test]
    async fn clean_read_needs_no_reload() {
        let page = ScriptedPage::default();
        let html = render_scoped(ScopedPage::new(page.clone()), "https://v.test", timeouts()).await.unwrap();

        assert!(html.contains("shows"));
        assert_eq!(page.reloads(), 0);
        assert_eq!(page.closes(), 1);
    }

    #[tokio::test]
    async fn one_failed_read_is_retried_after_a_reload() {
        let page = ScriptedPage::failing(1);
        let html = render_scoped(ScopedPage::new(page.clone()), "https://v.test", timeouts()).await.unwrap();

        assert!(html.contains("shows"));
        assert_eq!(page.reloads(), 1);
        assert_eq!(page.closes(), 1);
    }

    #[tokio::test]
    async fn second_failed_read_gives_up_after_one_reload() {
        let page = ScriptedPage::failing(2);
        let err = render_scoped(ScopedPage::new(page.clone()), "https://v.test", timeouts()).await.unwrap_err();

        assert!(matches!(err, RenderError::ContentRead { .. }));
        assert_eq!(page.reloads(), 1);
        assert_eq!(page.closes(), 1);
    }

    #[tokio::test]
    async fn navigation_timeout_still_closes_the_page() {
        let page = ScriptedPage { hang_on_goto: true, ..Default::default() };
        let err = render_scoped(ScopedPage::new(page.clone()), "https://v.test", timeouts()).await.unwrap_err();

        assert_eq!(err, RenderError::NavigationTimeout { url: "https://v.test".into(), timeout_ms: 50 });
        assert_eq!(page.reloads(), 0);
        assert_eq!(page.closes(), 1);
    }

    #[tokio::test]
    async fn dropped_page_is_closed_in_the_background() {
        let page = ScriptedPage::default();
        drop(ScopedPage::new(page.clone()));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert_eq!(page.closes(), 1);
    }
}
