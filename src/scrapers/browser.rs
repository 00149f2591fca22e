use crate::config::FetchConfig;
use crate::error::ScrapeError;
use crate::scrapers::traits::PageFetcher;
use crate::scrapers::types::{FetchRequest, RawResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Dismisses the consent banner that hides listing content on first load
const ACCEPT_COOKIES_JS: &str = r#"
    const button = document.querySelector(
        'button[id*="accept"], button[data-testid*="accept"], button[class*="accept"], #didomi-notice-agree-button'
    );
    if (button) button.click();
"#;

/// Heavier fetch path using headless Chrome. Only used when the HTTP path
/// was blocked.
pub struct BrowserFetcher {
    browser: Browser,
    settle: Duration,
    timeout: Duration,
}

impl BrowserFetcher {
    /// Launch headless Chrome
    pub fn launch(config: &FetchConfig) -> Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(true)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser,
            settle: config.render_settle(),
            timeout: config.timeout(),
        })
    }

    /// Render one page and return its final DOM. The tab is closed on
    /// every path, including failed navigation.
    fn render(browser: &Browser, request: &FetchRequest, settle: Duration, timeout: Duration) -> Result<String> {
        let tab = browser.new_tab()?;
        let rendered = Self::render_in(&tab, request, settle, timeout);
        if let Err(e) = tab.close(true) {
            debug!("Could not close tab for {}: {:#}", request.url, e);
        }
        rendered
    }

    fn render_in(tab: &Tab, request: &FetchRequest, settle: Duration, timeout: Duration) -> Result<String> {
        tab.set_default_timeout(timeout);
        tab.set_user_agent(&request.user_agent, Some(&request.accept_language), None)?;

        tab.navigate_to(&request.url)?;
        tab.wait_until_navigated()?;

        // Wait for client-side rendering to settle
        thread::sleep(settle);

        let _ = tab.evaluate(ACCEPT_COOKIES_JS, false);
        thread::sleep(settle / 2);

        let html = tab.get_content().context("Could not get HTML from page")?;
        debug!("Rendered {} bytes from {}", html.len(), request.url);
        Ok(html)
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, ScrapeError> {
        let browser = self.browser.clone();
        let owned = request.clone();
        let settle = self.settle;
        let timeout = self.timeout;

        let rendered = tokio::task::spawn_blocking(move || Self::render(&browser, &owned, settle, timeout))
            .await
            .map_err(|e| ScrapeError::Render {
                url: request.url.clone(),
                reason: e.to_string(),
            })?;

        let body = rendered.map_err(|e| ScrapeError::Render {
            url: request.url.clone(),
            reason: format!("{:#}", e),
        })?;

        Ok(RawResponse {
            url: request.url.clone(),
            status: 200,
            headers: Vec::new(),
            body,
            rendered: true,
        })
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}
