//! Headless Chrome through a WebDriver endpoint (chromedriver)

use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::{ChromeCapabilities, ChromiumLikeCapabilities};
use tracing::{debug, info, warn};

use super::{ItemHandle, PageRenderer, RenderError, RenderResult, RendererFactory};
use crate::domain::SiteConfig;
use crate::infrastructure::config::RendererConfig;

/// Substrings of WebDriver errors that mean the browser is gone
const SESSION_LOST_MARKERS: &[&str] = &[
    "invalid session id",
    "session deleted",
    "no such window",
    "chrome not reachable",
    "disconnected",
];

fn classify(err: WebDriverError) -> RenderError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if SESSION_LOST_MARKERS.iter().any(|marker| lower.contains(marker)) {
        RenderError::SessionLost(message)
    } else {
        RenderError::Command(message)
    }
}

fn classify_selector(selector: &str, err: WebDriverError) -> RenderError {
    let message = err.to_string();
    if message.to_lowercase().contains("invalid selector") {
        RenderError::InvalidSelector {
            selector: selector.to_string(),
            reason: message,
        }
    } else {
        classify(err)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

#[derive(Debug, Clone)]
pub struct WebDriverItem {
    element: WebElement,
}

#[async_trait]
impl ItemHandle for WebDriverItem {
    async fn find_text(&self, selector: &str) -> RenderResult<Option<String>> {
        let found = self
            .element
            .find_all(By::Css(selector))
            .await
            .map_err(|e| classify_selector(selector, e))?;
        match found.first() {
            Some(element) => Ok(non_empty(&element.text().await.map_err(classify)?)),
            None => Ok(None),
        }
    }

    async fn find_attribute(&self, selector: &str, attribute: &str) -> RenderResult<Option<String>> {
        let found = self
            .element
            .find_all(By::Css(selector))
            .await
            .map_err(|e| classify_selector(selector, e))?;
        match found.first() {
            Some(element) => Ok(element
                .attr(attribute)
                .await
                .map_err(classify)?
                .as_deref()
                .and_then(non_empty)),
            None => Ok(None),
        }
    }
}

pub struct WebDriverRenderer {
    driver: Option<WebDriver>,
    current_url: Option<String>,
}

impl WebDriverRenderer {
    fn driver(&self) -> RenderResult<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| RenderError::SessionLost("browser session already closed".to_string()))
    }

    async fn script(&self, script: &str) -> RenderResult<serde_json::Value> {
        let ret = self
            .driver()?
            .execute(script, Vec::new())
            .await
            .map_err(classify)?;
        Ok(ret.json().clone())
    }
}

#[async_trait]
impl PageRenderer for WebDriverRenderer {
    type Item = WebDriverItem;

    async fn navigate(&mut self, url: &str) -> RenderResult<()> {
        self.driver()?.goto(url).await.map_err(|e| match classify(e) {
            RenderError::Command(reason) => RenderError::Navigation {
                url: url.to_string(),
                reason,
            },
            other => other,
        })?;
        self.current_url = Some(url.to_string());
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    async fn is_document_ready(&mut self) -> RenderResult<bool> {
        let state = self.script("return document.readyState;").await?;
        Ok(state.as_str() == Some("complete"))
    }

    async fn is_present(&mut self, selector: &str) -> RenderResult<bool> {
        let found = self
            .driver()?
            .find_all(By::Css(selector))
            .await
            .map_err(|e| classify_selector(selector, e))?;
        Ok(!found.is_empty())
    }

    async fn scroll_to_bottom(&mut self) -> RenderResult<()> {
        self.script("window.scrollTo(0, document.body.scrollHeight);")
            .await
            .map(|_| ())
    }

    async fn document_height(&mut self) -> RenderResult<u64> {
        let height = self.script("return document.body.scrollHeight;").await?;
        Ok(height.as_u64().unwrap_or_default())
    }

    async fn find_items(&mut self, selector: &str) -> RenderResult<Vec<WebDriverItem>> {
        let elements = self
            .driver()?
            .find_all(By::Css(selector))
            .await
            .map_err(|e| classify_selector(selector, e))?;
        Ok(elements
            .into_iter()
            .map(|element| WebDriverItem { element })
            .collect())
    }

    async fn scroll_into_view(&mut self, item: &WebDriverItem) -> RenderResult<()> {
        item.element.scroll_into_view().await.map_err(classify)
    }

    async fn close(&mut self) -> RenderResult<()> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await.map_err(classify)?;
            debug!("Browser session closed");
        }
        Ok(())
    }
}

/// Starts one Chrome session per site walk
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    config: RendererConfig,
}

impl WebDriverFactory {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    fn capabilities(&self) -> WebDriverResult<ChromeCapabilities> {
        let mut caps = DesiredCapabilities::chrome();
        if self.config.headless {
            caps.set_headless()?;
        }
        caps.add_arg(&format!(
            "--window-size={},{}",
            self.config.window_width, self.config.window_height
        ))?;
        if let Some(user_agent) = &self.config.user_agent {
            caps.add_arg(&format!("--user-agent={user_agent}"))?;
        }
        for arg in &self.config.extra_args {
            caps.add_arg(arg)?;
        }
        Ok(caps)
    }
}

#[async_trait]
impl RendererFactory for WebDriverFactory {
    type Renderer = WebDriverRenderer;

    async fn open(&self, site: &SiteConfig) -> RenderResult<WebDriverRenderer> {
        let caps = self
            .capabilities()
            .map_err(|e| RenderError::Startup(format!("invalid browser capabilities: {e}")))?;

        let startup = Duration::from_millis(self.config.startup_timeout_ms);
        let driver = match tokio::time::timeout(startup, WebDriver::new(&self.config.webdriver_url, caps)).await {
            Ok(Ok(driver)) => driver,
            Ok(Err(e)) => {
                return Err(RenderError::Startup(format!(
                    "could not start a session at {}: {}",
                    self.config.webdriver_url, e
                )));
            }
            Err(_) => {
                return Err(RenderError::Startup(format!(
                    "no session from {} within {}ms",
                    self.config.webdriver_url, self.config.startup_timeout_ms
                )));
            }
        };

        let page_load = Duration::from_millis(site.tuning.wait_timeout_ms);
        if let Err(e) = driver.set_page_load_timeout(page_load).await {
            warn!(site = %site.name, "Could not set page load timeout: {}", e);
        }

        info!(site = %site.name, "Browser session started");
        Ok(WebDriverRenderer {
            driver: Some(driver),
            current_url: None,
        })
    }
}
