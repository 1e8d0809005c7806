//! Page rendering abstraction
//!
//! A [`PageRenderer`] is one browser session driven through a listing: navigate,
//! wait for content, scroll, enumerate item tiles. Two implementations exist:
//! a WebDriver-backed headless browser for live runs and a snapshot renderer
//! that replays saved HTML for offline runs and tests.

pub mod snapshot;
pub mod webdriver;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, sleep};

use crate::domain::SiteConfig;

pub use snapshot::{SnapshotFactory, SnapshotItem, SnapshotRenderer};
pub use webdriver::{WebDriverFactory, WebDriverItem, WebDriverRenderer};

/// Interval between readiness checks while waiting
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("Renderer failed to start: {0}")]
    Startup(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out after {timeout_ms}ms waiting for {condition}")]
    Timeout { condition: String, timeout_ms: u64 },

    #[error("Renderer command failed: {0}")]
    Command(String),

    #[error("Browser session lost: {0}")]
    SessionLost(String),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

impl RenderError {
    /// The session or configuration is unusable; retrying cannot help
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RenderError::Startup(_) | RenderError::SessionLost(_) | RenderError::InvalidSelector { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

/// What a page must show before items are enumerated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// `document.readyState == "complete"`
    DocumentReady,
    /// At least one element matches the selector
    ElementPresent(String),
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitCondition::DocumentReady => f.write_str("document ready"),
            WaitCondition::ElementPresent(selector) => write!(f, "element '{selector}'"),
        }
    }
}

/// One rendered item tile. Lookups are read-only; a selector that matches
/// nothing (or only blank content) yields `Ok(None)`.
#[async_trait]
pub trait ItemHandle: Send + Sync {
    /// Trimmed text of the first element matching `selector`
    async fn find_text(&self, selector: &str) -> RenderResult<Option<String>>;

    /// Trimmed attribute value of the first element matching `selector`
    async fn find_attribute(&self, selector: &str, attribute: &str) -> RenderResult<Option<String>>;
}

#[async_trait]
pub trait PageRenderer: Send {
    type Item: ItemHandle;

    async fn navigate(&mut self, url: &str) -> RenderResult<()>;

    /// URL of the page currently loaded
    fn current_url(&self) -> Option<&str>;

    async fn is_document_ready(&mut self) -> RenderResult<bool>;

    async fn is_present(&mut self, selector: &str) -> RenderResult<bool>;

    async fn scroll_to_bottom(&mut self) -> RenderResult<()>;

    async fn document_height(&mut self) -> RenderResult<u64>;

    async fn find_items(&mut self, selector: &str) -> RenderResult<Vec<Self::Item>>;

    async fn scroll_into_view(&mut self, item: &Self::Item) -> RenderResult<()>;

    /// Release the session. Safe to call more than once.
    async fn close(&mut self) -> RenderResult<()>;

    /// Poll until the condition holds or the timeout passes
    async fn wait_until(&mut self, condition: &WaitCondition, timeout: Duration) -> RenderResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let satisfied = match condition {
                WaitCondition::DocumentReady => self.is_document_ready().await?,
                WaitCondition::ElementPresent(selector) => self.is_present(selector).await?,
            };
            if satisfied {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(RenderError::Timeout {
                    condition: condition.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

/// Opens one renderer per site walk
#[async_trait]
pub trait RendererFactory: Send + Sync {
    type Renderer: PageRenderer + 'static;

    async fn open(&self, site: &SiteConfig) -> RenderResult<Self::Renderer>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RenderError::SessionLost("gone".into()).is_fatal());
        assert!(RenderError::Startup("no driver".into()).is_fatal());
        assert!(!RenderError::Timeout { condition: "x".into(), timeout_ms: 10 }.is_fatal());
        assert!(
            RenderError::Navigation { url: "u".into(), reason: "r".into() }.is_retryable()
        );
    }

    #[test]
    fn test_wait_condition_display() {
        assert_eq!(
            WaitCondition::ElementPresent("div.grid".into()).to_string(),
            "element 'div.grid'"
        );
    }
}
