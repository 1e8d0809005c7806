//! Renderer over saved HTML
//!
//! Each URL maps to one or more HTML states. Scrolling to the bottom advances
//! to the next state, which is how lazily loaded listings are replayed.
//! `scraper` documents are not `Send`, so every parse happens inside a
//! synchronous helper and only strings cross an `.await`.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{ItemHandle, PageRenderer, RenderError, RenderResult, RendererFactory, WaitCondition};
use crate::domain::SiteConfig;

fn parse_selector(selector: &str) -> RenderResult<Selector> {
    Selector::parse(selector).map_err(|e| RenderError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Collapse runs of whitespace the way a browser renders text
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn select_count(html: &str, selector: &str) -> RenderResult<usize> {
    let selector = parse_selector(selector)?;
    Ok(Html::parse_document(html).select(&selector).count())
}

fn select_outer_html(html: &str, selector: &str) -> RenderResult<Vec<String>> {
    let selector = parse_selector(selector)?;
    Ok(Html::parse_document(html)
        .select(&selector)
        .map(|element| element.html())
        .collect())
}

/// First descendant of the item matching `selector`. The item element itself
/// is out of scope, as with a WebDriver element lookup.
fn select_in_item<'a>(html: &'a Html, selector: &Selector) -> Option<ElementRef<'a>> {
    html.root_element()
        .children()
        .find_map(ElementRef::wrap)
        .and_then(|item| item.select(selector).next())
}

fn fragment_text(fragment: &str, selector: &str) -> RenderResult<Option<String>> {
    let selector = parse_selector(selector)?;
    let html = Html::parse_fragment(fragment);
    Ok(select_in_item(&html, &selector)
        .and_then(|element| non_empty(normalize_text(&element.text().collect::<String>()))))
}

fn fragment_attribute(fragment: &str, selector: &str, attribute: &str) -> RenderResult<Option<String>> {
    let selector = parse_selector(selector)?;
    let html = Html::parse_fragment(fragment);
    Ok(select_in_item(&html, &selector)
        .and_then(|element| element.value().attr(attribute))
        .and_then(|value| non_empty(value.trim().to_string())))
}

/// One item tile, held as its outer HTML
#[derive(Debug, Clone)]
pub struct SnapshotItem {
    html: String,
}

impl SnapshotItem {
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    pub fn html(&self) -> &str {
        &self.html
    }
}

#[async_trait]
impl ItemHandle for SnapshotItem {
    async fn find_text(&self, selector: &str) -> RenderResult<Option<String>> {
        fragment_text(&self.html, selector)
    }

    async fn find_attribute(&self, selector: &str, attribute: &str) -> RenderResult<Option<String>> {
        fragment_attribute(&self.html, selector, attribute)
    }
}

type Pages = Arc<HashMap<String, Vec<String>>>;

pub struct SnapshotRenderer {
    pages: Pages,
    current_url: Option<String>,
    /// Index into the current page's scroll states
    state: usize,
    closed: bool,
}

impl SnapshotRenderer {
    fn new(pages: Pages) -> Self {
        Self {
            pages,
            current_url: None,
            state: 0,
            closed: false,
        }
    }

    fn ensure_open(&self) -> RenderResult<()> {
        if self.closed {
            return Err(RenderError::SessionLost("snapshot renderer closed".to_string()));
        }
        Ok(())
    }

    fn current_html(&self) -> RenderResult<&str> {
        self.ensure_open()?;
        let url = self
            .current_url
            .as_deref()
            .ok_or_else(|| RenderError::Command("no page loaded".to_string()))?;
        let states = self
            .pages
            .get(url)
            .ok_or_else(|| RenderError::Command(format!("no snapshot for {url}")))?;
        Ok(states.get(self.state).or(states.last()).map(String::as_str).unwrap_or_default())
    }
}

#[async_trait]
impl PageRenderer for SnapshotRenderer {
    type Item = SnapshotItem;

    async fn navigate(&mut self, url: &str) -> RenderResult<()> {
        self.ensure_open()?;
        if !self.pages.contains_key(url) {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                reason: "no snapshot recorded for this URL".to_string(),
            });
        }
        self.current_url = Some(url.to_string());
        self.state = 0;
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    async fn is_document_ready(&mut self) -> RenderResult<bool> {
        self.current_html().map(|_| true)
    }

    async fn is_present(&mut self, selector: &str) -> RenderResult<bool> {
        Ok(select_count(self.current_html()?, selector)? > 0)
    }

    async fn scroll_to_bottom(&mut self) -> RenderResult<()> {
        self.current_html()?;
        let last = self
            .current_url
            .as_deref()
            .and_then(|url| self.pages.get(url))
            .map_or(0, |states| states.len().saturating_sub(1));
        self.state = (self.state + 1).min(last);
        Ok(())
    }

    async fn document_height(&mut self) -> RenderResult<u64> {
        Ok(self.current_html()?.len() as u64)
    }

    async fn find_items(&mut self, selector: &str) -> RenderResult<Vec<SnapshotItem>> {
        Ok(select_outer_html(self.current_html()?, selector)?
            .into_iter()
            .map(SnapshotItem::new)
            .collect())
    }

    async fn scroll_into_view(&mut self, _item: &SnapshotItem) -> RenderResult<()> {
        self.ensure_open()
    }

    async fn close(&mut self) -> RenderResult<()> {
        self.closed = true;
        Ok(())
    }

    /// A snapshot never changes on its own, so one check decides the wait
    async fn wait_until(&mut self, condition: &WaitCondition, timeout: Duration) -> RenderResult<()> {
        let satisfied = match condition {
            WaitCondition::DocumentReady => self.is_document_ready().await?,
            WaitCondition::ElementPresent(selector) => self.is_present(selector).await?,
        };
        if satisfied {
            Ok(())
        } else {
            Err(RenderError::Timeout {
                condition: condition.to_string(),
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        }
    }
}

/// Manifest entry: one file, or successive scroll states
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestEntry {
    Single(String),
    States(Vec<String>),
}

/// Hands out renderers that share one immutable set of pages
#[derive(Debug, Clone, Default)]
pub struct SnapshotFactory {
    pages: Pages,
}

impl SnapshotFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, html: impl Into<String>) -> &mut Self {
        self.insert_states(url, vec![html.into()])
    }

    /// Page whose content grows each time it is scrolled to the bottom
    pub fn insert_states(&mut self, url: impl Into<String>, states: Vec<String>) -> &mut Self {
        Arc::make_mut(&mut self.pages).insert(url.into(), states);
        self
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Load `manifest.json` (`{"<url>": "file.html" | ["state0.html", ...]}`)
    /// and the HTML files it names from `dir`
    pub async fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let manifest_path = dir.join("manifest.json");
        let manifest = tokio::fs::read_to_string(&manifest_path)
            .await
            .with_context(|| format!("reading {}", manifest_path.display()))?;
        let entries: HashMap<String, ManifestEntry> = serde_json::from_str(&manifest)
            .with_context(|| format!("parsing {}", manifest_path.display()))?;

        let mut factory = Self::new();
        for (url, entry) in entries {
            let files = match entry {
                ManifestEntry::Single(file) => vec![file],
                ManifestEntry::States(files) => files,
            };
            let mut states = Vec::with_capacity(files.len());
            for file in files {
                let path = dir.join(&file);
                states.push(
                    tokio::fs::read_to_string(&path)
                        .await
                        .with_context(|| format!("reading snapshot {}", path.display()))?,
                );
            }
            factory.insert_states(url, states);
        }

        debug!("Loaded {} snapshot pages from {}", factory.len(), dir.display());
        Ok(factory)
    }

    /// Renderer over the current pages, usable without a site
    pub fn renderer(&self) -> SnapshotRenderer {
        SnapshotRenderer::new(Arc::clone(&self.pages))
    }
}

#[async_trait]
impl RendererFactory for SnapshotFactory {
    type Renderer = SnapshotRenderer;

    async fn open(&self, site: &SiteConfig) -> RenderResult<SnapshotRenderer> {
        debug!(site = %site.name, "Opening snapshot renderer");
        Ok(self.renderer())
    }
}
