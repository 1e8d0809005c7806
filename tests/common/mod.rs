//! Shared fixtures: listing HTML, site configs and a renderer that fails on cue

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use grocery_price_catalog::domain::{
    AcceptancePolicy, CatalogStore, FieldSelectors, PaginationStyle, ReadinessStrategy, SiteConfig,
    SiteTuning,
};
use grocery_price_catalog::infrastructure::rendering::{
    PageRenderer, RenderError, RenderResult, RendererFactory, SnapshotFactory, SnapshotItem,
    SnapshotRenderer, WaitCondition,
};
use grocery_price_catalog::infrastructure::{DatabaseConnection, SqliteCatalogStore};

pub struct Tile<'a> {
    pub name: Option<&'a str>,
    pub price: Option<&'a str>,
    pub image: Option<&'a str>,
}

pub fn tile<'a>(name: &'a str, price: &'a str) -> Tile<'a> {
    Tile {
        name: Some(name),
        price: Some(price),
        image: Some("http://x/img.png"),
    }
}

/// Listing page in the markup the test site selectors expect
pub fn listing(tiles: &[Tile<'_>]) -> String {
    let body: String = tiles
        .iter()
        .map(|t| {
            let image = t.image.map(|src| format!(r#"<img src="{src}">"#)).unwrap_or_default();
            let name = t.name.map(|n| format!("<h3><a>{n}</a></h3>")).unwrap_or_default();
            let price = t.price.map(|p| format!(r#"<span class="price">{p}</span>"#)).unwrap_or_default();
            format!(r#"<div class="item">{image}{name}{price}</div>"#)
        })
        .collect();
    format!(r#"<html><body><div class="grid">{body}</div></body></html>"#)
}

pub fn site(name: &str, source: &str, max_pages: u32) -> SiteConfig {
    SiteConfig {
        name: name.to_string(),
        enabled: true,
        source_label: source.to_string(),
        base_url_template: format!("https://{name}.test/food?page={{page}}"),
        pagination_style: PaginationStyle::Path,
        page_size: 20,
        start_page: 0,
        max_pages,
        item_selector: "div.item".to_string(),
        field_selectors: FieldSelectors {
            image: vec!["img".to_string()],
            name: vec!["h3 > a".to_string(), "h3".to_string()],
            price: vec!["span.price".to_string()],
        },
        image_attribute: "src".to_string(),
        readiness_strategy: ReadinessStrategy::ElementPresent {
            selector: "div.grid".to_string(),
        },
        record_acceptance_policy: AcceptancePolicy::AnyField,
        scroll_items_into_view: false,
        tuning: SiteTuning::immediate(),
    }
}

pub async fn memory_store() -> Arc<SqliteCatalogStore> {
    let db = DatabaseConnection::open("sqlite::memory:")
        .await
        .expect("in-memory database");
    Arc::new(SqliteCatalogStore::new(Arc::new(db.pool().clone())))
}

pub fn as_dyn(store: &Arc<SqliteCatalogStore>) -> Arc<dyn CatalogStore> {
    store.clone()
}

/// Failure script shared by every renderer a factory opens
#[derive(Default)]
pub struct Script {
    /// Navigation to these URLs always fails with a retryable error
    pub failing_urls: HashSet<String>,
    /// Navigation to these URLs loses the session
    pub fatal_urls: HashSet<String>,
    /// Sites whose renderer cannot start
    pub failing_sites: HashSet<String>,
    pub navigations: Mutex<HashMap<String, u32>>,
    pub opened: AtomicU32,
    pub closed: AtomicU32,
}

impl Script {
    pub fn navigations(&self, url: &str) -> u32 {
        self.navigations
            .lock()
            .expect("navigation log")
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

pub struct FlakyRenderer {
    inner: SnapshotRenderer,
    script: Arc<Script>,
}

#[async_trait]
impl PageRenderer for FlakyRenderer {
    type Item = SnapshotItem;

    async fn navigate(&mut self, url: &str) -> RenderResult<()> {
        *self
            .script
            .navigations
            .lock()
            .expect("navigation log")
            .entry(url.to_string())
            .or_default() += 1;

        if self.script.fatal_urls.contains(url) {
            return Err(RenderError::SessionLost("invalid session id".to_string()));
        }
        if self.script.failing_urls.contains(url) {
            return Err(RenderError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        self.inner.navigate(url).await
    }

    fn current_url(&self) -> Option<&str> {
        self.inner.current_url()
    }

    async fn is_document_ready(&mut self) -> RenderResult<bool> {
        self.inner.is_document_ready().await
    }

    async fn is_present(&mut self, selector: &str) -> RenderResult<bool> {
        self.inner.is_present(selector).await
    }

    async fn scroll_to_bottom(&mut self) -> RenderResult<()> {
        self.inner.scroll_to_bottom().await
    }

    async fn document_height(&mut self) -> RenderResult<u64> {
        self.inner.document_height().await
    }

    async fn find_items(&mut self, selector: &str) -> RenderResult<Vec<SnapshotItem>> {
        self.inner.find_items(selector).await
    }

    async fn scroll_into_view(&mut self, item: &SnapshotItem) -> RenderResult<()> {
        self.inner.scroll_into_view(item).await
    }

    async fn close(&mut self) -> RenderResult<()> {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }

    async fn wait_until(&mut self, condition: &WaitCondition, timeout: Duration) -> RenderResult<()> {
        self.inner.wait_until(condition, timeout).await
    }
}

pub struct FlakyFactory {
    pub pages: SnapshotFactory,
    pub script: Arc<Script>,
}

impl FlakyFactory {
    pub fn new(pages: SnapshotFactory, script: Script) -> Self {
        Self {
            pages,
            script: Arc::new(script),
        }
    }

    pub fn renderer(&self) -> FlakyRenderer {
        FlakyRenderer {
            inner: self.pages.renderer(),
            script: Arc::clone(&self.script),
        }
    }
}

#[async_trait]
impl RendererFactory for FlakyFactory {
    type Renderer = FlakyRenderer;

    async fn open(&self, site: &SiteConfig) -> RenderResult<FlakyRenderer> {
        if self.script.failing_sites.contains(&site.name) {
            return Err(RenderError::Startup(format!(
                "session not created for {}",
                site.name
            )));
        }
        self.script.opened.fetch_add(1, Ordering::SeqCst);
        Ok(self.renderer())
    }
}
