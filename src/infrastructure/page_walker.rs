//! Page walker - turns one site's listing pages into a stream of records
//!
//! Pages are visited strictly in order with a politeness delay between them.
//! A page that keeps failing to load is skipped after its retries; several
//! skipped pages in a row end the walk early. Only a fatal renderer error
//! (lost session, unusable selector) surfaces as an error item.

use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::domain::{ProductRecord, ReadinessStrategy, SiteConfig, SiteConfigError};
use crate::infrastructure::extraction::{ExtractionError, FieldExtractor, check_selector};
use crate::infrastructure::rendering::{PageRenderer, RenderError, RenderResult, WaitCondition};
use crate::infrastructure::retry_policy::RetryPolicy;

#[derive(Error, Debug)]
pub enum WalkError {
    #[error(transparent)]
    Config(#[from] SiteConfigError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("site '{site}' page {page} ({url})")]
    Fatal {
        site: String,
        page: u32,
        url: String,
        #[source]
        source: RenderError,
    },
}

/// Counters updated while a walk runs
#[derive(Debug, Default)]
pub struct WalkProgress {
    pages_completed: AtomicU32,
    pages_skipped: AtomicU32,
    items_seen: AtomicU64,
    records_rejected: AtomicU64,
    stopped_early: AtomicBool,
}

/// Point-in-time copy of [`WalkProgress`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub pages_completed: u32,
    pub pages_skipped: u32,
    pub items_seen: u64,
    /// Items dropped by the acceptance policy
    pub records_rejected: u64,
    /// Consecutive page failures ended the walk before the last page
    pub stopped_early: bool,
}

impl WalkProgress {
    pub fn stats(&self) -> WalkStats {
        WalkStats {
            pages_completed: self.pages_completed.load(Ordering::Relaxed),
            pages_skipped: self.pages_skipped.load(Ordering::Relaxed),
            items_seen: self.items_seen.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            stopped_early: self.stopped_early.load(Ordering::Relaxed),
        }
    }
}

/// A single pass over a site's pages. Consumed once; not restartable.
pub struct Walk<'a> {
    records: BoxStream<'a, Result<ProductRecord, WalkError>>,
    progress: Arc<WalkProgress>,
}

impl Walk<'_> {
    pub fn progress(&self) -> Arc<WalkProgress> {
        Arc::clone(&self.progress)
    }
}

impl Stream for Walk<'_> {
    type Item = Result<ProductRecord, WalkError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.records.poll_next_unpin(cx)
    }
}

enum PageFailure {
    /// Retries used up; the page is skipped
    Exhausted,
    /// The renderer is unusable; the walk ends
    Fatal(RenderError),
}

struct WalkState<'a, R> {
    walker: &'a PageWalker,
    renderer: &'a mut R,
    pages: Range<u32>,
    buffer: VecDeque<ProductRecord>,
    consecutive_failures: u32,
    first_page: bool,
    done: bool,
    progress: Arc<WalkProgress>,
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    operation: impl Future<Output = RenderResult<T>>,
) -> RenderResult<T> {
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(RenderError::Timeout {
            condition: what.to_string(),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

#[derive(Debug, Clone)]
pub struct PageWalker {
    site: SiteConfig,
    extractor: FieldExtractor,
    page_policy: RetryPolicy,
}

impl PageWalker {
    /// Validate the site description and prepare its extractor
    pub fn new(site: &SiteConfig) -> Result<Self, WalkError> {
        site.validate()?;
        check_selector(&site.name, &site.item_selector)?;
        match &site.readiness_strategy {
            ReadinessStrategy::ElementPresent { selector } => check_selector(&site.name, selector)?,
            ReadinessStrategy::InfiniteScroll { container: Some(selector), .. } => {
                check_selector(&site.name, selector)?
            }
            ReadinessStrategy::InfiniteScroll { container: None, .. } => {}
        }

        Ok(Self {
            extractor: FieldExtractor::for_site(site)?,
            page_policy: RetryPolicy::for_pages(&site.tuning),
            site: site.clone(),
        })
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    /// Walk every page with the given renderer
    pub fn walk<'a, R: PageRenderer + 'a>(&'a self, renderer: &'a mut R) -> Walk<'a> {
        let progress = Arc::new(WalkProgress::default());
        let state = WalkState {
            walker: self,
            renderer,
            pages: self.site.page_indices(),
            buffer: VecDeque::new(),
            consecutive_failures: 0,
            first_page: true,
            done: false,
            progress: Arc::clone(&progress),
        };

        let records = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(record) = state.buffer.pop_front() {
                    return Some((Ok(record), state));
                }
                if state.done {
                    return None;
                }
                let page = state.pages.next()?;

                if !state.first_page {
                    sleep(state.walker.page_delay()).await;
                }
                state.first_page = false;

                match state.walker.visit_page(&mut *state.renderer, page, &state.progress).await {
                    Ok(records) => {
                        state.consecutive_failures = 0;
                        state.progress.pages_completed.fetch_add(1, Ordering::Relaxed);
                        state.buffer.extend(records);
                    }
                    Err(PageFailure::Exhausted) => {
                        state.consecutive_failures += 1;
                        state.progress.pages_skipped.fetch_add(1, Ordering::Relaxed);
                        let limit = state.walker.site.tuning.max_consecutive_failures;
                        if limit > 0 && state.consecutive_failures >= limit && !state.pages.is_empty() {
                            warn!(
                                site = %state.walker.site.name,
                                "{} consecutive pages failed, stopping walk early",
                                state.consecutive_failures
                            );
                            state.progress.stopped_early.store(true, Ordering::Relaxed);
                            state.done = true;
                        }
                    }
                    Err(PageFailure::Fatal(source)) => {
                        state.done = true;
                        let err = WalkError::Fatal {
                            site: state.walker.site.name.clone(),
                            page,
                            url: state.walker.site.page_url(page),
                            source,
                        };
                        return Some((Err(err), state));
                    }
                }
            }
        });

        Walk {
            records: records.boxed(),
            progress,
        }
    }

    /// Fixed delay plus uniform jitter
    fn page_delay(&self) -> Duration {
        let tuning = &self.site.tuning;
        let jitter = if tuning.page_delay_jitter_ms > 0 {
            fastrand::u64(0..=tuning.page_delay_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(tuning.page_delay_ms + jitter)
    }

    async fn visit_page<R: PageRenderer>(
        &self,
        renderer: &mut R,
        page: u32,
        progress: &WalkProgress,
    ) -> Result<Vec<ProductRecord>, PageFailure> {
        let site = &self.site;
        let url = site.page_url(page);
        let mut attempt = 1;

        let items = loop {
            match self.load_page(renderer, &url).await {
                Ok(items) => break items,
                Err(e) if e.is_fatal() => return Err(PageFailure::Fatal(e)),
                Err(e) if self.page_policy.should_retry(&e, attempt) => {
                    let delay = self.page_policy.delay;
                    warn!(
                        site = %site.name, page, attempt, url = %url,
                        "Page load failed: {}; retrying in {:?}", e, delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        site = %site.name, page, url = %url,
                        "Skipping page after {} attempts: {}", attempt, e
                    );
                    return Err(PageFailure::Exhausted);
                }
            }
        };

        if items.is_empty() {
            warn!(site = %site.name, page, url = %url, "No items found on page");
            return Ok(Vec::new());
        }
        progress.items_seen.fetch_add(items.len() as u64, Ordering::Relaxed);

        let item_settle = Duration::from_millis(site.tuning.item_settle_ms);
        let mut records = Vec::with_capacity(items.len());
        for item in &items {
            if site.scroll_items_into_view {
                match renderer.scroll_into_view(item).await {
                    Ok(()) => sleep(item_settle).await,
                    Err(e) if e.is_fatal() => return Err(PageFailure::Fatal(e)),
                    Err(e) => debug!(site = %site.name, page, "Scroll into view failed: {}", e),
                }
            }

            let record = self
                .extractor
                .extract(item, Some(&url))
                .await
                .map_err(PageFailure::Fatal)?;
            if site.record_acceptance_policy.accepts(&record) {
                records.push(record);
            } else {
                progress.records_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(site = %site.name, page, ?record, "Record rejected by acceptance policy");
            }
        }

        info!(
            site = %site.name, page,
            "Page done: {} items, {} records kept",
            items.len(), records.len()
        );
        Ok(records)
    }

    /// Navigate, wait for readiness and enumerate items
    async fn load_page<R: PageRenderer>(&self, renderer: &mut R, url: &str) -> RenderResult<Vec<R::Item>> {
        let site = &self.site;
        let wait = Duration::from_millis(site.tuning.wait_timeout_ms);
        // Outer bound for calls that might hang inside the renderer
        let guard = wait + wait;

        debug!(site = %site.name, url = %url, "Navigating");
        bounded(wait, "navigation", renderer.navigate(url)).await?;
        bounded(guard, "document ready", renderer.wait_until(&WaitCondition::DocumentReady, wait)).await?;

        match &site.readiness_strategy {
            ReadinessStrategy::ElementPresent { selector } => {
                let condition = WaitCondition::ElementPresent(selector.clone());
                bounded(guard, "readiness", renderer.wait_until(&condition, wait)).await?;
            }
            ReadinessStrategy::InfiniteScroll { container, settle_ms, max_scrolls } => {
                if let Some(selector) = container {
                    let condition = WaitCondition::ElementPresent(selector.clone());
                    bounded(guard, "readiness", renderer.wait_until(&condition, wait)).await?;
                }
                self.scroll_until_stable(renderer, Duration::from_millis(*settle_ms), *max_scrolls)
                    .await?;
            }
        }

        bounded(wait, "item listing", renderer.find_items(&site.item_selector)).await
    }

    /// Scroll to the bottom until the document stops growing
    async fn scroll_until_stable<R: PageRenderer>(
        &self,
        renderer: &mut R,
        settle: Duration,
        max_scrolls: u32,
    ) -> RenderResult<()> {
        let mut last_height = renderer.document_height().await?;
        for scroll in 1..=max_scrolls {
            renderer.scroll_to_bottom().await?;
            sleep(settle).await;
            let height = renderer.document_height().await?;
            if height <= last_height {
                debug!(site = %self.site.name, scroll, height, "Page height stable");
                return Ok(());
            }
            last_height = height;
        }
        debug!(site = %self.site.name, max_scrolls, "Scroll limit reached");
        Ok(())
    }
}
