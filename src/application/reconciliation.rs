//! Reconciliation driver - walks each site and upserts what it finds
//!
//! Failures stop at the site boundary: a site whose browser cannot start or
//! whose session dies is reported in the summary while the other sites run.

use futures::StreamExt;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::run_summary::{RunSummary, SiteSummary};
use crate::domain::{CatalogStore, SiteConfig};
use crate::infrastructure::page_walker::{PageWalker, WalkError, WalkStats};
use crate::infrastructure::rendering::{PageRenderer, RendererFactory};

pub struct ReconciliationDriver<F: RendererFactory> {
    factory: F,
    store: Arc<dyn CatalogStore>,
    parallel_sites: bool,
}

impl<F: RendererFactory> ReconciliationDriver<F> {
    pub fn new(factory: F, store: Arc<dyn CatalogStore>) -> Self {
        Self {
            factory,
            store,
            parallel_sites: false,
        }
    }

    /// Walk sites concurrently, each with its own renderer
    pub fn with_parallel_sites(mut self, parallel: bool) -> Self {
        self.parallel_sites = parallel;
        self
    }

    pub async fn run(&self, sites: &[SiteConfig]) -> RunSummary {
        info!(
            "Reconciling {} sites ({})",
            sites.len(),
            if self.parallel_sites { "parallel" } else { "sequential" }
        );

        let summaries = if self.parallel_sites {
            join_all(sites.iter().map(|site| self.reconcile_site(site))).await
        } else {
            let mut summaries = Vec::with_capacity(sites.len());
            for site in sites {
                summaries.push(self.reconcile_site(site).await);
            }
            summaries
        };

        RunSummary { sites: summaries }
    }

    pub async fn reconcile_site(&self, site: &SiteConfig) -> SiteSummary {
        let started = Instant::now();
        let mut summary = SiteSummary::new(site);
        info!(site = %site.name, source = %site.source_label, "Starting site");

        if let Err(e) = self.walk_site(site, &mut summary).await {
            error!(site = %site.name, "Site failed: {:#}", e);
            summary.error = Some(format!("{e:#}"));
        }

        summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        summary.finish();
        summary.log();
        summary
    }

    async fn walk_site(&self, site: &SiteConfig, summary: &mut SiteSummary) -> anyhow::Result<()> {
        let walker = PageWalker::new(site)?;
        let mut renderer = self.factory.open(site).await?;

        let (result, stats) = self.consume(&walker, &mut renderer, summary).await;

        // The session is released whatever happened during the walk
        if let Err(e) = renderer.close().await {
            warn!(site = %site.name, "Failed to close renderer: {}", e);
        }

        summary.pages_completed = stats.pages_completed;
        summary.pages_skipped = stats.pages_skipped;
        summary.records_rejected = stats.records_rejected;
        summary.stopped_early = stats.stopped_early;

        result.map_err(anyhow::Error::from)
    }

    async fn consume<R: PageRenderer + 'static>(
        &self,
        walker: &PageWalker,
        renderer: &mut R,
        summary: &mut SiteSummary,
    ) -> (Result<(), WalkError>, WalkStats) {
        let site = walker.site();
        let mut walk = walker.walk(renderer);
        let progress = walk.progress();

        while let Some(next) = walk.next().await {
            let record = match next {
                Ok(record) => record,
                Err(e) => return (Err(e), progress.stats()),
            };

            let Some(name) = record.storable_name() else {
                summary.counts.skipped += 1;
                debug!(site = %site.name, ?record, "Skipping record without a name");
                continue;
            };

            match self.store.upsert(&record).await {
                Ok(outcome) => {
                    debug!(site = %site.name, name = %name, %outcome, "Upserted");
                    summary.counts.record(outcome);
                }
                Err(e) => {
                    summary.counts.failed += 1;
                    warn!(site = %site.name, name = %name, "Failed to store record: {}", e);
                }
            }
        }

        (Ok(()), progress.stats())
    }
}
