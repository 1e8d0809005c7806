//! Per-site and per-run reconciliation results

use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

use crate::domain::{SiteConfig, UpsertOutcome};

/// Outcome counts for one site
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Records without a usable name
    pub skipped: u64,
    /// Records the store rejected or failed to write
    pub failed: u64,
}

impl UpsertCounts {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Records written or confirmed in the store
    pub fn stored(&self) -> u64 {
        self.inserted + self.updated + self.unchanged
    }

    /// Every record the walk produced
    pub fn total(&self) -> u64 {
        self.stored() + self.skipped + self.failed
    }

    pub fn merge(&mut self, other: &UpsertCounts) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

impl fmt::Display for UpsertCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} updated={} unchanged={} skipped={} failed={}",
            self.inserted, self.updated, self.unchanged, self.skipped, self.failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    /// Every page loaded and no error occurred
    Completed,
    /// Records were produced but pages were skipped or the walk ended on an error
    Partial,
    /// Nothing was produced and something went wrong
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteSummary {
    pub site: String,
    pub source: String,
    pub status: SiteStatus,
    pub counts: UpsertCounts,
    pub pages_completed: u32,
    pub pages_skipped: u32,
    pub records_rejected: u64,
    pub stopped_early: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl SiteSummary {
    pub fn new(site: &SiteConfig) -> Self {
        Self {
            site: site.name.clone(),
            source: site.source_label.clone(),
            status: SiteStatus::Completed,
            counts: UpsertCounts::default(),
            pages_completed: 0,
            pages_skipped: 0,
            records_rejected: 0,
            stopped_early: false,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn produced_records(&self) -> bool {
        self.counts.total() > 0
    }

    /// Derive the status from counts, skipped pages and the error
    pub fn finish(&mut self) {
        let troubled = self.error.is_some() || self.pages_skipped > 0;
        self.status = match (troubled, self.produced_records()) {
            (false, _) => SiteStatus::Completed,
            (true, true) => SiteStatus::Partial,
            (true, false) => SiteStatus::Failed,
        };
    }

    pub fn log(&self) {
        let pages = format!("pages ok={} skipped={}", self.pages_completed, self.pages_skipped);
        match self.status {
            SiteStatus::Completed => info!(
                site = %self.site,
                "completed in {}ms: {}, {}", self.elapsed_ms, self.counts, pages
            ),
            SiteStatus::Partial => warn!(
                site = %self.site,
                "partial in {}ms: {}, {}{}",
                self.elapsed_ms,
                self.counts,
                pages,
                self.error.as_deref().map(|e| format!(", error: {e}")).unwrap_or_default()
            ),
            SiteStatus::Failed => error!(
                site = %self.site,
                "failed in {}ms: {}",
                self.elapsed_ms,
                self.error.as_deref().unwrap_or("no records produced")
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub sites: Vec<SiteSummary>,
}

impl RunSummary {
    pub fn totals(&self) -> UpsertCounts {
        let mut totals = UpsertCounts::default();
        for site in &self.sites {
            totals.merge(&site.counts);
        }
        totals
    }

    pub fn produced_any(&self) -> bool {
        self.sites.iter().any(SiteSummary::produced_records)
    }

    /// 0 when at least one site produced records, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.produced_any())
    }

    pub fn log(&self) {
        for site in &self.sites {
            site.log();
        }
        info!("Run totals: {} across {} sites", self.totals(), self.sites.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::retailers;

    fn summary(counts: UpsertCounts, skipped_pages: u32, error: Option<&str>) -> SiteSummary {
        let mut summary = SiteSummary::new(&retailers::checkers());
        summary.counts = counts;
        summary.pages_skipped = skipped_pages;
        summary.error = error.map(str::to_string);
        summary.finish();
        summary
    }

    #[test]
    fn test_status_derivation() {
        let some = UpsertCounts { inserted: 2, ..UpsertCounts::default() };

        assert_eq!(summary(some, 0, None).status, SiteStatus::Completed);
        assert_eq!(summary(some, 1, None).status, SiteStatus::Partial);
        assert_eq!(summary(some, 0, Some("session lost")).status, SiteStatus::Partial);
        assert_eq!(summary(UpsertCounts::default(), 0, Some("no driver")).status, SiteStatus::Failed);
        assert_eq!(summary(UpsertCounts::default(), 0, None).status, SiteStatus::Completed);
    }

    #[test]
    fn test_exit_code_is_nonzero_only_when_nothing_produced() {
        let failed = summary(UpsertCounts::default(), 0, Some("no driver"));
        let partial = summary(UpsertCounts { unchanged: 1, ..UpsertCounts::default() }, 2, None);

        let all_failed = RunSummary { sites: vec![failed.clone(), failed.clone()] };
        assert_eq!(all_failed.exit_code(), 1);

        let mixed = RunSummary { sites: vec![failed, partial] };
        assert_eq!(mixed.exit_code(), 0);
        assert_eq!(RunSummary::default().exit_code(), 1);
    }

    #[test]
    fn test_totals_merge_sites() {
        let a = summary(UpsertCounts { inserted: 2, failed: 1, ..UpsertCounts::default() }, 0, None);
        let b = summary(UpsertCounts { updated: 3, skipped: 1, ..UpsertCounts::default() }, 0, None);
        let totals = RunSummary { sites: vec![a, b] }.totals();
        assert_eq!(totals.total(), 7);
        assert_eq!(totals.stored(), 5);
    }
}
