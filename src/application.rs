//! Application layer module
//!
//! Orchestrates a reconciliation run over the configured sites.

pub mod reconciliation;
pub mod run_summary;

pub use reconciliation::ReconciliationDriver;
pub use run_summary::{RunSummary, SiteStatus, SiteSummary, UpsertCounts};
