//! Grocery Price Catalog
//!
//! Crawls grocery retailer listings with a headless browser and reconciles
//! the extracted products into a single SQLite catalog that a read-only API
//! serves for price comparison.

// Module declarations
pub mod domain;
pub mod application;
pub mod infrastructure;

// Re-export the pieces most callers need
pub use application::{ReconciliationDriver, RunSummary, SiteSummary};
pub use domain::{CatalogStore, ProductRecord, SiteConfig, StoredProduct, UpsertOutcome};
