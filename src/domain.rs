//! Domain module - products, retailer site descriptions and the catalog store contract
//!
//! Nothing in here talks to a browser or a database directly; the
//! infrastructure layer implements the traits declared here.

pub mod product;
pub mod repositories;
pub mod site;

pub use product::{ProductField, ProductRecord, StoredProduct, UpsertOutcome};
pub use repositories::{CatalogStore, StoreError};
pub use site::{
    AcceptancePolicy, FieldSelectors, PaginationStyle, ReadinessStrategy, SiteConfig,
    SiteConfigError, SiteTuning,
};
