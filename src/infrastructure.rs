//! Infrastructure layer: database, browser rendering, extraction, HTTP API
//! and the ambient plumbing (configuration, logging).

pub mod api_server;
pub mod config;
pub mod database_connection;
pub mod extraction;
pub mod logging;
pub mod page_walker;
pub mod product_repository;
pub mod rendering;
pub mod retry_policy;

// Re-export commonly used items
pub use config::{AppConfig, ConfigError, ConfigManager};
pub use database_connection::DatabaseConnection;
pub use extraction::{ExtractionError, FieldExtractor};
pub use logging::{init_logging, init_logging_with_config, log_system_info};
pub use page_walker::{PageWalker, Walk, WalkError, WalkStats};
pub use product_repository::SqliteCatalogStore;
pub use rendering::{
    PageRenderer, RenderError, RendererFactory, SnapshotFactory, WebDriverFactory,
};
pub use retry_policy::RetryPolicy;
