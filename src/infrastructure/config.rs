//! Configuration infrastructure
//!
//! Settings are layered in this order, later sources winning:
//! 1. Built-in defaults (`defaults` constants and the `retailers` site list)
//! 2. A JSON or TOML config file
//! 3. `GROCERY_CATALOG__*` environment variables (`__` separates nesting levels)

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::domain::{SiteConfig, SiteConfigError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not determine the user configuration directory")]
    NoConfigDir,

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error(transparent)]
    Site(#[from] SiteConfigError),

    #[error("Unknown site '{name}' (configured: {available})")]
    UnknownSite { name: String, available: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub renderer: RendererConfig,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub reconciliation: ReconciliationConfig,
    /// Retailer listings to walk, in run order
    pub sites: Vec<SiteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL, e.g. `sqlite:products.db` or `sqlite::memory:`
    pub url: String,
}

/// Headless browser settings shared by every site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// WebDriver endpoint (chromedriver)
    pub webdriver_url: String,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    /// Extra Chrome command line switches
    pub extra_args: Vec<String>,
    /// Upper bound on starting a browser session
    pub startup_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level or filter directive (`info`, `debug`, `trace`, ...)
    pub level: String,
    pub console_output: bool,
    pub file_output: bool,
    /// JSON lines in the log file
    pub json_format: bool,
    /// Log directory; defaults to `logs/` next to the executable
    pub log_dir: Option<PathBuf>,
    pub file_name: String,
    /// Log files kept after rotation, the current one included
    pub max_files: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Walk sites concurrently, each with its own renderer
    pub parallel_sites: bool,
}

/// Default configuration values
pub mod defaults {
    pub const DATABASE_URL: &str = "sqlite:products.db";

    pub const WEBDRIVER_URL: &str = "http://localhost:9515";
    pub const WINDOW_WIDTH: u32 = 1920;
    pub const WINDOW_HEIGHT: u32 = 1080;
    pub const RENDERER_STARTUP_TIMEOUT_MS: u64 = 60_000;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "grocery-price-catalog.log";
    pub const LOG_MAX_FILES: usize = 10;

    pub const SERVER_BIND_ADDRESS: &str = "127.0.0.1";
    pub const SERVER_PORT: u16 = 5000;

    pub const CONFIG_DIR_NAME: &str = "grocery-price-catalog";
    pub const CONFIG_FILE_NAME: &str = "config.json";
    pub const ENV_PREFIX: &str = "GROCERY_CATALOG";
    pub const ENV_SEPARATOR: &str = "__";
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            renderer: RendererConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            sites: retailers::all(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: defaults::DATABASE_URL.to_string(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            webdriver_url: defaults::WEBDRIVER_URL.to_string(),
            headless: true,
            window_width: defaults::WINDOW_WIDTH,
            window_height: defaults::WINDOW_HEIGHT,
            user_agent: None,
            extra_args: vec!["--no-sandbox".to_string(), "--disable-dev-shm-usage".to_string()],
            startup_timeout_ms: defaults::RENDERER_STARTUP_TIMEOUT_MS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            console_output: true,
            file_output: true,
            json_format: false,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
            max_files: defaults::LOG_MAX_FILES,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::SERVER_BIND_ADDRESS.to_string(),
            port: defaults::SERVER_PORT,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "database.url must not be empty".to_string(),
            });
        }
        if self.renderer.window_width == 0 || self.renderer.window_height == 0 {
            return Err(ConfigError::Validation {
                message: "renderer window size must be non-zero".to_string(),
            });
        }
        if self.logging.max_files == 0 {
            return Err(ConfigError::Validation {
                message: "logging.max_files must be at least 1".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for site in &self.sites {
            site.validate()?;
            if !seen.insert(site.name.as_str()) {
                return Err(ConfigError::Validation {
                    message: format!("duplicate site name '{}'", site.name),
                });
            }
        }
        Ok(())
    }

    /// Sites for a run: the named ones in the given order, or every enabled site
    pub fn select_sites(&self, names: &[String]) -> Result<Vec<SiteConfig>, ConfigError> {
        if names.is_empty() {
            return Ok(self.sites.iter().filter(|s| s.enabled).cloned().collect());
        }

        names
            .iter()
            .map(|name| {
                self.sites
                    .iter()
                    .find(|s| s.name.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownSite {
                        name: name.clone(),
                        available: self
                            .sites
                            .iter()
                            .map(|s| s.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    })
            })
            .collect()
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    pub config_path: PathBuf,
    /// A path given on the command line must exist
    required: bool,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
        Ok(dirs::config_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join(defaults::CONFIG_DIR_NAME))
    }

    /// Manager for the per-user default config file, which may be absent
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            config_path: Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME),
            required: false,
        })
    }

    /// Manager for an explicit config file, which must exist when loading
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
            required: true,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load defaults, the config file and environment overrides, then validate
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(self.config_path.as_path()).required(self.required))
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator(defaults::ENV_SEPARATOR)
                    .separator(defaults::ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;

        if self.config_path.exists() {
            info!("Loaded configuration from: {:?}", self.config_path);
        } else {
            info!("No configuration file at {:?}, using defaults", self.config_path);
        }
        Ok(config)
    }

    /// Save configuration as pretty JSON
    pub async fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|source| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: self.config_path.clone(),
                source,
            })?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    /// Write the built-in defaults; an existing file is kept unless `force`.
    /// Returns whether a file was written.
    pub async fn write_default(&self, force: bool) -> Result<bool, ConfigError> {
        if self.config_path.exists() && !force {
            return Ok(false);
        }
        self.save_config(&AppConfig::default()).await?;
        Ok(true)
    }
}

/// Built-in retailer listings
pub mod retailers {
    use crate::domain::site::defaults as site_defaults;
    use crate::domain::{
        AcceptancePolicy, FieldSelectors, PaginationStyle, ReadinessStrategy, SiteConfig,
        SiteTuning,
    };

    fn selectors(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    pub fn all() -> Vec<SiteConfig> {
        vec![woolworths(), checkers(), pick_n_pay()]
    }

    pub fn checkers() -> SiteConfig {
        SiteConfig {
            name: "checkers".to_string(),
            enabled: true,
            source_label: "Checkers".to_string(),
            base_url_template: "https://www.checkers.co.za/c-2413/All-Departments/Food?q=%3Arelevance%3AbrowseAllStoresFacetOff%3AbrowseAllStoresFacetOff&page={page}".to_string(),
            pagination_style: PaginationStyle::Path,
            page_size: 20,
            start_page: 0,
            max_pages: 355,
            item_selector: "div.item-product".to_string(),
            field_selectors: FieldSelectors {
                image: selectors(&["div.item-product__image.__image > a > img", "div.item-product__image img"]),
                name: selectors(&["h3.item-product__name > a", "h3.item-product__name"]),
                price: selectors(&["div.special-price__price > span", "div.special-price__price"]),
            },
            image_attribute: site_defaults::IMAGE_ATTRIBUTE.to_string(),
            readiness_strategy: ReadinessStrategy::ElementPresent {
                selector: "div.product__listing.product__grid".to_string(),
            },
            record_acceptance_policy: AcceptancePolicy::AllFields,
            scroll_items_into_view: false,
            tuning: SiteTuning {
                wait_timeout_ms: 30_000,
                page_delay_ms: 2_000,
                page_delay_jitter_ms: 1_000,
                ..SiteTuning::default()
            },
        }
    }

    pub fn woolworths() -> SiteConfig {
        SiteConfig {
            name: "woolworths".to_string(),
            enabled: true,
            source_label: "Woolworths".to_string(),
            base_url_template: "https://www.woolworths.co.za/cat/Food/_/N-1z13sk5?No={offset}&Nrpp={page_size}".to_string(),
            pagination_style: PaginationStyle::Offset,
            page_size: 24,
            start_page: 0,
            max_pages: 322,
            item_selector: "div.product-list__item".to_string(),
            field_selectors: FieldSelectors {
                image: selectors(&["div.product--image > img", "div.product--image img"]),
                name: selectors(&["div.range--title.product-card__name > a", "div.product--desc > a > h2"]),
                price: selectors(&["span.font-graphic > strong", "strong.price"]),
            },
            image_attribute: site_defaults::IMAGE_ATTRIBUTE.to_string(),
            readiness_strategy: ReadinessStrategy::InfiniteScroll {
                container: Some("div.banner-wrapper".to_string()),
                settle_ms: 2_000,
                max_scrolls: site_defaults::max_scrolls(),
            },
            record_acceptance_policy: AcceptancePolicy::AnyField,
            scroll_items_into_view: true,
            tuning: SiteTuning {
                wait_timeout_ms: 50_000,
                page_delay_ms: 2_000,
                page_delay_jitter_ms: 3_000,
                item_settle_ms: 500,
                ..SiteTuning::default()
            },
        }
    }

    pub fn pick_n_pay() -> SiteConfig {
        SiteConfig {
            name: "pnp".to_string(),
            enabled: true,
            source_label: "Pick n pay".to_string(),
            base_url_template: "https://www.pnp.co.za/c/pnpbase?query=:relevance:allCategories:pnpbase:category:food-cupboard-423144840&currentPage={page}".to_string(),
            pagination_style: PaginationStyle::Path,
            page_size: 72,
            start_page: 0,
            max_pages: 3,
            item_selector: "ui-product-grid-item.ng-star-inserted".to_string(),
            field_selectors: FieldSelectors {
                image: selectors(&["img"]),
                name: selectors(&["div.product-grid-item__info-container > a > span", "div.product-grid-item__info-container a"]),
                price: selectors(&["div.cms-price-display > div > div.price", "div.price"]),
            },
            image_attribute: site_defaults::IMAGE_ATTRIBUTE.to_string(),
            readiness_strategy: ReadinessStrategy::ElementPresent {
                selector: "div.cx-product-container--grid.ml-0.mr-0.ng-star-inserted".to_string(),
            },
            record_acceptance_policy: AcceptancePolicy::AnyField,
            scroll_items_into_view: false,
            tuning: SiteTuning {
                wait_timeout_ms: 30_000,
                page_delay_ms: 1_000,
                page_delay_jitter_ms: 1_000,
                ..SiteTuning::default()
            },
        }
    }
}
