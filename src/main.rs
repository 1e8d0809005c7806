//! grocery-price-catalog command line
//!
//! `reconcile` walks the configured retailers and upserts into the catalog,
//! `serve` exposes the catalog over HTTP, `products` prints it,
//! `init-config` writes the default configuration file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use grocery_price_catalog::application::ReconciliationDriver;
use grocery_price_catalog::domain::{CatalogStore, SiteConfig};
use grocery_price_catalog::infrastructure::{
    AppConfig, ConfigManager, DatabaseConnection, RendererFactory, SnapshotFactory,
    SqliteCatalogStore, WebDriverFactory, api_server, init_logging_with_config, log_system_info,
};

#[derive(Debug, Parser)]
#[command(name = "grocery-price-catalog", version, about = "Grocery price catalog crawler and API")]
struct Cli {
    /// Configuration file (JSON or TOML); defaults to the per-user config
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the database URL
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Walk retailer listings and reconcile products into the catalog
    Reconcile {
        /// Only these sites, in this order (default: every enabled site)
        #[arg(short, long = "site")]
        sites: Vec<String>,

        /// Replay saved pages from a directory with manifest.json instead of a browser
        #[arg(long)]
        snapshots: Option<PathBuf>,

        /// Walk sites concurrently
        #[arg(long)]
        parallel: bool,
    },
    /// Serve the read-only catalog API
    Serve {
        #[arg(long)]
        bind: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the catalog
    Products {
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn config_manager(path: Option<PathBuf>) -> Result<ConfigManager> {
    match path {
        Some(path) => Ok(ConfigManager::with_path(path)),
        None => ConfigManager::new().context("resolving the configuration path"),
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn CatalogStore>> {
    let db = DatabaseConnection::open(&config.database.url)
        .await
        .with_context(|| format!("opening catalog database {}", config.database.url))?;
    Ok(Arc::new(SqliteCatalogStore::new(Arc::new(db.pool().clone()))))
}

async fn reconcile<F: RendererFactory>(
    factory: F,
    store: Arc<dyn CatalogStore>,
    sites: &[SiteConfig],
    parallel: bool,
) -> ExitCode {
    let summary = ReconciliationDriver::new(factory, store)
        .with_parallel_sites(parallel)
        .run(sites)
        .await;
    summary.log();
    ExitCode::from(summary.exit_code())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let manager = config_manager(cli.config)?;

    if let Command::InitConfig { force } = cli.command {
        let written = manager.write_default(force).await?;
        if written {
            println!("Wrote default configuration to {}", manager.config_path().display());
        } else {
            println!(
                "{} already exists (use --force to overwrite)",
                manager.config_path().display()
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = manager.load().context("loading configuration")?;
    if let Some(url) = cli.database {
        config.database.url = url;
    }
    init_logging_with_config(&config.logging)?;
    log_system_info();

    match cli.command {
        Command::Reconcile { sites, snapshots, parallel } => {
            let selected = config.select_sites(&sites)?;
            let parallel = parallel || config.reconciliation.parallel_sites;
            let store = open_store(&config).await?;

            let code = match snapshots {
                Some(dir) => {
                    let factory = SnapshotFactory::load_dir(&dir).await?;
                    info!("Replaying {} saved pages from {}", factory.len(), dir.display());
                    reconcile(factory, store, &selected, parallel).await
                }
                None => {
                    let factory = WebDriverFactory::new(config.renderer.clone());
                    reconcile(factory, store, &selected, parallel).await
                }
            };
            Ok(code)
        }
        Command::Serve { bind, port } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            let store = open_store(&config).await?;
            api_server::serve(store, &config.server).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Products { json } => {
            let store = open_store(&config).await?;
            let products = store.list_all().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&products)?);
            } else {
                for p in &products {
                    println!(
                        "{:>6}  {:<12}  {:<12}  {}",
                        p.id,
                        p.source,
                        p.price.as_deref().unwrap_or("-"),
                        p.name
                    );
                }
                println!("{} products", products.len());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::InitConfig { .. } => Ok(ExitCode::SUCCESS),
    }
}
