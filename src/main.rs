//! # Documentation portal CLI (`portal`)
//!
//! ## Usage
//!
//! ```bash
//! portal --config ./config/portal.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `portal init` | Create the SQLite cache and its schema |
//! | `portal refresh` | Run one refresh into the cache |
//! | `portal worker` | Refresh on the configured schedule |
//! | `portal serve` | Start the web server |
//! | `portal sources` | Show which upstream sources are configured |
//! | `portal stats` | Summarize the cache |
//! | `portal check-dataset` | Validate a YAML manifest |
//!
//! When the config file doesn't exist, defaults and `PORTAL_*` environment
//! variables are used.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use doc_portal::config::{self, Config, RefreshMode};
use doc_portal::refresh::{self, Refresher};
use doc_portal::store::{MemoryStore, ProjectStore, SqliteStore};
use doc_portal::worker::{run_worker, shutdown_channel, shutdown_on_ctrl_c};
use doc_portal::{dataset, logging, migrate, server, sources, stats};

const DEFAULT_CONFIG: &str = "./config/portal.toml";

/// SPHEREx documentation portal: aggregates document metadata and serves
/// sortable tables per series.
#[derive(Parser)]
#[command(name = "portal", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the cache schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Run a single refresh and print its summary.
    Refresh {
        /// Override `[refresh].mode`: `dataset` or `live`.
        #[arg(long)]
        mode: Option<String>,
    },

    /// Refresh on the `[worker].minutes` schedule until interrupted.
    Worker,

    /// Start the web server.
    Serve {
        /// Also run the refresh worker in this process.
        #[arg(long)]
        with_worker: bool,

        /// Keep the cache in memory instead of the SQLite file.
        /// Requires `--with-worker`.
        #[arg(long, requires = "with_worker")]
        in_memory: bool,
    },

    /// List upstream sources and whether they are configured.
    Sources,

    /// Show cache statistics.
    Stats,

    /// Validate a dataset manifest (default: `[dataset].path`).
    CheckDataset {
        path: Option<PathBuf>,
    },
}

fn load(path: &PathBuf) -> Result<Config> {
    if !path.exists() && path.as_os_str() == DEFAULT_CONFIG {
        return config::from_env();
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that don't need a configuration file
    if let Commands::CheckDataset { path: Some(path) } = &cli.command {
        return dataset::run_check_dataset(path);
    }

    let mut cfg = load(&cli.config)?;
    logging::init_logging(&cfg.app)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Cache initialized at {}", cfg.cache.path.display());
        }
        Commands::Refresh { mode } => {
            if let Some(mode) = mode {
                cfg.refresh.mode = mode.parse::<RefreshMode>()?;
            }
            let store = Arc::new(SqliteStore::open(&cfg).await?);
            let summary = refresh::run_refresh(&cfg, store).await?;
            println!("Refresh {} ({} mode)", summary.id, summary.mode);
            println!("  ingested:  {}", summary.ingested);
            println!("  fallbacks: {}", summary.fallbacks);
            println!("  failed:    {}", summary.failed);
            println!("  skipped:   {}", summary.skipped);
            println!("  pruned:    {}", summary.pruned);
        }
        Commands::Worker => {
            let store = Arc::new(SqliteStore::open(&cfg).await?);
            let refresher = Refresher::new(Arc::new(cfg), store)?;
            let (sender, token) = shutdown_channel();
            shutdown_on_ctrl_c(sender);
            run_worker(&refresher, token).await?;
        }
        Commands::Serve {
            with_worker,
            in_memory,
        } => {
            let store: Arc<dyn ProjectStore> = if in_memory {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(SqliteStore::open(&cfg).await?)
            };
            let (sender, token) = shutdown_channel();
            shutdown_on_ctrl_c(sender);

            if with_worker {
                let refresher = Refresher::new(Arc::new(cfg.clone()), store.clone())?;
                let worker_token = token.clone();
                tokio::spawn(async move {
                    if let Err(e) = run_worker(&refresher, worker_token).await {
                        tracing::error!(error = %format!("{:#}", e), "Worker stopped with error");
                    }
                });
            }

            server::run_server(&cfg, store, token).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::CheckDataset { path } => {
            let path = path.unwrap_or_else(|| cfg.dataset.path.clone());
            dataset::run_check_dataset(&path)?;
        }
    }

    Ok(())
}
