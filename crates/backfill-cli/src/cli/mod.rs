//! CLI for the backfill execution-history extractor.

mod progress;
mod run;

use anyhow::Result;
use backfill_core::config::{self, BackfillConfig};
use clap::Parser;
use std::path::PathBuf;

/// Download the full execution history of a product, one gzip file per page.
#[derive(Debug, Parser)]
#[command(name = "backfill")]
#[command(about = "Resumable bulk download of paginated execution history", long_about = None)]
pub struct Cli {
    /// Product code, e.g. BTC_JPY.
    #[arg(long, default_value = "BTC_JPY")]
    pub product: String,

    /// Execution ID to start from; pages walk backward to ID 1.
    #[arg(long, default_value_t = 636150891)]
    pub start: u64,

    /// API key of the proxy provider.
    #[arg(long = "proxy-key", value_name = "KEY")]
    pub proxy_key: Option<String>,

    /// Requests per minute allowed through each proxy (overrides config).
    #[arg(long, value_name = "N")]
    pub reqpm: Option<u32>,

    /// Records per page (overrides config).
    #[arg(long, value_name = "N")]
    pub page_size: Option<u64>,

    /// Directory for page files (overrides config).
    #[arg(long, value_name = "DIR")]
    pub results_dir: Option<PathBuf>,

    /// Skip proxy provisioning and connect directly.
    #[arg(long, conflicts_with = "proxy_key")]
    pub direct: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded config.
    pub fn apply(&self, cfg: &mut BackfillConfig) {
        if let Some(n) = self.reqpm {
            cfg.requests_per_minute = n;
        }
        if let Some(n) = self.page_size {
            cfg.page_size = n;
        }
        if let Some(ref dir) = self.results_dir {
            cfg.results_dir = dir.clone();
        }
    }

    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        cli.apply(&mut cfg);
        cfg.validate()?;
        tracing::debug!("effective config: {:?}", cfg);

        run::run_backfill(&cli, &cfg).await
    }
}
