//! Pipeline runner: sequencer → download → persistence → aggregator.
//!
//! Stages are connected by bounded queues so a slow stage back-pressures the
//! ones before it. Each stage closes its output only after its own workers
//! are done, so the aggregator sees every page exactly once.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::aggregator::{aggregate, ErrorLog, RunSummary};
use crate::client_pool::ClientPool;
use crate::config::BackfillConfig;
use crate::download::DownloadStage;
use crate::persist::PersistStage;
use crate::progress::{ProgressStats, ProgressTracker};
use crate::sequencer::{spawn_sequencer, PageSequence, PageUrls};
use crate::store::PageStore;

/// Parameters for one extraction run.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub product: String,
    pub start_id: u64,
    pub api_base: String,
    pub page_size: u64,
    pub page_timeout: Duration,
    pub queue_depth: usize,
    pub save_concurrency: usize,
    pub results_dir: PathBuf,
    pub error_log: PathBuf,
}

impl RunParams {
    /// Run parameters from config; the error log goes to the working directory.
    pub fn from_config(cfg: &BackfillConfig, product: &str, start_id: u64) -> Self {
        Self {
            product: product.to_string(),
            start_id,
            api_base: cfg.api_base.clone(),
            page_size: cfg.page_size,
            page_timeout: cfg.request_timeout(),
            queue_depth: cfg.queue_depth,
            save_concurrency: cfg.save_concurrency,
            results_dir: cfg.results_dir.clone(),
            error_log: PathBuf::from(ErrorLog::file_name(product)),
        }
    }

    /// Reject parameters the sequencer cannot walk.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        if self.start_id == u64::MAX {
            bail!("start id {} is out of range", self.start_id);
        }
        if self.product.is_empty() {
            bail!("product code must not be empty");
        }
        Ok(())
    }
}

pub struct Pipeline {
    params: RunParams,
    pool: Arc<ClientPool>,
    progress: Arc<ProgressTracker>,
    stats_tx: Option<mpsc::Sender<ProgressStats>>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Pipeline {
    pub fn new(params: RunParams, pool: Arc<ClientPool>) -> Self {
        Self {
            params,
            pool,
            progress: Arc::new(ProgressTracker::new()),
            stats_tx: None,
            shutdown: None,
        }
    }

    /// Send a progress snapshot after every page.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressStats>) -> Self {
        self.stats_tx = Some(tx);
        self
    }

    /// Stop generating pages once `rx` holds `true`; in-flight pages drain.
    pub fn with_shutdown(mut self, rx: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(rx);
        self
    }

    pub async fn run(self) -> Result<RunSummary> {
        let p = &self.params;
        p.validate()?;
        let store = PageStore::open(&p.results_dir, &p.product).with_context(|| {
            format!("failed to create {}", p.results_dir.join(&p.product).display())
        })?;
        let mut log = ErrorLog::open(&p.error_log)
            .await
            .with_context(|| format!("failed to open error log {}", p.error_log.display()))?;

        tracing::info!(
            product = %p.product,
            start_id = p.start_id,
            page_size = p.page_size,
            clients = self.pool.size(),
            dir = %store.dir().display(),
            "starting run"
        );

        let urls = PageUrls::new(&p.api_base, &p.product, p.page_size);
        let pages = spawn_sequencer(
            PageSequence::new(urls, p.start_id),
            p.queue_depth,
            self.shutdown.clone(),
        );

        let fetched = DownloadStage {
            pool: Arc::clone(&self.pool),
            store: store.clone(),
            progress: Arc::clone(&self.progress),
            page_size: p.page_size,
            page_timeout: p.page_timeout,
            depth: p.queue_depth,
            shutdown: self.shutdown.clone(),
        }
        .spawn(pages);

        let saved = PersistStage {
            store,
            concurrency: p.save_concurrency,
            depth: p.queue_depth,
        }
        .spawn(fetched);

        let summary = aggregate(saved, &mut log, &self.progress, self.stats_tx.as_ref()).await;
        Ok(summary)
    }
}
