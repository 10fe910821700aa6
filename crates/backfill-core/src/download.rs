//! Download stage.
//!
//! Pages already on disk are forwarded at once without touching a client.
//! Every other page checks out a pooled client (this is where the stage's
//! concurrency is bounded), waits on that client's rate limiter, and fetches
//! within a single per-page deadline. Completion order is whatever the
//! workers produce; the output queue closes only after every worker is done.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::client_pool::{ClientLease, ClientPool};
use crate::error::FetchError;
use crate::page::PageDescriptor;
use crate::progress::ProgressTracker;
use crate::sequencer::wait_for_shutdown;
use crate::store::PageStore;

pub struct DownloadStage {
    pub pool: Arc<ClientPool>,
    pub store: PageStore,
    pub progress: Arc<ProgressTracker>,
    pub page_size: u64,
    /// Deadline covering the limiter wait and the transfer.
    pub page_timeout: Duration,
    /// Output queue capacity.
    pub depth: usize,
    pub shutdown: Option<watch::Receiver<bool>>,
}

impl DownloadStage {
    /// Spawn the stage coordinator; returns the queue of fetched pages.
    pub fn spawn(self, input: mpsc::Receiver<PageDescriptor>) -> mpsc::Receiver<PageDescriptor> {
        let (tx, rx) = mpsc::channel(self.depth.max(1));
        tokio::spawn(self.run(input, tx));
        rx
    }

    async fn run(mut self, mut input: mpsc::Receiver<PageDescriptor>, tx: mpsc::Sender<PageDescriptor>) {
        let mut workers = JoinSet::new();
        let mut passed_over = 0u64;

        while let Some(mut page) = input.recv().await {
            while let Some(res) = workers.try_join_next() {
                log_worker_exit(res);
            }

            if self.store.exists(page.page_id) {
                tracing::debug!(page_id = page.page_id, "already on disk");
                page.skipped = true;
                if !self.progress.is_started() {
                    passed_over += 1;
                }
                if tx.send(page).await.is_err() {
                    break;
                }
                continue;
            }
            self.progress.begin(passed_over, page.page_id, self.page_size);

            let lease = match self.acquire().await {
                Ok(lease) => lease,
                Err(e) => {
                    page.fetch_error = Some(e);
                    if tx.send(page).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let tx = tx.clone();
            let timeout = self.page_timeout;
            workers.spawn(async move {
                let page = fetch_page(lease, page, timeout).await;
                let _ = tx.send(page).await;
            });
        }

        while let Some(res) = workers.join_next().await {
            log_worker_exit(res);
        }
        tracing::debug!("download stage drained");
    }

    async fn acquire(&mut self) -> Result<ClientLease, FetchError> {
        match self.shutdown.as_mut() {
            Some(sd) => tokio::select! {
                biased;
                _ = wait_for_shutdown(sd) => Err(FetchError::Cancelled),
                lease = self.pool.acquire() => lease,
            },
            None => self.pool.acquire().await,
        }
    }
}

fn log_worker_exit(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        tracing::warn!("download worker failed: {}", e);
    }
}

/// Shortest transfer deadline worth starting; curl treats a zero timeout as none.
const MIN_TRANSFER_TIME: Duration = Duration::from_millis(1);

/// Time left for the transfer, or `None` if the deadline is effectively spent.
fn transfer_budget(deadline: Instant, now: Instant) -> Option<Duration> {
    let remaining = deadline.saturating_duration_since(now);
    (remaining >= MIN_TRANSFER_TIME).then_some(remaining)
}

/// Wait on the lease's limiter, then GET the page; the lease is released when
/// the blocking transfer finishes, whatever its outcome.
pub async fn fetch_page(lease: ClientLease, mut page: PageDescriptor, timeout: Duration) -> PageDescriptor {
    let deadline = Instant::now() + timeout;
    let client_index = lease.client().index();
    let proxy = lease
        .client()
        .endpoint()
        .map_or_else(|| "direct".to_string(), ToString::to_string);

    if let Err(e) = lease.wait(timeout).await {
        tracing::warn!(page_id = page.page_id, client = client_index, %proxy, "{}", e);
        page.fetch_error = Some(e);
        return page;
    }

    let Some(remaining) = transfer_budget(deadline, Instant::now()) else {
        tracing::warn!(page_id = page.page_id, client = client_index, %proxy, "deadline spent in limiter");
        page.fetch_error = Some(FetchError::RateLimit(timeout));
        return page;
    };

    let url = page.source_url.clone();
    let res = tokio::task::spawn_blocking(move || {
        let mut lease = lease;
        lease.client_mut().get(&url, remaining)
    })
    .await;

    match res {
        Ok(Ok(body)) => {
            tracing::debug!(
                page_id = page.page_id,
                client = client_index,
                bytes = body.len(),
                "page fetched"
            );
            page.body = Some(body);
        }
        Ok(Err(e)) => {
            tracing::warn!(page_id = page.page_id, client = client_index, %proxy, "fetch failed: {}", e);
            page.fetch_error = Some(e);
        }
        Err(e) => {
            tracing::warn!(page_id = page.page_id, client = client_index, %proxy, "fetch task failed: {}", e);
            page.fetch_error = Some(FetchError::Join(e.to_string()));
        }
    }
    page
}
