//! Persistence stage: gzip fetched bodies to disk under a save ceiling.
//!
//! Disk writes are not proxy-limited, so the ceiling is independent of (and
//! normally much larger than) the client pool. Pages that failed to fetch or
//! were already on disk pass straight through.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::error::SaveError;
use crate::page::PageDescriptor;
use crate::store::{PageSink, PageStore};

pub struct PersistStage<S: PageSink = PageStore> {
    pub store: S,
    /// Maximum saves in flight.
    pub concurrency: usize,
    /// Output queue capacity.
    pub depth: usize,
}

impl<S: PageSink> PersistStage<S> {
    pub fn spawn(self, input: mpsc::Receiver<PageDescriptor>) -> mpsc::Receiver<PageDescriptor> {
        let (tx, rx) = mpsc::channel(self.depth.max(1));
        tokio::spawn(self.run(input, tx));
        rx
    }

    async fn run(self, mut input: mpsc::Receiver<PageDescriptor>, tx: mpsc::Sender<PageDescriptor>) {
        let slots = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let mut workers = JoinSet::new();

        while let Some(mut page) = input.recv().await {
            while let Some(res) = workers.try_join_next() {
                log_worker_exit(res);
            }

            if !page.needs_save() {
                if tx.send(page).await.is_err() {
                    break;
                }
                continue;
            }

            let permit = match Arc::clone(&slots).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    page.save_error = Some(SaveError::Join(e.to_string()));
                    if tx.send(page).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let store = self.store.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let page = save_page(&store, page).await;
                drop(permit);
                let _ = tx.send(page).await;
            });
        }

        while let Some(res) = workers.join_next().await {
            log_worker_exit(res);
        }
        tracing::debug!("persistence stage drained");
    }
}

fn log_worker_exit(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        tracing::warn!("save worker failed: {}", e);
    }
}

/// Write the page body (taking it off the descriptor) and record the outcome.
pub async fn save_page<S: PageSink>(store: &S, mut page: PageDescriptor) -> PageDescriptor {
    let page_id = page.page_id;
    let body = page.body.take();
    let store = store.clone();
    let res = tokio::task::spawn_blocking(move || store.save(page_id, body.as_deref())).await;

    match res {
        Ok(Ok(written)) => {
            tracing::debug!(page_id, bytes = written, "page saved");
        }
        Ok(Err(e)) => {
            tracing::warn!(page_id, "save failed: {}", e);
            page.save_error = Some(e);
        }
        Err(e) => {
            tracing::warn!(page_id, "save task failed: {}", e);
            page.save_error = Some(SaveError::Join(e.to_string()));
        }
    }
    page
}
