//! Page sequencer: walks the execution ID space backward from a start ID.
//!
//! Page for `id` asks for `before = id + 1` and `after = max(1, id - page_size)`;
//! the next page starts at that `after`. The walk ends once `after` reaches 1.

use tokio::sync::{mpsc, watch};

use crate::page::PageDescriptor;

/// Builds page URLs for one product against one executions API.
#[derive(Debug, Clone)]
pub struct PageUrls {
    api_base: String,
    product: String,
    page_size: u64,
}

impl PageUrls {
    pub fn new(api_base: &str, product: &str, page_size: u64) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            product: product.to_string(),
            page_size,
        }
    }

    /// Lower bound for the page whose highest ID is `id`.
    pub fn lower_bound(&self, id: u64) -> u64 {
        id.saturating_sub(self.page_size).max(1)
    }

    /// Descriptor for the page whose highest ID is `id`.
    pub fn page(&self, id: u64) -> PageDescriptor {
        let after = self.lower_bound(id);
        let url = format!(
            "{}/v1/executions?product_code={}&count={}&before={}&after={}",
            self.api_base,
            self.product,
            self.page_size,
            id + 1,
            after
        );
        PageDescriptor::new(url, id, after)
    }
}

/// Lazy, finite, ordered walk over page descriptors.
#[derive(Debug, Clone)]
pub struct PageSequence {
    urls: PageUrls,
    next: Option<u64>,
}

impl PageSequence {
    /// Sequence starting at `start_id`. A start ID of 0 yields nothing.
    pub fn new(urls: PageUrls, start_id: u64) -> Self {
        Self {
            urls,
            next: (start_id > 0).then_some(start_id),
        }
    }
}

impl Iterator for PageSequence {
    type Item = PageDescriptor;

    fn next(&mut self) -> Option<PageDescriptor> {
        let id = self.next?;
        let page = self.urls.page(id);
        // Stop at ID 1, or if a zero page size would repeat this page.
        self.next = (page.lower_bound > 1 && page.lower_bound < id).then_some(page.lower_bound);
        Some(page)
    }
}

/// Number of pages a sequence starting at `id` produces.
pub fn pages_from(id: u64, page_size: u64) -> u64 {
    if id == 0 {
        return 0;
    }
    (id - 1).div_ceil(page_size.max(1)).max(1)
}

/// Resolves once `shutdown` holds `true`. Never resolves if the sender is gone
/// without having signalled.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Spawn the producer task: emits the sequence into a queue of `depth`.
///
/// The producer stops early when `shutdown` flips to true or the receiver is
/// dropped; the queue is closed either way.
pub fn spawn_sequencer(
    sequence: PageSequence,
    depth: usize,
    mut shutdown: Option<watch::Receiver<bool>>,
) -> mpsc::Receiver<PageDescriptor> {
    let (tx, rx) = mpsc::channel(depth.max(1));
    tokio::spawn(async move {
        for page in sequence {
            let permit = match shutdown.as_mut() {
                Some(sd) => tokio::select! {
                    biased;
                    _ = wait_for_shutdown(sd) => {
                        tracing::info!(page_id = page.page_id, "shutdown requested, sequencer stopping");
                        break;
                    }
                    permit = tx.reserve() => permit,
                },
                None => tx.reserve().await,
            };
            let Ok(permit) = permit else {
                break;
            };
            permit.send(page);
        }
    });
    rx
}
