//! Result aggregator: error log, counters, progress snapshots.
//!
//! Pages arrive in any order. Every fetch failure becomes one
//! `{page_id}: {error}` line in an append-only log (named `.json` for
//! compatibility with existing runs; the content is plain lines). Save
//! failures are logged through tracing and counted, never fatal.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::page::PageDescriptor;
use crate::progress::{ProgressStats, ProgressTracker};

/// Append-mode, line-oriented log of failed pages.
pub struct ErrorLog {
    file: tokio::fs::File,
    path: PathBuf,
}

impl ErrorLog {
    /// `{product}_result_err.json`
    pub fn file_name(product: &str) -> String {
        format!("{}_result_err.json", product)
    }

    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `{page_id}: {message}`; embedded newlines become spaces.
    pub async fn append(&mut self, page_id: u64, message: &str) -> std::io::Result<()> {
        let line = format!("{}: {}\n", page_id, message.replace('\n', " "));
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await
    }
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Pages that reached the aggregator.
    pub processed: u64,
    /// Pages already on disk before this run touched them.
    pub skipped: u64,
    /// Pages fetched and saved by this run.
    pub saved: u64,
    pub fetch_failures: u64,
    pub save_failures: u64,
}

impl RunSummary {
    pub fn failures(&self) -> u64 {
        self.fetch_failures + self.save_failures
    }
}

/// Drain the final queue until it closes.
pub async fn aggregate(
    mut input: mpsc::Receiver<PageDescriptor>,
    log: &mut ErrorLog,
    progress: &ProgressTracker,
    stats_tx: Option<&mpsc::Sender<ProgressStats>>,
) -> RunSummary {
    let mut summary = RunSummary::default();

    while let Some(page) = input.recv().await {
        summary.processed += 1;

        if let Some(msg) = page.fetch_error.as_ref().map(ToString::to_string) {
            summary.fetch_failures += 1;
            progress.record_fetch_failure();
            if let Err(io) = log.append(page.page_id, &msg).await {
                tracing::warn!(
                    page_id = page.page_id,
                    "could not write {}: {}",
                    log.path().display(),
                    io
                );
            }
        } else if let Some(ref e) = page.save_error {
            summary.save_failures += 1;
            progress.record_save_failure();
            tracing::warn!(page_id = page.page_id, "page not saved: {}", e);
        } else if page.skipped {
            summary.skipped += 1;
            progress.record_skipped();
        } else {
            summary.saved += 1;
        }

        progress.advance();
        if let Some(tx) = stats_tx {
            let _ = tx.try_send(progress.snapshot());
        }
    }

    if let Some(tx) = stats_tx {
        let _ = tx.send(progress.snapshot()).await;
    }
    tracing::info!(
        processed = summary.processed,
        skipped = summary.skipped,
        saved = summary.saved,
        fetch_failures = summary.fetch_failures,
        save_failures = summary.save_failures,
        "run finished"
    );
    summary
}
