//! Terminal progress bar fed by pipeline snapshots.

use backfill_core::progress::ProgressStats;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

const BAR_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {wide_bar} {pos}/{len} pages {msg}";

/// Draw a bar once the first snapshot with a known total arrives. Runs until
/// the sender is dropped. A run with every page already on disk draws nothing.
pub async fn render(mut rx: mpsc::Receiver<ProgressStats>) {
    let mut bar: Option<ProgressBar> = None;

    while let Some(stats) = rx.recv().await {
        let Some(total) = stats.pages_total else {
            continue;
        };
        let pb = bar.get_or_insert_with(|| new_bar(total));
        pb.set_position(stats.pages_done.min(total));
        pb.set_message(status_message(&stats));
    }

    if let Some(pb) = bar {
        pb.finish_with_message("Done!");
    }
}

fn new_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    match ProgressStyle::with_template(BAR_TEMPLATE) {
        Ok(style) => pb.set_style(style),
        Err(e) => tracing::debug!("progress template rejected: {}", e),
    }
    pb
}

/// `({pct}%)  {rate} pages/s  ETA {eta}`, plus the failure count if any.
fn status_message(stats: &ProgressStats) -> String {
    let eta = stats
        .eta_secs()
        .map(|s| format!("{:.0}s", s))
        .unwrap_or_else(|| "?".to_string());
    let mut msg = format!(
        "({:.1}%)  {:.1} pages/s  ETA {}",
        stats.fraction() * 100.0,
        stats.pages_per_sec(),
        eta
    );
    let failed = stats.fetch_failures + stats.save_failures;
    if failed > 0 {
        msg.push_str(&format!("  {} failed", failed));
    }
    msg
}
