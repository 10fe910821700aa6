//! The backfill run: provision proxies, build the pool, drive the pipeline.

use anyhow::{bail, Context, Result};
use backfill_core::balancer::Balancer;
use backfill_core::client_pool::{ClientPool, ClientQuota};
use backfill_core::config::BackfillConfig;
use backfill_core::pipeline::{Pipeline, RunParams};
use backfill_core::progress::ProgressStats;
use backfill_core::provision::{self, ProxyEndpoint};
use backfill_core::transport::CurlFactory;
use tokio::sync::{mpsc, watch};

use super::progress;
use super::Cli;

pub async fn run_backfill(cli: &Cli, cfg: &BackfillConfig) -> Result<()> {
    let endpoints = if cli.direct {
        Vec::new()
    } else {
        let Some(key) = cli.proxy_key.clone() else {
            bail!("a proxy key is required (pass --proxy-key, or --direct to skip proxies)");
        };
        provision_endpoints(cfg, key).await?
    };
    if !cli.direct {
        println!("{} proxies available", endpoints.len());
    }

    let balancer = Balancer::with_items(endpoints);
    let quota = ClientQuota {
        requests_per_minute: cfg.requests_per_minute,
        burst: cfg.burst,
    };
    let pool = ClientPool::build(&balancer, quota, &CurlFactory::new(&cfg.user_agent))
        .context("failed to build client pool")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, draining in-flight pages");
            eprintln!("Interrupted, finishing in-flight pages...");
            let _ = shutdown_tx.send(true);
        }
    });

    let (progress_tx, progress_rx) = mpsc::channel::<ProgressStats>(16);
    let progress_handle = tokio::spawn(progress::render(progress_rx));

    let params = RunParams::from_config(cfg, &cli.product, cli.start);
    let error_log = params.error_log.clone();
    let summary = Pipeline::new(params, pool)
        .with_progress(progress_tx)
        .with_shutdown(shutdown_rx)
        .run()
        .await;
    let _ = progress_handle.await;
    let summary = summary?;

    println!(
        "{} pages: {} saved, {} already on disk, {} failed",
        summary.processed,
        summary.saved,
        summary.skipped,
        summary.failures()
    );
    if summary.fetch_failures > 0 {
        println!("Failed pages listed in {}", error_log.display());
    }
    Ok(())
}

async fn provision_endpoints(cfg: &BackfillConfig, key: String) -> Result<Vec<ProxyEndpoint>> {
    let api_base = cfg.proxy_api_base.clone();
    let max = cfg.max_proxies;
    let endpoints =
        tokio::task::spawn_blocking(move || provision::fetch_proxies(&api_base, &key, max))
            .await
            .context("proxy provisioning task failed")?
            .context("failed to fetch proxy list")?;
    Ok(endpoints)
}
