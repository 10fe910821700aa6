use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Global configuration loaded from `~/.config/backfill/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Base URL of the executions API (no trailing path).
    pub api_base: String,
    /// Records requested per page; also the ID stride between pages.
    pub page_size: u64,
    /// Steady-state requests per minute allowed through each client.
    pub requests_per_minute: u32,
    /// Token bucket capacity per client.
    pub burst: u32,
    /// Maximum number of page files being compressed and written at once.
    pub save_concurrency: usize,
    /// Deadline for one page: rate limiter wait plus the HTTP transfer.
    pub request_timeout_secs: u64,
    /// Capacity of each handoff queue between pipeline stages.
    pub queue_depth: usize,
    /// User-Agent header sent with every page request.
    pub user_agent: String,
    /// Directory under which `{product}/{page_id}.json.gz` files are written.
    pub results_dir: PathBuf,
    /// Base URL of the proxy provisioning service.
    pub proxy_api_base: String,
    /// Optional cap on provisioned proxies (useful when debugging).
    #[serde(default)]
    pub max_proxies: Option<usize>,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.bitflyer.com".to_string(),
            page_size: 500,
            requests_per_minute: 500,
            burst: 5,
            save_concurrency: 100,
            request_timeout_secs: 30,
            queue_depth: 5,
            user_agent: "curl/7.63.0".to_string(),
            results_dir: PathBuf::from("results"),
            proxy_api_base: "https://proxy6.net/api".to_string(),
            max_proxies: None,
        }
    }
}

impl BackfillConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values that would stall or break the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            anyhow::bail!("page_size must be at least 1");
        }
        if self.requests_per_minute == 0 {
            anyhow::bail!("requests_per_minute must be at least 1");
        }
        if self.burst == 0 {
            anyhow::bail!("burst must be at least 1");
        }
        if self.save_concurrency == 0 {
            anyhow::bail!("save_concurrency must be at least 1");
        }
        if self.queue_depth == 0 {
            anyhow::bail!("queue_depth must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        url::Url::parse(&self.api_base)
            .map_err(|e| anyhow::anyhow!("invalid api_base {}: {}", self.api_base, e))?;
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("backfill")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<BackfillConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = BackfillConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: BackfillConfig = toml::from_str(&data)?;
    cfg.validate()?;
    Ok(cfg)
}
