//! Per-stage error types.
//!
//! Fetch and save failures travel downstream on the page descriptor as data;
//! only provisioning failures abort a run.

use std::time::Duration;
use thiserror::Error;

/// Why a page could not be fetched. Recorded on the descriptor, never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The client's rate limiter did not admit a request before the page deadline.
    #[error("rate limit wait exceeded {0:?}")]
    RateLimit(Duration),
    /// The run was asked to stop while this page was waiting for a slot.
    #[error("cancelled before request was sent")]
    Cancelled,
    /// Curl reported an error (timeout, proxy, connection, etc.).
    #[error("{0}")]
    Curl(#[from] curl::Error),
    /// HTTP response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),
    /// No client could be checked out of the pool.
    #[error("client pool closed")]
    PoolClosed,
    /// The blocking transfer task panicked or was aborted.
    #[error("fetch task failed: {0}")]
    Join(String),
}

/// Why a fetched page could not be written to disk.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("storage: {0}")]
    Io(#[from] std::io::Error),
    #[error("save task failed: {0}")]
    Join(String),
}

/// Failure to obtain a usable set of proxy endpoints. Fatal for the run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("proxy provisioning request failed: {0}")]
    Curl(#[from] curl::Error),
    #[error("proxy provisioning returned HTTP {0}")]
    Http(u32),
    #[error("malformed proxy list: {0}")]
    Json(#[from] serde_json::Error),
    #[error("proxy provider refused request: {0}")]
    Rejected(String),
    #[error("no active proxies available")]
    NoActiveProxies,
}
