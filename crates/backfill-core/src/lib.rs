pub mod config;
pub mod error;
pub mod logging;

pub mod aggregator;
pub mod balancer;
pub mod client_pool;
pub mod download;
pub mod page;
pub mod persist;
pub mod pipeline;
pub mod progress;
pub mod provision;
pub mod sequencer;
pub mod store;
pub mod transport;
