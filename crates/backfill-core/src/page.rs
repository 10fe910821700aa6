//! Page descriptor: one unit of work flowing through the pipeline.

use crate::error::{FetchError, SaveError};

/// One page of executions, identified by its upper-bound execution ID.
///
/// Created by the sequencer, filled in by the download and persistence
/// stages, consumed by the aggregator. Moved between stages, never shared.
#[derive(Debug)]
pub struct PageDescriptor {
    /// Fully parameterized page-fetch URL.
    pub source_url: String,
    /// Highest execution ID the page can contain.
    pub page_id: u64,
    /// Lowest ID bound used for this page (exclusive `after` parameter).
    pub lower_bound: u64,
    /// Set when an artifact for this page was already on disk.
    pub skipped: bool,
    /// Response body, present only after a successful fetch.
    pub body: Option<Vec<u8>>,
    pub fetch_error: Option<FetchError>,
    pub save_error: Option<SaveError>,
}

impl PageDescriptor {
    pub fn new(source_url: String, page_id: u64, lower_bound: u64) -> Self {
        Self {
            source_url,
            page_id,
            lower_bound,
            skipped: false,
            body: None,
            fetch_error: None,
            save_error: None,
        }
    }

    /// Exclusive upper bound sent as `before`.
    pub fn upper_bound(&self) -> u64 {
        self.page_id + 1
    }

    /// True if the page still needs to be written by the persistence stage.
    pub fn needs_save(&self) -> bool {
        !self.skipped && self.fetch_error.is_none()
    }
}
