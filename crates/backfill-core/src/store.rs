//! Page artifacts on disk: `{results_dir}/{product}/{page_id}.json.gz`.
//!
//! A page's final file is the resume checkpoint, so it only ever appears via
//! atomic rename from `{name}.part` after the compressed body is fully written
//! and synced. A failed or interrupted save leaves at most a `.part` file,
//! which `exists` ignores and the next attempt truncates.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::SaveError;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `5.json.gz` → `5.json.gz.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Where the persistence stage writes pages. Blocking; called from
/// `spawn_blocking`.
pub trait PageSink: Clone + Send + Sync + 'static {
    /// Write the page; returns the bytes on disk.
    fn save(&self, page_id: u64, body: Option<&[u8]>) -> Result<u64, SaveError>;
}

/// Directory of page artifacts for one product.
#[derive(Debug, Clone)]
pub struct PageStore {
    dir: PathBuf,
}

impl PageStore {
    /// Open (and create if needed) `{results_dir}/{product}`.
    pub fn open(results_dir: &Path, product: &str) -> std::io::Result<Self> {
        let dir = results_dir.join(product);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_path(&self, page_id: u64) -> PathBuf {
        self.dir.join(format!("{}.json.gz", page_id))
    }

    /// True if the page was completely saved by this or an earlier run.
    pub fn exists(&self, page_id: u64) -> bool {
        self.page_path(page_id).exists()
    }

    /// Gzip `body` into the page's file. `None` writes an empty placeholder.
    /// Blocking; call from `spawn_blocking` in async code.
    pub fn save(&self, page_id: u64, body: Option<&[u8]>) -> Result<u64, SaveError> {
        let final_path = self.page_path(page_id);
        let tmp = temp_path(&final_path);

        let written = match write_temp(&tmp, body) {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                return Err(e.into());
            }
        };
        if let Err(e) = std::fs::rename(&tmp, &final_path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(written)
    }
}

impl PageSink for PageStore {
    fn save(&self, page_id: u64, body: Option<&[u8]>) -> Result<u64, SaveError> {
        PageStore::save(self, page_id, body)
    }
}

fn write_temp(tmp: &Path, body: Option<&[u8]>) -> std::io::Result<u64> {
    let file = File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(tmp)?;
    let Some(body) = body else {
        file.sync_all()?;
        return Ok(0);
    };
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(body)?;
    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(file.metadata()?.len())
}
