//! Fetch capability used to load region-ID lists, mapping documents and tiles
//!
//! The core never talks to the network itself. Callers hand in a
//! [`RegionFetcher`] which can be backed by HTTP, the filesystem, or an
//! in-memory map in tests.

use super::error::FetchError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Trait for the asynchronous fetch operations the core depends on.
pub trait RegionFetcher: Send + Sync {
    /// Fetch and parse a JSON document.
    fn fetch_json(&self, url: &str) -> BoxFuture<'static, Result<serde_json::Value, FetchError>>;

    /// Fetch the raw bytes of a map tile.
    fn fetch_tile(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, FetchError>>;
}

/// Fetcher that resolves URLs as paths below a base directory.
///
/// Absolute paths are used as-is. Intended for local region-ID caches and
/// the development binary.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    base_dir: PathBuf,
}

impl FileFetcher {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        let path = Path::new(url);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

impl RegionFetcher for FileFetcher {
    fn fetch_json(&self, url: &str) -> BoxFuture<'static, Result<serde_json::Value, FetchError>> {
        let path = self.resolve(url);
        let url = url.to_string();
        async move {
            debug!(url = %url, path = %path.display(), "Reading JSON resource");
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| FetchError::Unavailable {
                    url: url.clone(),
                    message: e.to_string(),
                })?;
            serde_json::from_str(&text).map_err(|e| FetchError::InvalidJson {
                url,
                message: e.to_string(),
            })
        }
        .boxed()
    }

    fn fetch_tile(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, FetchError>> {
        let path = self.resolve(url);
        let url = url.to_string();
        async move {
            trace!(url = %url, "Reading tile");
            tokio::fs::read(&path)
                .await
                .map_err(|e| FetchError::Unavailable {
                    url,
                    message: e.to_string(),
                })
        }
        .boxed()
    }
}
