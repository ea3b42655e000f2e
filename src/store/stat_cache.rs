use std::fs::Metadata;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use parking_lot::Mutex;

const STAT_CACHE_CAPACITY: usize = 256;

/// Associative cache over host `stat`, keyed by physical path.
///
/// The protocol layer constructs one per request and discards it with the
/// request; entries never cross request boundaries. A miss issues the host
/// stat and is inserted on success only, so failures are re-probed.
pub struct StatCache {
    entries: Mutex<LruCache<PathBuf, Metadata>>,
}

impl StatCache {
    pub fn new() -> Self {
        StatCache {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(STAT_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    pub async fn stat(&self, path: &Path) -> std::io::Result<Metadata> {
        if let Some(meta) = self.entries.lock().get(path) {
            return Ok(meta.clone());
        }
        let meta = tokio::fs::metadata(path).await?;
        self.entries.lock().put(path.to_path_buf(), meta.clone());
        Ok(meta)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for StatCache {
    fn default() -> Self {
        Self::new()
    }
}
