//! Reference counts for cached thumbnails.
//!
//! Many records across many collections may point at the same cached file
//! (duplicate imports, drag-and-drop copies of the same source). The counter
//! tracks how many live records hold each key and deletes the cached file
//! when the last holder releases it.
//!
//! The zero-transition (decrement, drop the entry, unlink the file) happens
//! while the map lock is held, so a concurrent `acquire` can never increment
//! a key whose file is mid-deletion.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::fingerprint::Fingerprint;
use crate::thumbnails::cache::ThumbnailCache;

/// Counts live record references per cache key across all collections.
pub struct ThumbnailRefCounter {
    cache: Arc<ThumbnailCache>,
    counts: Mutex<HashMap<u64, usize>>,
}

impl ThumbnailRefCounter {
    pub fn new(cache: Arc<ThumbnailCache>) -> Self {
        Self {
            cache,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Register one more live holder of `key`.
    pub fn acquire(&self, key: Fingerprint) {
        let mut counts = self.counts.lock();
        let n = counts.entry(key.as_u64()).or_insert(0);
        *n += 1;
        trace!(key = key.as_u64(), count = *n, "Acquired thumbnail reference");
    }

    /// Drop one holder of `key`. Returns true when this was the last holder
    /// and the cached file was removed.
    ///
    /// Deletion failure is non-fatal: the cache is a soft artifact and a
    /// locked or already-missing file is not worth surfacing.
    pub fn release(&self, key: Fingerprint) -> bool {
        let mut counts = self.counts.lock();
        match counts.get_mut(&key.as_u64()) {
            Some(n) if *n > 1 => {
                *n -= 1;
                trace!(key = key.as_u64(), count = *n, "Released thumbnail reference");
                false
            }
            Some(_) => {
                counts.remove(&key.as_u64());
                let path = self.cache.path_for(key);
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(?path, error = ?e, "Failed to delete unreferenced thumbnail");
                    }
                }
                trace!(key = key.as_u64(), "Last reference released, thumbnail deleted");
                true
            }
            None => {
                debug_assert!(false, "release without matching acquire");
                warn!(key = key.as_u64(), "Release of an untracked thumbnail key");
                false
            }
        }
    }

    /// Current holder count for `key` (zero when untracked).
    pub fn count(&self, key: Fingerprint) -> usize {
        self.counts.lock().get(&key.as_u64()).copied().unwrap_or(0)
    }
}
