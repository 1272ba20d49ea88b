//! Content-addressed thumbnail store on disk.
//!
//! Cache entries are immutable once written: a changed source file gets a
//! new fingerprint, never an overwrite. Generation for one key is serialized
//! through a per-key lock created on demand and evicted once generation
//! completes, so the lock table stays bounded by the number of keys
//! currently in flight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{EngineError, Result};
use crate::fingerprint::Fingerprint;
use crate::thumbnails::generator::ThumbnailGenerator;

/// Disk store for generated thumbnails, keyed by [`Fingerprint`].
pub struct ThumbnailCache {
    /// Directory for cached thumbnails.
    cache_dir: PathBuf,
    /// Per-key generation locks, created on demand and evicted after the
    /// generation they guard finishes.
    inflight: Mutex<HashMap<u64, Arc<tokio::sync::Mutex<()>>>>,
}

impl ThumbnailCache {
    /// Create a cache rooted at the given directory.
    pub fn new(cache_dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            warn!(?cache_dir, error = ?e, "Failed to create cache directory");
        }
        debug!(?cache_dir, "Initialized thumbnail cache");
        Self {
            cache_dir,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Default cache directory under the platform cache root.
    pub fn default_dir() -> Result<PathBuf> {
        let proj_dirs =
            ProjectDirs::from("", "", "refdeck").ok_or(EngineError::NoProjectDirs)?;
        Ok(proj_dirs.cache_dir().join("thumbs"))
    }

    /// Final on-disk path for a key.
    pub fn path_for(&self, key: Fingerprint) -> PathBuf {
        self.cache_dir.join(key.disk_filename())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Return the cached thumbnail path for `key`, generating it from
    /// `source` if necessary.
    ///
    /// Concurrent callers for the same key queue behind one lock; exactly
    /// one of them generates and the rest observe the finished file on the
    /// double-check. Callers for different keys proceed fully in parallel.
    pub async fn get_or_create(&self, source: &Path, key: Fingerprint) -> Result<PathBuf> {
        let dst = self.path_for(key);
        if dst.exists() {
            trace!(?source, "Thumbnail cache hit");
            return Ok(dst);
        }

        let gate = {
            let mut inflight = self.inflight.lock();
            inflight
                .entry(key.as_u64())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        // A racing caller that queued behind the lock may have generated it.
        if dst.exists() {
            drop(_guard);
            self.evict_gate(key, &gate);
            return Ok(dst);
        }

        debug!(?source, "Thumbnail cache miss, generating");
        let src = source.to_path_buf();
        let out = dst.clone();
        let generated = tokio::task::spawn_blocking(move || ThumbnailGenerator::generate(&src, &out))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()));

        drop(_guard);
        self.evict_gate(key, &gate);
        generated??;
        Ok(dst)
    }

    /// Delete every cached thumbnail. The cache is a soft artifact, so
    /// per-file deletion failures are ignored.
    pub fn clear_all(&self) -> Result<()> {
        if self.cache_dir.exists() {
            for entry in std::fs::read_dir(&self.cache_dir)?.flatten() {
                let path = entry.path();
                if path.is_file() && path.extension().is_some_and(|e| e == "png") {
                    let _ = std::fs::remove_file(path);
                }
            }
        }
        debug!(cache_dir = ?self.cache_dir, "Cleared thumbnail cache");
        Ok(())
    }

    /// Drop the lock-table entry for `key` once no other caller still holds
    /// it. Waiters cloned the gate before queueing, so while any of them is
    /// alive the entry stays and new callers join the same queue instead of
    /// racing a fresh gate.
    fn evict_gate(&self, key: Fingerprint, gate: &Arc<tokio::sync::Mutex<()>>) {
        let mut inflight = self.inflight.lock();
        if let Some(current) = inflight.get(&key.as_u64()) {
            if Arc::ptr_eq(current, gate) && Arc::strong_count(gate) <= 2 {
                inflight.remove(&key.as_u64());
            }
        }
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }
}
