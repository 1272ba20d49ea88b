//! Content keys for cached thumbnails.
//!
//! A key is derived from the file name and modification time, not file
//! contents, so large sources are never read just to identify them. A
//! changed source yields a new key; cached entries are immutable once
//! written.

use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::{EngineError, Result};

/// Bumped when the thumbnail format changes, so stale cache entries from
/// older builds are simply never matched.
const CACHE_VERSION: u8 = 1;

/// 64-bit identity of one source file state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Key over (name, mtime). The extension rides along inside the name.
    pub fn from_parts(name: &str, mtime: i64) -> Self {
        let mut buf = Vec::with_capacity(1 + name.len() + 8);
        buf.push(CACHE_VERSION);
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&mtime.to_le_bytes());
        Self(xxh3_64(&buf))
    }

    /// Key for a file on disk, from its current metadata.
    pub fn for_file(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .map_err(|_| EngineError::MissingSource(path.to_path_buf()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(Self::from_parts(name, mtime_secs(&meta)))
    }

    /// Cache file name, e.g. `"00564b1a93ea2bcd.png"`.
    pub fn disk_filename(&self) -> String {
        format!("{:016x}.png", self.0)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Modification time in whole seconds since the epoch; pre-epoch times go
/// negative, unreadable clocks collapse to zero.
pub fn mtime_secs(meta: &Metadata) -> i64 {
    match meta.modified() {
        Ok(time) => match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}
