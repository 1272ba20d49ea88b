//! Durable storage for collections: one JSON file plus a backup copy.
//!
//! Saving never writes the primary in place. The new snapshot goes to a
//! temp file in the same directory, the previous primary is copied to the
//! backup, and the temp is renamed over the primary. A crash at any point
//! leaves either the old primary or the new one, never a torn file.

use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collection::{Collection, Rgba};
use crate::error::{EngineError, Result};
use crate::view::{SortDirection, SortKey};

/// Per-image persisted state. Metadata like size and modified time is
/// re-read from disk at hydration, so only identity and presentation
/// settings are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSnapshot {
    pub name: String,
    pub path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub background_color_hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub name: String,
    pub images: Vec<ImageSnapshot>,
    pub folder_paths: Vec<PathBuf>,
    #[serde(default)]
    pub sort_key: SortKey,
    #[serde(default)]
    pub sort_direction: SortDirection,
}

impl CollectionSnapshot {
    pub fn of(collection: &Collection) -> Self {
        let (sort_key, sort_direction) = collection.sort();
        Self {
            name: collection.name(),
            images: collection
                .records()
                .iter()
                .map(|r| ImageSnapshot {
                    name: r.name.clone(),
                    path: r.path.clone(),
                    thumbnail_path: r.thumbnail_path.clone(),
                    background_color_hex: r.background.to_hex(),
                })
                .collect(),
            folder_paths: collection.watched_folders(),
            sort_key,
            sort_direction,
        }
    }
}

impl ImageSnapshot {
    pub fn background(&self) -> Rgba {
        Rgba::parse_or_default(&self.background_color_hex)
    }
}

/// Reads and writes the collection file with backup-on-write semantics.
pub struct CollectionStore {
    primary: PathBuf,
    backup: PathBuf,
    io: Mutex<()>,
}

impl CollectionStore {
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        let primary = primary.into();
        let backup = sibling(&primary, "bak");
        Self {
            primary,
            backup,
            io: Mutex::new(()),
        }
    }

    /// Platform data directory, e.g. `~/.local/share/refdeck/collections.json`.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "refdeck").ok_or(EngineError::NoProjectDirs)?;
        Ok(dirs.data_dir().join("collections.json"))
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary
    }

    /// Persist all collections. Temp write, backup copy, atomic rename,
    /// all under one lock so overlapping saves cannot interleave.
    pub fn save(&self, snapshots: &[CollectionSnapshot]) -> Result<()> {
        let _guard = self.io.lock();
        if let Some(parent) = self.primary.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec_pretty(snapshots)?;
        let temp = sibling(&self.primary, "tmp");
        fs::write(&temp, &json)?;
        if self.primary.exists() {
            fs::copy(&self.primary, &self.backup)?;
        }
        fs::rename(&temp, &self.primary)?;
        debug!(path = ?self.primary, collections = snapshots.len(), "Saved collections");
        Ok(())
    }

    /// Load persisted collections. Falls back to the backup when the
    /// primary is unreadable or malformed, and to an empty list when both
    /// are. Infallible by contract: a bad file must not block startup.
    pub fn load(&self) -> Vec<CollectionSnapshot> {
        match read_snapshots(&self.primary) {
            Ok(snapshots) => return snapshots,
            Err(e) => {
                warn!(path = ?self.primary, error = %e, "Primary collection file unreadable, trying backup")
            }
        }
        match read_snapshots(&self.backup) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                info!(path = ?self.backup, error = %e, "No usable collection file, starting empty");
                Vec::new()
            }
        }
    }
}

fn read_snapshots(path: &Path) -> Result<Vec<CollectionSnapshot>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// `collections.json` -> `collections.json.bak` (extension appended, not
/// replaced, so the family of files sorts together).
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
