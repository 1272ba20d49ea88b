//! Engine: owns the shared services and the set of live collections.
//!
//! One engine per process. The thumbnail cache, the reference counter and
//! the store are plain owned instances handed to collections by `Arc`, so
//! tests can run any number of engines side by side.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::collection::{Collection, ImageRecord};
use crate::error::Result;
use crate::filter::is_image_path;
use crate::store::{CollectionSnapshot, CollectionStore};
use crate::thumbnails::{ThumbnailCache, ThumbnailRefCounter};

pub struct Engine {
    cache: Arc<ThumbnailCache>,
    refs: Arc<ThumbnailRefCounter>,
    store: CollectionStore,
    collections: RwLock<Vec<Arc<Collection>>>,
    autosave: Mutex<Option<JoinHandle<()>>>,
    shutdown_notify: Notify,
}

impl Engine {
    pub fn new(cache: Arc<ThumbnailCache>, store: CollectionStore) -> Arc<Self> {
        let refs = Arc::new(ThumbnailRefCounter::new(Arc::clone(&cache)));
        Arc::new(Self {
            cache,
            refs,
            store,
            collections: RwLock::new(Vec::new()),
            autosave: Mutex::new(None),
            shutdown_notify: Notify::new(),
        })
    }

    /// Engine rooted at the platform cache and data directories.
    pub fn with_default_paths() -> Result<Arc<Self>> {
        let cache = Arc::new(ThumbnailCache::new(ThumbnailCache::default_dir()?));
        let store = CollectionStore::new(CollectionStore::default_path()?);
        Ok(Self::new(cache, store))
    }

    pub fn cache(&self) -> &Arc<ThumbnailCache> {
        &self.cache
    }

    pub fn refs(&self) -> &Arc<ThumbnailRefCounter> {
        &self.refs
    }

    pub fn create_collection(&self, name: &str) -> Arc<Collection> {
        let collection = Collection::new(name, Arc::clone(&self.cache), Arc::clone(&self.refs));
        self.collections.write().push(Arc::clone(&collection));
        info!(name, "Created collection");
        collection
    }

    pub fn collections(&self) -> Vec<Arc<Collection>> {
        self.collections.read().clone()
    }

    pub fn find_collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Remove and dispose a collection, releasing all of its thumbnail
    /// references.
    pub fn remove_collection(&self, name: &str) -> bool {
        let removed = {
            let mut collections = self.collections.write();
            match collections.iter().position(|c| c.name() == name) {
                Some(at) => Some(collections.remove(at)),
                None => None,
            }
        };
        match removed {
            Some(collection) => {
                collection.dispose();
                true
            }
            None => false,
        }
    }

    /// Rebuild collections from persisted snapshots. Watched folders are
    /// re-scanned so files that appeared while the process was down are
    /// picked up; persisted images missing from disk stay as placeholder
    /// records instead of silently vanishing.
    pub async fn hydrate(&self) -> Result<()> {
        let snapshots = self.store.load();
        for snapshot in snapshots {
            let collection = self.create_collection(&snapshot.name);
            collection.set_sort(snapshot.sort_key, snapshot.sort_direction);

            for folder in &snapshot.folder_paths {
                if let Err(e) = collection.add_watcher(folder) {
                    warn!(?folder, error = %e, "Could not watch persisted folder");
                    continue;
                }
                for path in scan_folder(folder) {
                    if let Err(e) = collection.add_image(&path).await {
                        warn!(?path, error = %e, "Skipping file during folder re-scan");
                    }
                }
            }

            for image in &snapshot.images {
                if collection.contains(&image.path) {
                    collection.set_background(&image.path, image.background());
                    continue;
                }
                match collection.add_image(&image.path).await {
                    Ok(()) => {
                        collection.set_background(&image.path, image.background());
                    }
                    Err(e) => {
                        warn!(path = ?image.path, error = %e, "Persisted image unreadable, keeping placeholder");
                        collection.insert_record(ImageRecord::missing(
                            &image.path,
                            &image.name,
                            image.background(),
                        ));
                    }
                }
            }
            info!(
                name = %collection.name(),
                records = collection.len(),
                "Hydrated collection"
            );
        }
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<CollectionSnapshot> {
        self.collections
            .read()
            .iter()
            .map(|c| CollectionSnapshot::of(c))
            .collect()
    }

    pub fn save_now(&self) -> Result<()> {
        self.store.save(&self.snapshot())
    }

    /// Periodic save task. At most one per engine; a second call replaces
    /// the previous task.
    pub fn spawn_autosave(self: &Arc<Self>, period: Duration) {
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = engine.save_now() {
                            warn!(error = %e, "Autosave failed");
                        }
                    }
                    _ = engine.shutdown_notify.notified() => break,
                }
            }
        });
        if let Some(previous) = self.autosave.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop the autosave task, write a final snapshot, then dispose every
    /// collection.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_notify.notify_waiters();
        let task = self.autosave.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.save_now()?;
        let collections = std::mem::take(&mut *self.collections.write());
        for collection in collections {
            collection.dispose();
        }
        info!("Engine shut down");
        Ok(())
    }
}

/// Recursively list image files under a folder, filtered by the extension
/// allow-list.
pub fn scan_folder(folder: &Path) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_image_path(e.path()))
        .map(|e| e.into_path())
        .collect()
}
