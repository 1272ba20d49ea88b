//! Collections: named sets of image records kept in sync with watched
//! folders.
//!
//! Every watcher owned by a collection sends into one single-consumer
//! channel; a pump task applies events one at a time, so all mutations for
//! a given path are serialized and the unique-path index can never disagree
//! with the record list. Explicit operations (manual add, remove, bulk
//! import) go through the same state lock.

pub mod record;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::thumbnails::{ThumbnailCache, ThumbnailRefCounter};
use crate::view::{SortDirection, SortKey};
use crate::watcher::{wait_for_stable_default, FolderWatcher, WatchEvent, DEFAULT_DEBOUNCE};

pub use record::{ImageRecord, Rgba};

/// Change notice sent to subscribers (live views, presentation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeNotice {
    Added(PathBuf),
    Updated(PathBuf),
    Removed(PathBuf),
    Renamed { old: PathBuf, new: PathBuf },
    SortChanged,
    Cleared,
}

/// Result of a bulk folder import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Records added to the collection.
    pub imported: usize,
    /// Paths skipped because they could not be read.
    pub failed: usize,
    /// True when the cancel flag stopped the import early. Already-added
    /// records remain.
    pub cancelled: bool,
}

/// Records in insertion order plus the unique-path index, always mutated
/// together under one lock.
#[derive(Default)]
struct RecordSet {
    order: Vec<PathBuf>,
    by_path: HashMap<PathBuf, ImageRecord>,
}

impl RecordSet {
    fn insert(&mut self, record: ImageRecord) {
        if !self.by_path.contains_key(&record.path) {
            self.order.push(record.path.clone());
        }
        self.by_path.insert(record.path.clone(), record);
    }

    fn remove(&mut self, path: &Path) -> Option<ImageRecord> {
        let record = self.by_path.remove(path)?;
        self.order.retain(|p| p != path);
        Some(record)
    }

    fn rekey(&mut self, old: &Path, new: PathBuf) -> bool {
        let Some(mut record) = self.by_path.remove(old) else {
            return false;
        };
        record.path = new.clone();
        record.name = new
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        for slot in &mut self.order {
            if slot == old {
                *slot = new.clone();
            }
        }
        self.by_path.insert(new, record);
        true
    }

    fn snapshot(&self) -> Vec<ImageRecord> {
        self.order
            .iter()
            .filter_map(|p| self.by_path.get(p))
            .cloned()
            .collect()
    }
}

/// A named collection of image records backed by zero or more watched
/// folders.
///
/// Owns its watchers and records exclusively; [`Collection::dispose`] stops
/// the watchers first, then releases every thumbnail reference, then clears
/// state. Construction requires a running tokio runtime (the event pump is
/// spawned immediately).
pub struct Collection {
    name: Mutex<String>,
    records: Mutex<RecordSet>,
    watchers: Mutex<HashMap<PathBuf, FolderWatcher>>,
    sort: Mutex<(SortKey, SortDirection)>,
    subscribers: Mutex<Vec<flume::Sender<ChangeNotice>>>,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
    cache: Arc<ThumbnailCache>,
    refs: Arc<ThumbnailRefCounter>,
}

impl Collection {
    pub fn new(
        name: &str,
        cache: Arc<ThumbnailCache>,
        refs: Arc<ThumbnailRefCounter>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let collection = Arc::new(Self {
            name: Mutex::new(name.to_string()),
            records: Mutex::new(RecordSet::default()),
            watchers: Mutex::new(HashMap::new()),
            sort: Mutex::new((SortKey::default(), SortDirection::default())),
            subscribers: Mutex::new(Vec::new()),
            events_tx,
            pump: Mutex::new(None),
            disposed: AtomicBool::new(false),
            cache,
            refs,
        });

        let pump = tokio::spawn(Self::pump_loop(
            Arc::downgrade(&collection),
            events_rx,
        ));
        *collection.pump.lock() = Some(pump);
        collection
    }

    /// Consumes watcher events until the channel closes or the collection
    /// is dropped. Holding only a weak handle here keeps drop semantics
    /// simple: the pump never keeps its collection alive.
    async fn pump_loop(
        collection: Weak<Collection>,
        mut events_rx: mpsc::UnboundedReceiver<WatchEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            let Some(collection) = collection.upgrade() else {
                break;
            };
            collection.apply_event(event).await;
        }
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn sort(&self) -> (SortKey, SortDirection) {
        *self.sort.lock()
    }

    pub fn set_sort(&self, key: SortKey, direction: SortDirection) {
        *self.sort.lock() = (key, direction);
        self.notify(ChangeNotice::SortChanged);
    }

    /// Start watching a folder (recursively). Idempotent per folder.
    pub fn add_watcher(&self, folder: &Path) -> Result<()> {
        let mut watchers = self.watchers.lock();
        if watchers.contains_key(folder) {
            return Ok(());
        }
        let watcher = FolderWatcher::new(folder, DEFAULT_DEBOUNCE, self.events_tx.clone())?;
        watcher.start();
        watchers.insert(folder.to_path_buf(), watcher);
        info!(?folder, collection = %self.name(), "Watching folder");
        Ok(())
    }

    /// Stop watching a folder. Records already imported from it stay in the
    /// collection.
    pub fn remove_watcher(&self, folder: &Path) -> bool {
        let removed = self.watchers.lock().remove(folder);
        if let Some(watcher) = &removed {
            watcher.stop();
            info!(?folder, collection = %self.name(), "Stopped watching folder");
        }
        removed.is_some()
    }

    pub fn watched_folders(&self) -> Vec<PathBuf> {
        self.watchers.lock().keys().cloned().collect()
    }

    /// Manually add one image by path. No-op if the path is already known.
    pub async fn add_image(&self, path: &Path) -> Result<()> {
        if self.contains(path) {
            return Ok(());
        }
        let record = ImageRecord::build(path, &self.cache, &self.refs).await?;
        self.insert_built(record);
        Ok(())
    }

    /// Remove one record and release its thumbnail reference.
    pub fn remove_image(&self, path: &Path) -> bool {
        let removed = {
            let mut records = self.records.lock();
            records.remove(path)
        };
        match removed {
            Some(mut record) => {
                record.release_thumbnail(&self.refs);
                self.notify(ChangeNotice::Removed(path.to_path_buf()));
                true
            }
            None => false,
        }
    }

    /// Update a record's path and name in place after a rename on disk.
    /// The fingerprint and its reference count are untouched. A record
    /// already tracked at `new` is displaced and its reference released,
    /// since the rename overwrote that file.
    pub fn rename(&self, old: &Path, new: &Path) -> bool {
        if old == new {
            return false;
        }
        let (renamed, displaced) = {
            let mut records = self.records.lock();
            if !records.by_path.contains_key(old) {
                (false, None)
            } else {
                let displaced = records.remove(new);
                (records.rekey(old, new.to_path_buf()), displaced)
            }
        };
        if let Some(mut displaced) = displaced {
            displaced.release_thumbnail(&self.refs);
            self.notify(ChangeNotice::Removed(new.to_path_buf()));
        }
        if renamed {
            self.notify(ChangeNotice::Renamed {
                old: old.to_path_buf(),
                new: new.to_path_buf(),
            });
        }
        renamed
    }

    /// Take a record out without releasing its thumbnail reference, for
    /// transferring ownership to another collection.
    pub fn take_record(&self, path: &Path) -> Option<ImageRecord> {
        let record = self.records.lock().remove(path)?;
        self.notify(ChangeNotice::Removed(path.to_path_buf()));
        Some(record)
    }

    /// Insert a record that already holds its own thumbnail reference
    /// (the other half of [`Collection::take_record`]). If the path is
    /// already present the incoming duplicate is released and dropped;
    /// returns whether the record was inserted.
    pub fn insert_record(&self, mut record: ImageRecord) -> bool {
        let path = record.path.clone();
        {
            let mut records = self.records.lock();
            if records.by_path.contains_key(&path) {
                drop(records);
                record.release_thumbnail(&self.refs);
                return false;
            }
            records.insert(record);
        }
        self.notify(ChangeNotice::Added(path));
        true
    }

    /// Bulk import, driven by explicit user actions (create/edit collection,
    /// drag-and-drop of folders). Cancellation stops further files; records
    /// already added remain.
    pub async fn import_paths(&self, paths: &[PathBuf], cancel: &AtomicBool) -> ImportOutcome {
        let mut outcome = ImportOutcome::default();
        for path in paths {
            if cancel.load(Ordering::Relaxed) {
                outcome.cancelled = true;
                break;
            }
            if self.contains(path) {
                continue;
            }
            match ImageRecord::build(path, &self.cache, &self.refs).await {
                Ok(record) => {
                    self.insert_built(record);
                    outcome.imported += 1;
                }
                Err(e) => {
                    warn!(?path, error = %e, "Skipping unreadable file during import");
                    outcome.failed += 1;
                }
            }
        }
        info!(
            collection = %self.name(),
            imported = outcome.imported,
            failed = outcome.failed,
            cancelled = outcome.cancelled,
            "Import finished"
        );
        outcome
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.records.lock().by_path.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.records.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all records in insertion order.
    pub fn records(&self) -> Vec<ImageRecord> {
        self.records.lock().snapshot()
    }

    pub fn get_record(&self, path: &Path) -> Option<ImageRecord> {
        self.records.lock().by_path.get(path).cloned()
    }

    /// Set a record's background color.
    pub fn set_background(&self, path: &Path, color: Rgba) -> bool {
        let updated = {
            let mut records = self.records.lock();
            match records.by_path.get_mut(path) {
                Some(r) => {
                    r.background = color;
                    true
                }
                None => false,
            }
        };
        if updated {
            self.notify(ChangeNotice::Updated(path.to_path_buf()));
        }
        updated
    }

    /// Subscribe to change notices. Slow or dropped receivers are pruned on
    /// the next notification.
    pub fn subscribe(&self) -> flume::Receiver<ChangeNotice> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Apply one typed watcher event. Normally invoked by the internal pump;
    /// public so event semantics can be driven deterministically.
    pub async fn apply_event(&self, event: WatchEvent) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }
        match event {
            WatchEvent::Created(path) => {
                if self.contains(&path) {
                    return;
                }
                if let Err(e) = wait_for_stable_default(&path).await {
                    warn!(?path, error = %e, "New file never settled, skipping");
                    return;
                }
                match ImageRecord::build(&path, &self.cache, &self.refs).await {
                    Ok(record) => self.insert_built(record),
                    Err(e) => warn!(?path, error = %e, "Failed to build record for new file"),
                }
            }
            WatchEvent::Changed(path) => {
                // Only files the collection already knows are refreshed
                if !self.contains(&path) {
                    return;
                }
                if let Err(e) = wait_for_stable_default(&path).await {
                    warn!(?path, error = %e, "Changed file never settled, skipping");
                    return;
                }
                match ImageRecord::build(&path, &self.cache, &self.refs).await {
                    Ok(record) => {
                        let old = {
                            let mut records = self.records.lock();
                            let old = records.by_path.remove(&path);
                            // Path stays in `order`, so the position is kept
                            records.by_path.insert(path.clone(), record);
                            old
                        };
                        if let Some(mut old) = old {
                            old.release_thumbnail(&self.refs);
                        }
                        self.notify(ChangeNotice::Updated(path));
                    }
                    Err(e) => warn!(?path, error = %e, "Failed to rebuild changed record"),
                }
            }
            WatchEvent::Deleted(path) => {
                self.remove_image(&path);
            }
            WatchEvent::Renamed { old, new } => {
                self.rename(&old, &new);
            }
        }
    }

    /// Stop all watchers, release every thumbnail reference and clear
    /// state. Order matters: watchers stop first so no new record can be
    /// added mid-teardown.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut watchers = self.watchers.lock();
            for watcher in watchers.values() {
                watcher.stop();
            }
            watchers.clear();
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        {
            let mut records = self.records.lock();
            for (_, mut record) in records.by_path.drain() {
                record.release_thumbnail(&self.refs);
            }
            records.order.clear();
        }
        self.notify(ChangeNotice::Cleared);
        debug!(collection = %self.name(), "Disposed collection");
    }

    fn insert_built(&self, mut record: ImageRecord) {
        let path = record.path.clone();
        {
            let mut records = self.records.lock();
            // A manual add may have landed for this path while the event
            // handler waited for the file to settle; the later copy is the
            // duplicate and must give its reference back.
            if records.by_path.contains_key(&path) {
                drop(records);
                record.release_thumbnail(&self.refs);
                return;
            }
            records.insert(record);
        }
        self.notify(ChangeNotice::Added(path));
    }

    fn notify(&self, notice: ChangeNotice) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(notice.clone()).is_ok());
    }
}

impl Drop for Collection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn services(dir: &Path) -> (Arc<ThumbnailCache>, Arc<ThumbnailRefCounter>) {
        let cache = Arc::new(ThumbnailCache::new(dir.join("thumbs")));
        let refs = Arc::new(ThumbnailRefCounter::new(Arc::clone(&cache)));
        (cache, refs)
    }

    fn write_test_png(path: &Path) {
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([9, 9, 9, 255]));
        img.save(path).unwrap();
    }

    #[tokio::test]
    async fn test_created_event_adds_record_and_reference() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, Arc::clone(&refs));

        let path = dir.path().join("a.png");
        write_test_png(&path);
        collection.apply_event(WatchEvent::Created(path.clone())).await;

        assert_eq!(collection.len(), 1);
        let record = collection.get_record(&path).unwrap();
        assert_eq!(refs.count(record.fingerprint), 1);
    }

    #[tokio::test]
    async fn test_deleted_event_removes_exactly_one_reference() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, Arc::clone(&refs));

        let path = dir.path().join("a.png");
        write_test_png(&path);
        collection.apply_event(WatchEvent::Created(path.clone())).await;
        let record = collection.get_record(&path).unwrap();
        let thumb = record.thumbnail_path.clone().unwrap();

        fs::remove_file(&path).unwrap();
        collection.apply_event(WatchEvent::Deleted(path.clone())).await;

        assert_eq!(collection.len(), 0);
        assert_eq!(refs.count(record.fingerprint), 0);
        assert!(!thumb.exists());
    }

    #[tokio::test]
    async fn test_rename_keeps_fingerprint_and_count() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, Arc::clone(&refs));

        let old = dir.path().join("old.png");
        write_test_png(&old);
        collection.apply_event(WatchEvent::Created(old.clone())).await;
        let before = collection.get_record(&old).unwrap();

        let new = dir.path().join("new.png");
        fs::rename(&old, &new).unwrap();
        collection
            .apply_event(WatchEvent::Renamed {
                old: old.clone(),
                new: new.clone(),
            })
            .await;

        assert!(!collection.contains(&old));
        let after = collection.get_record(&new).unwrap();
        assert_eq!(after.name, "new.png");
        assert_eq!(after.fingerprint, before.fingerprint);
        assert_eq!(refs.count(before.fingerprint), 1);
    }

    #[tokio::test]
    async fn test_manual_add_during_created_wait_keeps_one_reference() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, Arc::clone(&refs));

        let path = dir.path().join("a.png");
        write_test_png(&path);

        let racer = Arc::clone(&collection);
        let event_path = path.clone();
        let handler = tokio::spawn(async move {
            racer.apply_event(WatchEvent::Created(event_path)).await;
        });
        // Land a manual add while the event handler sits in its stability
        // wait for the same path
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        collection.add_image(&path).await.unwrap();
        handler.await.unwrap();

        assert_eq!(collection.len(), 1);
        let record = collection.get_record(&path).unwrap();
        assert_eq!(refs.count(record.fingerprint), 1);
    }

    #[tokio::test]
    async fn test_rename_onto_tracked_path_displaces_old_record() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, Arc::clone(&refs));

        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        write_test_png(&a);
        write_test_png(&b);
        collection.add_image(&a).await.unwrap();
        collection.add_image(&b).await.unwrap();
        let a_record = collection.get_record(&a).unwrap();
        let b_record = collection.get_record(&b).unwrap();
        let b_thumb = b_record.thumbnail_path.clone().unwrap();

        fs::rename(&a, &b).unwrap();
        collection
            .apply_event(WatchEvent::Renamed {
                old: a.clone(),
                new: b.clone(),
            })
            .await;

        assert_eq!(collection.len(), 1);
        assert_eq!(collection.records().len(), 1, "no duplicate order entry");
        assert!(!collection.contains(&a));
        let survivor = collection.get_record(&b).unwrap();
        assert_eq!(survivor.fingerprint, a_record.fingerprint);
        assert_eq!(refs.count(a_record.fingerprint), 1);
        assert_eq!(refs.count(b_record.fingerprint), 0, "displaced reference released");
        assert!(!b_thumb.exists());
    }

    #[tokio::test]
    async fn test_changed_event_swaps_reference() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, Arc::clone(&refs));

        let path = dir.path().join("a.png");
        write_test_png(&path);
        collection.apply_event(WatchEvent::Created(path.clone())).await;
        let before = collection.get_record(&path).unwrap();

        // Recreate with a different mtime so the fingerprint moves
        let img = image::RgbaImage::from_pixel(6, 6, image::Rgba([1, 1, 1, 255]));
        img.save(&path).unwrap();
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(future)
            .unwrap();

        collection.apply_event(WatchEvent::Changed(path.clone())).await;

        let after = collection.get_record(&path).unwrap();
        assert_ne!(after.fingerprint, before.fingerprint);
        assert_eq!(refs.count(before.fingerprint), 0, "old reference released");
        assert_eq!(refs.count(after.fingerprint), 1);
        assert_eq!(collection.len(), 1);
    }

    #[tokio::test]
    async fn test_changed_event_for_unknown_path_ignored() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, refs);

        let path = dir.path().join("stranger.png");
        write_test_png(&path);
        collection.apply_event(WatchEvent::Changed(path.clone())).await;
        assert!(collection.is_empty());
    }

    #[tokio::test]
    async fn test_remove_watcher_keeps_records() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, refs);

        let folder = dir.path().join("art");
        fs::create_dir(&folder).unwrap();
        collection.add_watcher(&folder).unwrap();
        assert_eq!(collection.watched_folders(), vec![folder.clone()]);

        let path = folder.join("a.png");
        write_test_png(&path);
        collection.apply_event(WatchEvent::Created(path.clone())).await;

        assert!(collection.remove_watcher(&folder));
        assert!(collection.watched_folders().is_empty());
        assert!(collection.contains(&path), "detached folder keeps its records");
    }

    #[tokio::test]
    async fn test_ownership_transfer_preserves_count() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let a = Collection::new("A", Arc::clone(&cache), Arc::clone(&refs));
        let b = Collection::new("B", cache, Arc::clone(&refs));

        let path = dir.path().join("a.png");
        write_test_png(&path);
        a.add_image(&path).await.unwrap();
        let fingerprint = a.get_record(&path).unwrap().fingerprint;

        let record = a.take_record(&path).unwrap();
        assert!(b.insert_record(record));

        assert!(a.is_empty());
        assert_eq!(b.len(), 1);
        assert_eq!(refs.count(fingerprint), 1, "a move is not a copy");
    }

    #[tokio::test]
    async fn test_insert_duplicate_releases_incoming() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let a = Collection::new("A", Arc::clone(&cache), Arc::clone(&refs));
        let b = Collection::new("B", cache, Arc::clone(&refs));

        let path = dir.path().join("a.png");
        write_test_png(&path);
        a.add_image(&path).await.unwrap();
        b.add_image(&path).await.unwrap();
        let fingerprint = a.get_record(&path).unwrap().fingerprint;
        assert_eq!(refs.count(fingerprint), 2);

        // Moving A's copy onto B, which already has one
        let record = a.take_record(&path).unwrap();
        assert!(!b.insert_record(record));
        assert_eq!(refs.count(fingerprint), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn test_import_cancellation_stops_early() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, refs);

        let paths: Vec<PathBuf> = (0..4)
            .map(|i| {
                let p = dir.path().join(format!("img{i}.png"));
                write_test_png(&p);
                p
            })
            .collect();

        let cancel = AtomicBool::new(true);
        let outcome = collection.import_paths(&paths, &cancel).await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.imported, 0);

        let cancel = AtomicBool::new(false);
        let outcome = collection.import_paths(&paths, &cancel).await;
        assert!(!outcome.cancelled);
        assert_eq!(outcome.imported, 4);
        assert_eq!(collection.len(), 4);
    }

    #[tokio::test]
    async fn test_import_skips_unreadable_files() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, refs);

        let good = dir.path().join("good.png");
        write_test_png(&good);
        let corrupt = dir.path().join("corrupt.png");
        fs::write(&corrupt, b"junk").unwrap();
        let missing = dir.path().join("missing.png");

        let cancel = AtomicBool::new(false);
        let outcome = collection
            .import_paths(&[good, corrupt, missing], &cancel)
            .await;
        // Corrupt decodes to a record without a thumbnail; only the missing
        // file counts as failed
        assert_eq!(outcome.imported, 2);
        assert_eq!(outcome.failed, 1);
    }

    #[tokio::test]
    async fn test_dispose_releases_everything() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, Arc::clone(&refs));

        let folder = dir.path().join("art");
        fs::create_dir(&folder).unwrap();
        collection.add_watcher(&folder).unwrap();

        let path = dir.path().join("a.png");
        write_test_png(&path);
        collection.add_image(&path).await.unwrap();
        let record = collection.get_record(&path).unwrap();
        let thumb = record.thumbnail_path.clone().unwrap();

        collection.dispose();
        assert!(collection.is_empty());
        assert!(collection.watched_folders().is_empty());
        assert_eq!(refs.count(record.fingerprint), 0);
        assert!(!thumb.exists());

        // Events after disposal are inert
        collection.apply_event(WatchEvent::Created(path.clone())).await;
        assert!(collection.is_empty());
    }

    #[tokio::test]
    async fn test_add_watcher_idempotent() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let collection = Collection::new("Refs", cache, refs);

        let folder = dir.path().join("art");
        fs::create_dir(&folder).unwrap();
        collection.add_watcher(&folder).unwrap();
        collection.add_watcher(&folder).unwrap();
        assert_eq!(collection.watched_folders().len(), 1);
    }
}
