//! Filesystem watching for one root folder.
//!
//! Wraps an OS-level recursive watch and turns raw notifications into typed
//! [`WatchEvent`]s: paths are run through the image filter first, and
//! created/changed notifications are debounced per path to absorb editor
//! save-bursts and partial-write notifications.
//!
//! Also provides [`wait_for_stable`], a best-effort helper for consumers
//! that must not read a file mid-write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::filter::is_image_path;

/// Default suppression window for repeated created/changed notifications on
/// the same path.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Typed, filtered filesystem change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Created(PathBuf),
    Changed(PathBuf),
    Deleted(PathBuf),
    Renamed { old: PathBuf, new: PathBuf },
}

/// Recursive watcher over one root folder.
///
/// Events are delivered through the sender given at construction; `start`
/// and `stop` toggle delivery without releasing the OS watch. Dropping the
/// watcher releases it; notifications still in flight at that point are
/// silently discarded.
pub struct FolderWatcher {
    root: PathBuf,
    enabled: Arc<AtomicBool>,
    // Held for its Drop; the OS watch lives as long as this does.
    _watcher: RecommendedWatcher,
}

impl FolderWatcher {
    pub fn new(
        root: &Path,
        debounce: Duration,
        tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<Self> {
        let enabled = Arc::new(AtomicBool::new(false));
        let delivery = Arc::clone(&enabled);
        let mut translator = EventTranslator::new(debounce);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let event = match res {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(error = ?e, "Watch error");
                        return;
                    }
                };
                if !delivery.load(Ordering::Relaxed) {
                    return;
                }
                for ev in translator.translate(event) {
                    // Receiver gone means the consumer was disposed first;
                    // nothing left to notify.
                    let _ = tx.send(ev);
                }
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!(?root, "Started folder watch");

        Ok(Self {
            root: root.to_path_buf(),
            enabled,
            _watcher: watcher,
        })
    }

    /// Enable event delivery.
    pub fn start(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Suspend event delivery. The OS watch stays registered.
    pub fn stop(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Maps raw notify events to typed [`WatchEvent`]s, applying the image
/// filter and per-path debouncing.
struct EventTranslator {
    debounce: Duration,
    last_emitted: HashMap<PathBuf, Instant>,
}

impl EventTranslator {
    fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_emitted: HashMap::new(),
        }
    }

    fn translate(&mut self, event: Event) -> Vec<WatchEvent> {
        match event.kind {
            EventKind::Create(_) => self.debounced(event.paths, WatchEvent::Created),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                match <[PathBuf; 2]>::try_from(event.paths) {
                    Ok([old, new]) if is_image_path(&new) => {
                        vec![WatchEvent::Renamed { old, new }]
                    }
                    _ => Vec::new(),
                }
            }
            // Unpaired rename halves: the old name is gone, the new name
            // appeared.
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => event
                .paths
                .into_iter()
                .filter(|p| is_image_path(p))
                .map(WatchEvent::Deleted)
                .collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                self.debounced(event.paths, WatchEvent::Created)
            }
            EventKind::Modify(_) => self.debounced(event.paths, WatchEvent::Changed),
            EventKind::Remove(_) => event
                .paths
                .into_iter()
                .filter(|p| is_image_path(p))
                .map(WatchEvent::Deleted)
                .collect(),
            _ => Vec::new(),
        }
    }

    fn debounced(
        &mut self,
        paths: Vec<PathBuf>,
        make: impl Fn(PathBuf) -> WatchEvent,
    ) -> Vec<WatchEvent> {
        let now = Instant::now();
        // Entries past the window can no longer suppress anything; dropping
        // them here keeps the map bounded by recent activity.
        self.last_emitted
            .retain(|_, last| now.duration_since(*last) < self.debounce);
        paths
            .into_iter()
            .filter(|p| is_image_path(p))
            .filter(|p| {
                if self.last_emitted.contains_key(p) {
                    return false;
                }
                self.last_emitted.insert(p.clone(), now);
                true
            })
            .map(make)
            .collect()
    }
}

/// Poll `path`'s size until it has been unchanged for `stable_for`, or give
/// up after `max_wait`.
///
/// Best effort: a writer pausing longer than `stable_for` mid-write will
/// still pass. A vanished file maps to [`EngineError::MissingSource`], a
/// timeout to [`EngineError::FileNotReady`]; transient stat failures keep
/// polling.
pub async fn wait_for_stable(
    path: &Path,
    poll_interval: Duration,
    stable_for: Duration,
    max_wait: Duration,
) -> Result<()> {
    let deadline = Instant::now() + max_wait;
    let mut last_len: Option<u64> = None;
    let mut unchanged_since = Instant::now();

    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let len = meta.len();
                if last_len == Some(len) {
                    if unchanged_since.elapsed() >= stable_for {
                        return Ok(());
                    }
                } else {
                    last_len = Some(len);
                    unchanged_since = Instant::now();
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::MissingSource(path.to_path_buf()));
            }
            Err(_) => {}
        }

        if Instant::now() >= deadline {
            return Err(EngineError::FileNotReady(path.to_path_buf()));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// [`wait_for_stable`] with the defaults used by collection event handling.
pub async fn wait_for_stable_default(path: &Path) -> Result<()> {
    wait_for_stable(
        path,
        Duration::from_millis(50),
        Duration::from_millis(150),
        Duration::from_secs(10),
    )
    .await
}
