//! Live views: a filtered, sorted window over one collection at a time.
//!
//! A view subscribes to its source collection's change notices and keeps a
//! visible list up to date, emitting either keyed diffs or a full reset to
//! its own subscribers. Switching sources bumps a generation counter so a
//! late notice from the previous collection can never touch the new list.

use std::cmp::Ordering as CmpOrdering;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::{ChangeNotice, Collection, ImageRecord};

/// Record field the visible list is ordered by. Ties always fall back to
/// the file name so the order is deterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum SortKey {
    #[default]
    Name,
    Type,
    Size,
    DateModified,
}

impl From<String> for SortKey {
    /// Unrecognized keys in persisted data fall back to name order.
    fn from(value: String) -> Self {
        match value.as_str() {
            "Type" => SortKey::Type,
            "Size" => SortKey::Size,
            "DateModified" => SortKey::DateModified,
            _ => SortKey::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl From<String> for SortDirection {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Descending" => SortDirection::Descending,
            _ => SortDirection::Ascending,
        }
    }
}

impl SortKey {
    fn compare(self, a: &ImageRecord, b: &ImageRecord) -> CmpOrdering {
        match self {
            SortKey::Name => compare_names(&a.name, &b.name),
            SortKey::Type => a.kind.cmp(&b.kind),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::DateModified => a.modified.cmp(&b.modified),
        }
    }
}

fn compare_names(a: &str, b: &str) -> CmpOrdering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Orders records by the chosen key and direction. The name tiebreak is
/// applied after direction, so "reverse" flips the key comparison only.
pub fn compare_records(
    key: SortKey,
    direction: SortDirection,
    a: &ImageRecord,
    b: &ImageRecord,
) -> CmpOrdering {
    let ord = key.compare(a, b);
    let ord = match direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    };
    ord.then_with(|| compare_names(&a.name, &b.name))
}

/// A keyed delta between two visible lists. Indices in `inserted` refer to
/// positions in the new list and are given in ascending order, so applying
/// removals first and then insertions reproduces it exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewDiff {
    pub removed: Vec<PathBuf>,
    pub inserted: Vec<(usize, ImageRecord)>,
}

/// What a view subscriber receives. `Reset` carries the whole new list and
/// is used when the source collection switches or when surviving entries
/// changed relative order (a sort change, typically).
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    Reset(Vec<ImageRecord>),
    Diff(ViewDiff),
}

struct ViewState {
    source: Option<Arc<Collection>>,
    search: String,
    visible: Vec<ImageRecord>,
}

/// A live, observable projection of one collection.
pub struct LiveView {
    state: Mutex<ViewState>,
    generation: AtomicU64,
    subscribers: Mutex<Vec<flume::Sender<ViewUpdate>>>,
}

impl LiveView {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ViewState {
                source: None,
                search: String::new(),
                visible: Vec::new(),
            }),
            generation: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// Point the view at a collection. The previous subscription (if any)
    /// goes stale through the generation bump and its task exits on the
    /// next notice.
    pub fn set_source(self: &Arc<Self>, collection: Arc<Collection>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let notices = collection.subscribe();
        {
            let mut state = self.state.lock();
            state.source = Some(Arc::clone(&collection));
            state.visible = compute_visible(&collection, &state.search);
            let update = ViewUpdate::Reset(state.visible.clone());
            drop(state);
            self.emit(update);
        }
        debug!(collection = %collection.name(), "View source switched");

        let view = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(notice) = notices.recv_async().await {
                if view.generation.load(Ordering::SeqCst) != generation {
                    break;
                }
                view.on_notice(generation, notice);
            }
        });
    }

    pub fn clear_source(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.source = None;
        state.visible.clear();
        drop(state);
        self.emit(ViewUpdate::Reset(Vec::new()));
    }

    /// Update the name filter (case-insensitive substring) and re-project.
    pub fn set_search(&self, term: &str) {
        let generation = self.generation.load(Ordering::SeqCst);
        self.state.lock().search = term.to_string();
        self.refresh(generation, false);
    }

    pub fn search(&self) -> String {
        self.state.lock().search.clone()
    }

    /// Snapshot of the currently visible records, in display order.
    pub fn current(&self) -> Vec<ImageRecord> {
        self.state.lock().visible.clone()
    }

    pub fn subscribe(&self) -> flume::Receiver<ViewUpdate> {
        let (tx, rx) = flume::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn on_notice(&self, generation: u64, notice: ChangeNotice) {
        let force_reset = matches!(notice, ChangeNotice::SortChanged | ChangeNotice::Cleared);
        self.refresh(generation, force_reset);
    }

    /// Recompute the visible list and publish the change. Stale generations
    /// are dropped without touching state.
    fn refresh(&self, generation: u64, force_reset: bool) {
        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let Some(source) = state.source.clone() else {
            return;
        };
        let next = compute_visible(&source, &state.search);
        let update = if force_reset {
            ViewUpdate::Reset(next.clone())
        } else {
            match diff_lists(&state.visible, &next) {
                Some(diff) if diff.removed.is_empty() && diff.inserted.is_empty() => {
                    state.visible = next;
                    return;
                }
                Some(diff) => ViewUpdate::Diff(diff),
                None => ViewUpdate::Reset(next.clone()),
            }
        };
        state.visible = next;
        drop(state);
        self.emit(update);
    }

    fn emit(&self, update: ViewUpdate) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(update.clone()).is_ok());
    }
}

fn compute_visible(collection: &Collection, search: &str) -> Vec<ImageRecord> {
    let needle = search.to_lowercase();
    let mut visible: Vec<ImageRecord> = collection
        .records()
        .into_iter()
        .filter(|r| needle.is_empty() || r.name.to_lowercase().contains(&needle))
        .collect();
    let (key, direction) = collection.sort();
    visible.sort_by(|a, b| compare_records(key, direction, a, b));
    visible
}

/// Keyed diff from `old` to `new`. Returns `None` when the entries present
/// in both lists changed relative order, which a remove+insert delta cannot
/// express.
fn diff_lists(old: &[ImageRecord], new: &[ImageRecord]) -> Option<ViewDiff> {
    let mut diff = ViewDiff::default();

    for record in old {
        let survivor = new.iter().find(|r| r.path == record.path);
        match survivor {
            Some(updated) if updated == record => {}
            // In-place updates (new fingerprint, new background) travel as
            // remove+insert of the same key
            _ => diff.removed.push(record.path.clone()),
        }
    }

    let mut old_cursor = 0;
    for (index, record) in new.iter().enumerate() {
        let unchanged = old
            .iter()
            .skip(old_cursor)
            .position(|r| r == record)
            .map(|offset| old_cursor + offset);
        match unchanged {
            Some(at) => old_cursor = at + 1,
            None => {
                if old[..old_cursor.min(old.len())]
                    .iter()
                    .any(|r| r == record)
                {
                    // Survivor moved earlier: relative order broke
                    return None;
                }
                diff.inserted.push((index, record.clone()));
            }
        }
    }
    Some(diff)
}
