//! refdeck: the collection and thumbnail engine behind an image reference
//! browser.
//!
//! Collections of image records stay in sync with watched folders, share a
//! content-addressed thumbnail cache with reference counting, and are
//! projected through live filtered/sorted views. State persists to a JSON
//! file with a backup copy.

pub mod collection;
pub mod engine;
pub mod error;
pub mod filter;
pub mod fingerprint;
pub mod store;
pub mod thumbnails;
pub mod view;
pub mod watcher;

pub use collection::{ChangeNotice, Collection, ImageRecord, ImportOutcome, Rgba};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use fingerprint::Fingerprint;
pub use store::{CollectionSnapshot, CollectionStore, ImageSnapshot};
pub use thumbnails::{ThumbnailCache, ThumbnailGenerator, ThumbnailRefCounter};
pub use view::{LiveView, SortDirection, SortKey, ViewDiff, ViewUpdate};
pub use watcher::{FolderWatcher, WatchEvent};

/// Install the default tracing subscriber. Embedding applications that
/// bring their own subscriber skip this.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("refdeck=info".parse().unwrap()),
        )
        .init();
}
