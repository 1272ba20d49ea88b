//! Thumbnail pipeline.
//!
//! This module provides:
//! - `ThumbnailGenerator` - downscales source images to cached copies
//! - `ThumbnailCache` - content-addressed disk store with at-most-once
//!   generation per key
//! - `ThumbnailRefCounter` - cross-collection reference counts with
//!   delete-at-zero lifecycle

pub mod cache;
pub mod generator;
pub mod refcount;

pub use cache::ThumbnailCache;
pub use generator::ThumbnailGenerator;
pub use refcount::ThumbnailRefCounter;
