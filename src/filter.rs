//! Extension allow-list shared by the watcher and folder scans.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;

static ALLOWED_EXTENSIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["png", "jpg", "jpeg"]));

/// True when the path carries a supported image extension. Pure path
/// inspection; the file does not have to exist.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ALLOWED_EXTENSIONS.contains(e.to_lowercase().as_str()))
        .unwrap_or(false)
}
