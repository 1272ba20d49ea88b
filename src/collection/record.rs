//! Image metadata records and their thumbnail lifecycle.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{EngineError, Result};
use crate::fingerprint::{mtime_secs, Fingerprint};
use crate::thumbnails::{ThumbnailCache, ThumbnailRefCounter};

/// RGBA background color attached to a record for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const GRAY: Rgba = Rgba {
        r: 0x80,
        g: 0x80,
        b: 0x80,
        a: 0xff,
    };

    /// Parses `#RRGGBB` or `#AARRGGBB`; anything unparseable falls back to
    /// gray.
    pub fn parse_or_default(hex: &str) -> Self {
        Self::parse(hex).unwrap_or(Self::GRAY)
    }

    fn parse(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        let byte = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        match digits.len() {
            6 => Some(Self {
                r: byte(0)?,
                g: byte(2)?,
                b: byte(4)?,
                a: 0xff,
            }),
            8 => Some(Self {
                a: byte(0)?,
                r: byte(2)?,
                g: byte(4)?,
                b: byte(6)?,
            }),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 0xff {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.a, self.r, self.g, self.b)
        }
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::GRAY
    }
}

/// Metadata record for one image file inside a collection.
///
/// Uniquely identified by `path` within its collection. A record that shows
/// `thumbnail_path: Some(..)` holds exactly one reference in the counter for
/// its fingerprint, released through [`ImageRecord::release_thumbnail`]
/// before the record is discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub name: String,
    /// Uppercased extension, `"FILE"` when absent.
    pub kind: String,
    pub size: u64,
    /// Modification time in unix seconds.
    pub modified: i64,
    pub fingerprint: Fingerprint,
    /// Cached thumbnail location; `None` when generation failed (corrupt
    /// image) and no reference is held.
    pub thumbnail_path: Option<PathBuf>,
    pub background: Rgba,
}

impl ImageRecord {
    /// Build a record from a path, generating (or reusing) its thumbnail
    /// and acquiring a reference for it.
    ///
    /// A corrupt image still yields a record, just without a thumbnail;
    /// a missing file is an error.
    pub async fn build(
        path: &Path,
        cache: &ThumbnailCache,
        refs: &ThumbnailRefCounter,
    ) -> Result<Self> {
        let meta = std::fs::metadata(path)
            .map_err(|_| EngineError::MissingSource(path.to_path_buf()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let modified = mtime_secs(&meta);
        let fingerprint = Fingerprint::from_parts(&name, modified);

        let thumbnail_path = match cache.get_or_create(path, fingerprint).await {
            Ok(p) => {
                refs.acquire(fingerprint);
                Some(p)
            }
            Err(EngineError::Thumbnail { path, source }) => {
                warn!(?path, error = ?source, "Thumbnail generation failed, record kept without one");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            kind: Self::kind_of(path),
            size: meta.len(),
            modified,
            fingerprint,
            thumbnail_path,
            background: Rgba::GRAY,
            name,
            path: path.to_path_buf(),
        })
    }

    /// Placeholder for a persisted record whose backing file has gone
    /// missing. The record stays visible so the user can re-link it; it
    /// holds no thumbnail reference.
    pub fn missing(path: &Path, name: &str, background: Rgba) -> Self {
        Self {
            path: path.to_path_buf(),
            name: name.to_string(),
            kind: Self::kind_of(path),
            size: 0,
            modified: 0,
            fingerprint: Fingerprint::from_parts(name, 0),
            thumbnail_path: None,
            background,
        }
    }

    /// Release this record's thumbnail reference, if it holds one.
    /// Idempotent: the reference is dropped at most once.
    pub(crate) fn release_thumbnail(&mut self, refs: &ThumbnailRefCounter) {
        if self.thumbnail_path.take().is_some() {
            refs.release(self.fingerprint);
        }
    }

    pub fn holds_reference(&self) -> bool {
        self.thumbnail_path.is_some()
    }

    /// Human-readable size for presentation ("1.5 MB"); sorting always uses
    /// the raw byte count.
    pub fn display_size(&self) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut len = self.size as f64;
        let mut unit = 0;
        while len >= 1024.0 && unit < UNITS.len() - 1 {
            len /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", self.size, UNITS[0])
        } else {
            format!("{:.2} {}", len, UNITS[unit])
        }
    }

    fn kind_of(path: &Path) -> String {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_uppercase())
            .unwrap_or_else(|| "FILE".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn services(dir: &Path) -> (Arc<ThumbnailCache>, ThumbnailRefCounter) {
        let cache = Arc::new(ThumbnailCache::new(dir.join("thumbs")));
        let refs = ThumbnailRefCounter::new(Arc::clone(&cache));
        (cache, refs)
    }

    fn write_test_png(path: &Path) {
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([1, 2, 3, 255]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_rgba_parse_rgb() {
        let c = Rgba::parse_or_default("#FF8000");
        assert_eq!((c.r, c.g, c.b, c.a), (0xff, 0x80, 0x00, 0xff));
        assert_eq!(c.to_hex(), "#FF8000");
    }

    #[test]
    fn test_rgba_parse_argb() {
        let c = Rgba::parse_or_default("#80FF8000");
        assert_eq!((c.a, c.r, c.g, c.b), (0x80, 0xff, 0x80, 0x00));
        assert_eq!(c.to_hex(), "#80FF8000");
    }

    #[test]
    fn test_rgba_garbage_falls_back_to_gray() {
        assert_eq!(Rgba::parse_or_default("not a color"), Rgba::GRAY);
        assert_eq!(Rgba::parse_or_default("#12"), Rgba::GRAY);
        assert_eq!(Rgba::parse_or_default(""), Rgba::GRAY);
    }

    #[tokio::test]
    async fn test_build_acquires_reference() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let src = dir.path().join("a.png");
        write_test_png(&src);

        let record = ImageRecord::build(&src, &cache, &refs).await.unwrap();
        assert_eq!(record.name, "a.png");
        assert_eq!(record.kind, "PNG");
        assert!(record.holds_reference());
        assert_eq!(refs.count(record.fingerprint), 1);
        assert!(record.thumbnail_path.as_ref().unwrap().exists());
    }

    #[tokio::test]
    async fn test_build_corrupt_image_keeps_record() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let src = dir.path().join("broken.png");
        fs::write(&src, b"garbage").unwrap();

        let record = ImageRecord::build(&src, &cache, &refs).await.unwrap();
        assert!(!record.holds_reference());
        assert_eq!(refs.count(record.fingerprint), 0);
        assert_eq!(record.name, "broken.png");
    }

    #[tokio::test]
    async fn test_build_missing_file() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let err = ImageRecord::build(&dir.path().join("gone.png"), &cache, &refs)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingSource(_)));
    }

    #[tokio::test]
    async fn test_release_thumbnail_is_idempotent() {
        let dir = tempdir().unwrap();
        let (cache, refs) = services(dir.path());
        let src = dir.path().join("a.png");
        write_test_png(&src);

        let mut record = ImageRecord::build(&src, &cache, &refs).await.unwrap();
        record.release_thumbnail(&refs);
        assert_eq!(refs.count(record.fingerprint), 0);
        // Second release must be a no-op
        record.release_thumbnail(&refs);
        assert_eq!(refs.count(record.fingerprint), 0);
    }

    #[test]
    fn test_display_size() {
        let mut r = ImageRecord::missing(Path::new("/x/a.png"), "a.png", Rgba::GRAY);
        r.size = 512;
        assert_eq!(r.display_size(), "512 B");
        r.size = 1536;
        assert_eq!(r.display_size(), "1.50 KB");
        r.size = 5 * 1024 * 1024;
        assert_eq!(r.display_size(), "5.00 MB");
    }
}
