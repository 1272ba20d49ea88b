//! Thumbnail generation using the image crate.
//!
//! Downscales to at most 512px on the longer side while preserving aspect
//! ratio, never upscaling. Output is written to a temporary path and renamed
//! into place on success, so a crash or decode failure can never leave a
//! partial file at the final cache path.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GenericImageView, ImageFormat};
use tracing::debug;

use crate::error::{EngineError, Result};

/// Maximum dimension (width or height) of a generated thumbnail in pixels.
pub const MAX_THUMB_DIM: u32 = 512;

/// Thumbnail generator that creates downsized copies for caching.
pub struct ThumbnailGenerator;

impl ThumbnailGenerator {
    /// Generate a thumbnail from `src` and persist it at `dst`.
    ///
    /// Returns the actual dimensions of the generated thumbnail.
    pub fn generate(src: &Path, dst: &Path) -> Result<(u32, u32)> {
        if !src.exists() {
            return Err(EngineError::MissingSource(src.to_path_buf()));
        }

        let img = image::open(src).map_err(|e| EngineError::Thumbnail {
            path: src.to_path_buf(),
            source: e,
        })?;

        let (src_w, src_h) = img.dimensions();
        let (thumb_w, thumb_h) = Self::scaled_dimensions(src_w, src_h);

        let thumb = if (thumb_w, thumb_h) == (src_w, src_h) {
            img
        } else {
            // CatmullRom provides good quality/speed balance for downscaling
            img.resize_exact(thumb_w, thumb_h, FilterType::CatmullRom)
        };

        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = Self::temp_path(dst);
        if let Err(e) = thumb.save_with_format(&tmp, ImageFormat::Png) {
            let _ = std::fs::remove_file(&tmp);
            return Err(EngineError::Thumbnail {
                path: src.to_path_buf(),
                source: e,
            });
        }
        std::fs::rename(&tmp, dst)?;

        debug!(?src, ?dst, thumb_w, thumb_h, "Generated thumbnail");
        Ok((thumb_w, thumb_h))
    }

    /// Target dimensions: fit within MAX_THUMB_DIM x MAX_THUMB_DIM,
    /// preserving aspect ratio, never upscaling.
    fn scaled_dimensions(src_w: u32, src_h: u32) -> (u32, u32) {
        if src_w == 0 || src_h == 0 {
            return (1, 1);
        }
        if src_w <= MAX_THUMB_DIM && src_h <= MAX_THUMB_DIM {
            return (src_w, src_h);
        }

        let scale_w = MAX_THUMB_DIM as f64 / src_w as f64;
        let scale_h = MAX_THUMB_DIM as f64 / src_h as f64;
        let scale = scale_w.min(scale_h);

        let w = ((src_w as f64 * scale).round() as u32).max(1);
        let h = ((src_h as f64 * scale).round() as u32).max(1);
        (w, h)
    }

    fn temp_path(dst: &Path) -> PathBuf {
        let mut name = dst.file_name().unwrap_or_default().to_os_string();
        name.push(".part");
        dst.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_test_png(path: &Path, w: u32, h: u32) {
        let img = image::RgbaImage::from_pixel(w, h, image::Rgba([120, 30, 200, 255]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_scaled_dimensions_small_source() {
        // Smaller than the cap - no upscale
        assert_eq!(ThumbnailGenerator::scaled_dimensions(200, 100), (200, 100));
    }

    #[test]
    fn test_scaled_dimensions_landscape() {
        let (w, h) = ThumbnailGenerator::scaled_dimensions(2048, 1024);
        assert_eq!(w, 512);
        assert_eq!(h, 256);
    }

    #[test]
    fn test_scaled_dimensions_portrait() {
        let (w, h) = ThumbnailGenerator::scaled_dimensions(1024, 2048);
        assert_eq!(w, 256);
        assert_eq!(h, 512);
    }

    #[test]
    fn test_scaled_dimensions_degenerate() {
        assert_eq!(ThumbnailGenerator::scaled_dimensions(0, 0), (1, 1));
    }

    #[test]
    fn test_generate_writes_thumbnail() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.png");
        let dst = dir.path().join("thumbs").join("out.png");
        write_test_png(&src, 1024, 512);

        let (w, h) = ThumbnailGenerator::generate(&src, &dst).unwrap();
        assert_eq!((w, h), (512, 256));
        assert!(dst.exists());

        let out = image::open(&dst).unwrap();
        assert_eq!(out.dimensions(), (512, 256));
    }

    #[test]
    fn test_generate_corrupt_source_leaves_no_partial() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("broken.png");
        let dst = dir.path().join("out.png");
        fs::write(&src, b"this is not a png").unwrap();

        let err = ThumbnailGenerator::generate(&src, &dst).unwrap_err();
        assert!(matches!(err, EngineError::Thumbnail { .. }));
        assert!(!dst.exists());
        assert!(!ThumbnailGenerator::temp_path(&dst).exists());
    }

    #[test]
    fn test_generate_missing_source() {
        let dir = tempdir().unwrap();
        let err = ThumbnailGenerator::generate(
            &dir.path().join("gone.png"),
            &dir.path().join("out.png"),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::MissingSource(_)));
    }
}
