//! Shared test utilities.
//!
//! Fixtures are generated in-process with the `image` crate instead of being
//! checked in, so every test controls the exact dimensions it needs.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = TempDir::new().unwrap();
//! let record = catalog_record(tmp.path(), "photo.jpg", 1200, 800);
//! assert_eq!(record.web_path, "/photo.jpg");
//! ```

use std::fs;
use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::catalog::{ImageRecord, Origin, record_from_bytes};
use crate::imaging::Codec;

// =========================================================================
// Fixture images
// =========================================================================

/// Diagonal color gradient, so crops and resizes of different regions differ.
pub fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    }))
}

fn write_image(path: &Path, width: u32, height: u32, format: ImageFormat) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    gradient(width, height)
        .save_with_format(path, format)
        .unwrap();
}

/// Write a `width`x`height` JPEG to `path`, creating parent directories.
pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    write_image(path, width, height, ImageFormat::Jpeg);
}

/// Write a `width`x`height` PNG to `path`, creating parent directories.
pub fn write_png(path: &Path, width: u32, height: u32) {
    write_image(path, width, height, ImageFormat::Png);
}

// =========================================================================
// Catalog records
// =========================================================================

/// Write `filename` under `dir` (PNG for `.png`, JPEG otherwise) and return
/// its source record, with `dir` as the site root.
pub fn catalog_record(dir: &Path, filename: &str, width: u32, height: u32) -> ImageRecord {
    let path = dir.join(filename);
    let codec = match Codec::from_extension(
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default(),
    ) {
        Some(Codec::Png) => {
            write_png(&path, width, height);
            Codec::Png
        }
        _ => {
            write_jpeg(&path, width, height);
            Codec::Jpeg
        }
    };
    let bytes = fs::read(&path).unwrap();
    record_from_bytes(&path, dir, codec, &bytes, Origin::Source).unwrap()
}
