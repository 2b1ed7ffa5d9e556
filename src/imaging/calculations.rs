//! Pure calculation functions for image dimensions and crop geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//!
//! ## Smart crop
//!
//! A thumbnail is produced in two passes:
//!
//! 1. **Cover**: scale the source so it fully covers the target box, keeping
//!    its aspect ratio ([`cover_dimensions`]).
//! 2. **Window**: on each axis place a window of the target size around the
//!    barycenter, expressed as normalized `[low, high]` bounds, push it back
//!    inside `[0, 1]` if it overflows ([`crop_window`]), then truncate to
//!    pixels and stretch the high bound so the window is exactly the target
//!    size ([`window_to_pixels`]). Width is settled before height.

/// Height that keeps the aspect ratio when `width` becomes `target_width`.
///
/// Rounds to the nearest pixel and never returns zero.
pub fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let h = (height as f64 * target_width as f64 / width as f64).round();
    h.max(1.0) as u32
}

/// Dimensions a source must be scaled to so it covers `target` entirely.
///
/// The axis that is shorter relative to the target box is scaled to match the
/// target exactly; the other one keeps the source ratio and may exceed it.
/// The comparison starts from the source's own orientation: a portrait source
/// checks whether `target_width * (h / w)` overshoots the target height, a
/// landscape or square source checks `target_height * (w / h)` against the
/// target width. The free axis is truncated, then floored at the target size.
pub fn cover_dimensions(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = (source.0 as f64, source.1 as f64);
    let (tgt_w, tgt_h) = target;

    let (w, h) = if src_w < src_h {
        let ratio = src_h / src_w;
        if tgt_w as f64 * ratio > tgt_h as f64 {
            (tgt_w, (src_h * tgt_w as f64 / src_w) as u32)
        } else {
            ((src_w * tgt_h as f64 / src_h) as u32, tgt_h)
        }
    } else {
        let ratio = src_w / src_h;
        if tgt_h as f64 * ratio > tgt_w as f64 {
            ((src_w * tgt_h as f64 / src_h) as u32, tgt_h)
        } else {
            (tgt_w, (src_h * tgt_w as f64 / src_w) as u32)
        }
    };

    // Truncation can land one pixel short of the box
    (w.max(tgt_w), h.max(tgt_h))
}

/// Normalized `[low, high]` bounds of a crop window along one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropWindow {
    pub low: f64,
    pub high: f64,
}

impl CropWindow {
    pub const FULL: CropWindow = CropWindow {
        low: 0.0,
        high: 1.0,
    };
}

/// Place a `target`-pixel window on a `scaled`-pixel axis around `barycenter`.
///
/// Returns [`CropWindow::FULL`] when the axis is not larger than the target.
/// A window spilling past either edge is shifted back inside, keeping its size.
pub fn crop_window(scaled: u32, target: u32, barycenter: f64) -> CropWindow {
    let scaled = scaled as f64;
    let ratio = target as f64 / scaled;
    if ratio >= 1.0 {
        return CropWindow::FULL;
    }

    let center = scaled * barycenter;
    let mut low = (center - target as f64 / 2.0) / scaled;
    let mut high = low + ratio;

    if low < 0.0 {
        high -= low;
        low = 0.0;
    }
    if high > 1.0 {
        low -= high - 1.0;
        high = 1.0;
    }

    CropWindow { low, high }
}

/// Convert a normalized window to pixel bounds spanning exactly `target` pixels.
///
/// Bounds are truncated, then the high bound absorbs any rounding shortfall or
/// excess. The result never extends past `scaled`.
pub fn window_to_pixels(window: CropWindow, scaled: u32, target: u32) -> (u32, u32) {
    let mut low = (scaled as f64 * window.low) as i64;
    let mut high = (scaled as f64 * window.high) as i64;
    let target = i64::from(target);

    if high - low != target {
        high += target - (high - low);
    }
    if high > i64::from(scaled) {
        low -= high - i64::from(scaled);
        high = i64::from(scaled);
    }
    if low < 0 {
        high -= low;
        low = 0;
    }

    (low as u32, high as u32)
}

/// Pixel rectangle to cut out of the cover-scaled image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Full plan of a smart crop: cover size, normalized windows and pixel box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmartCropPlan {
    pub scaled: (u32, u32),
    pub horizontal: CropWindow,
    pub vertical: CropWindow,
    pub crop: CropBox,
}

/// Plan a smart crop of `source` down to exactly `target`.
pub fn plan_smart_crop(source: (u32, u32), target: (u32, u32), barycenter: f64) -> SmartCropPlan {
    let scaled = cover_dimensions(source, target);
    let (tgt_w, tgt_h) = target;

    let horizontal = crop_window(scaled.0, tgt_w, barycenter);
    let vertical = crop_window(scaled.1, tgt_h, barycenter);

    let (left, right) = window_to_pixels(horizontal, scaled.0, tgt_w);
    let (top, bottom) = window_to_pixels(vertical, scaled.1, tgt_h);

    SmartCropPlan {
        scaled,
        horizontal,
        vertical,
        crop: CropBox {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        },
    }
}

/// Responsive widths that apply to an image of `source_width` pixels.
///
/// Widths larger than the source are dropped; order is preserved.
pub fn responsive_widths(source_width: u32, requested: &[u32]) -> Vec<u32> {
    requested
        .iter()
        .copied()
        .filter(|&w| w <= source_width)
        .collect()
}
