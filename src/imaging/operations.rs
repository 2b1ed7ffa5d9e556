//! Pixel operations on decoded images.
//!
//! These functions combine the [`calculations`](super::calculations) with the
//! `image` crate's resampling. They never touch the filesystem or the cache;
//! generators decode once and call into here for each variant.

use super::calculations::{SmartCropPlan, plan_smart_crop, scaled_height};
use image::DynamicImage;
use image::imageops::FilterType;

const FILTER: FilterType = FilterType::Lanczos3;

/// Downscale to `max_width`, keeping the aspect ratio.
///
/// Returns `None` when the image is already narrow enough; images are never
/// upscaled.
pub fn resize_to_width(image: &DynamicImage, max_width: u32) -> Option<DynamicImage> {
    if image.width() <= max_width {
        return None;
    }
    let height = scaled_height(image.width(), image.height(), max_width);
    Some(image.resize_exact(max_width, height, FILTER))
}

/// Resize to exactly `width` pixels wide, keeping the aspect ratio.
///
/// Unlike [`resize_to_width`] this always produces output, returning a copy
/// when the width already matches.
pub fn scale_to_width(image: &DynamicImage, width: u32) -> DynamicImage {
    if image.width() == width {
        return image.clone();
    }
    let height = scaled_height(image.width(), image.height(), width);
    image.resize_exact(width, height, FILTER)
}

/// Cover-scale then crop to exactly `width` x `height`.
///
/// The crop window is centered on `barycenter` (0.0 = left/top edge,
/// 1.0 = right/bottom edge) on both axes.
pub fn smart_crop(image: &DynamicImage, width: u32, height: u32, barycenter: f64) -> DynamicImage {
    let plan = plan_smart_crop((image.width(), image.height()), (width, height), barycenter);
    apply_crop_plan(image, &plan)
}

fn apply_crop_plan(image: &DynamicImage, plan: &SmartCropPlan) -> DynamicImage {
    let (sw, sh) = plan.scaled;
    let scaled = if (image.width(), image.height()) == (sw, sh) {
        image.clone()
    } else {
        image.resize_exact(sw, sh, FILTER)
    };
    let c = plan.crop;
    scaled.crop_imm(c.x, c.y, c.width, c.height)
}

/// Gaussian blur with standard deviation `radius`. A zero radius is a copy.
pub fn gaussian_blur(image: &DynamicImage, radius: f32) -> DynamicImage {
    if radius <= 0.0 {
        return image.clone();
    }
    image.blur(radius)
}

/// Tiny blurred stand-in shown while the real image loads.
///
/// Scales to `width` (up or down) then blurs.
pub fn blur_placeholder(image: &DynamicImage, width: u32, radius: f32) -> DynamicImage {
    let small = scale_to_width(image, width);
    gaussian_blur(&small, radius)
}
