//! Parameter types for image operations.
//!
//! These structs describe *what* to produce, not *how*. The generators in
//! [`process`](crate::process) build them from config and a catalog record and
//! hand them to the pure functions in [`operations`](super::operations) and
//! [`codec`](super::codec).
//!
//! ## Types
//!
//! - [`Quality`]: lossy encoding quality (1–100, default 85). Clamped on construction.
//! - [`EncodeOptions`]: target codec, quality and the lossless switch for one encode.
//! - [`BlurParams`]: width and Gaussian radius of a frozen placeholder.

use super::codec::Codec;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u8);

impl Quality {
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

/// Everything the encoder needs to turn pixels into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub codec: Codec,
    pub quality: Quality,
    /// Skip every lossy step. Forced on for palette sources (PNG, GIF) so a
    /// later quality pass does not introduce banding.
    pub lossless: bool,
}

impl EncodeOptions {
    /// Pick the codec's quality knob from the two configured values and force
    /// lossless output when the source was a palette format.
    pub fn for_codec(codec: Codec, jpeg_quality: u8, webp_quality: u8, lossless_source: bool) -> Self {
        let quality = match codec {
            Codec::Jpeg => Quality::new(jpeg_quality),
            Codec::WebP => Quality::new(webp_quality),
            Codec::Png | Codec::Gif => Quality::new(100),
        };
        Self {
            codec,
            quality,
            lossless: lossless_source || codec.is_palette(),
        }
    }
}

/// Frozen placeholder parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurParams {
    pub width: u32,
    pub radius: f32,
}

impl Default for BlurParams {
    fn default() -> Self {
        Self {
            width: 42,
            radius: 2.0,
        }
    }
}
