//! Codec registry, decoding and format-aware encoding.
//!
//! | Codec | Decode | Encode |
//! |---|---|---|
//! | JPEG | `image` (zune-jpeg) | `JpegEncoder` with quality |
//! | PNG  | `image` | `PngEncoder` (always lossless) |
//! | GIF  | `image` (first frame) | `GifEncoder` (always lossless) |
//! | WEBP | `image` | `WebPEncoder::new_lossless` after channel quantization |
//!
//! The `image` crate only ships a lossless WebP encoder. Lossy quality is
//! emulated by quantizing RGB channels into fewer levels before the lossless
//! pass, which keeps the binary free of libwebp.

use super::params::EncodeOptions;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to decode {codec}: {message}")]
    Decode { codec: Codec, message: String },
    #[error("failed to encode {codec}: {message}")]
    Encode { codec: Codec, message: String },
}

/// Decoder/encoder identifier for one supported image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Jpeg,
    Png,
    Gif,
    #[serde(rename = "webp")]
    WebP,
}

impl Codec {
    /// Map a file extension (with or without the dot, any case) to its codec.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    /// Short lowercase name used in cache secondary keys (`"webp-480"`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::WebP => "image/webp",
        }
    }

    /// Extension written for files this engine creates in this codec.
    pub fn default_extension(self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Gif => ".gif",
            Self::WebP => ".webp",
        }
    }

    /// Palette/indexed source formats; their derivatives are always lossless.
    pub fn is_palette(self) -> bool {
        matches!(self, Self::Png | Self::Gif)
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::Gif => ImageFormat::Gif,
            Self::WebP => ImageFormat::WebP,
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Read width and height from the header without decoding pixels.
pub fn read_dimensions(bytes: &[u8], codec: Codec) -> Result<(u32, u32), CodecError> {
    ImageReader::with_format(Cursor::new(bytes), codec.image_format())
        .into_dimensions()
        .map_err(|e| CodecError::Decode {
            codec,
            message: e.to_string(),
        })
}

/// Decode raw file bytes into a pixel buffer.
pub fn decode(bytes: &[u8], codec: Codec) -> Result<DynamicImage, CodecError> {
    image::load_from_memory_with_format(bytes, codec.image_format()).map_err(|e| {
        CodecError::Decode {
            codec,
            message: e.to_string(),
        }
    })
}

/// Re-encode a pixel buffer to the requested codec.
pub fn encode(image: &DynamicImage, options: EncodeOptions) -> Result<Vec<u8>, CodecError> {
    let codec = options.codec;
    let encode_err = |e: image::ImageError| CodecError::Encode {
        codec,
        message: e.to_string(),
    };

    let mut buffer = Vec::new();
    match codec {
        Codec::Jpeg => {
            // JPEG has no alpha channel
            let rgb = image.to_rgb8();
            let (width, height) = rgb.dimensions();
            JpegEncoder::new_with_quality(&mut buffer, options.quality.value())
                .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        Codec::Png => {
            let rgba = image.to_rgba8();
            let (width, height) = rgba.dimensions();
            PngEncoder::new(&mut buffer)
                .write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(encode_err)?;
        }
        Codec::Gif => {
            let rgba = image.to_rgba8();
            let (width, height) = rgba.dimensions();
            // The trailer is written when the encoder drops
            let mut encoder = GifEncoder::new(&mut buffer);
            encoder
                .encode(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(encode_err)?;
        }
        Codec::WebP => {
            let mut rgba = image.to_rgba8();
            if !options.lossless {
                quantize_rgb(rgba.as_mut(), options.quality.value());
            }
            let (width, height) = rgba.dimensions();
            WebPEncoder::new_lossless(&mut buffer)
                .write_image(rgba.as_raw(), width, height, ExtendedColorType::Rgba8)
                .map_err(encode_err)?;
        }
    }
    Ok(buffer)
}

/// Reduce each RGB channel to fewer levels so the lossless encoder compresses
/// harder. Alpha is untouched. Quality 100 is a no-op.
fn quantize_rgb(data: &mut [u8], quality: u8) {
    if quality >= 100 {
        return;
    }
    let levels = levels_from_quality(quality);
    let step = 255.0 / (levels as f32 - 1.0);
    for pixel in data.chunks_exact_mut(4) {
        for channel in pixel.iter_mut().take(3) {
            let bucket = (f32::from(*channel) / step).round();
            *channel = (bucket * step).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// Finer palettes at high quality, aggressively coarse at low quality.
fn levels_from_quality(quality: u8) -> u16 {
    if quality >= 100 {
        return 256;
    }
    let normalized = (quality as f32).clamp(1.0, 100.0) / 100.0;
    let levels = 2.0 + normalized * normalized * 254.0;
    levels.round().clamp(2.0, 256.0) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::Quality;
    use image::{Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 5 % 256) as u8, 128, 255])
        }))
    }

    fn options(codec: Codec, quality: u8, lossless: bool) -> EncodeOptions {
        EncodeOptions {
            codec,
            quality: Quality::new(quality),
            lossless,
        }
    }

    #[test]
    fn extension_mapping() {
        assert_eq!(Codec::from_extension("jpg"), Some(Codec::Jpeg));
        assert_eq!(Codec::from_extension(".JPEG"), Some(Codec::Jpeg));
        assert_eq!(Codec::from_extension("png"), Some(Codec::Png));
        assert_eq!(Codec::from_extension(".gif"), Some(Codec::Gif));
        assert_eq!(Codec::from_extension("webp"), Some(Codec::WebP));
        assert_eq!(Codec::from_extension("bmp"), None);
        assert_eq!(Codec::from_extension(""), None);
    }

    #[test]
    fn palette_codecs() {
        assert!(Codec::Png.is_palette());
        assert!(Codec::Gif.is_palette());
        assert!(!Codec::Jpeg.is_palette());
        assert!(!Codec::WebP.is_palette());
    }

    #[test]
    fn codec_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Codec::WebP).unwrap(), "\"webp\"");
        assert_eq!(serde_json::to_string(&Codec::Jpeg).unwrap(), "\"jpeg\"");
    }

    #[test]
    fn encode_then_read_dimensions_for_every_codec() {
        let img = gradient(40, 24);
        for codec in [Codec::Jpeg, Codec::Png, Codec::Gif, Codec::WebP] {
            let bytes = encode(&img, options(codec, 80, false)).unwrap();
            assert!(!bytes.is_empty(), "{codec} produced no bytes");
            assert_eq!(read_dimensions(&bytes, codec).unwrap(), (40, 24));
            let decoded = decode(&bytes, codec).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (40, 24));
        }
    }

    #[test]
    fn encode_is_deterministic() {
        let img = gradient(32, 32);
        let a = encode(&img, options(Codec::Jpeg, 85, false)).unwrap();
        let b = encode(&img, options(Codec::Jpeg, 85, false)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn lossless_webp_preserves_pixels() {
        let img = gradient(16, 16);
        let bytes = encode(&img, options(Codec::WebP, 10, true)).unwrap();
        let decoded = decode(&bytes, Codec::WebP).unwrap().to_rgba8();
        assert_eq!(decoded, img.to_rgba8());
    }

    #[test]
    fn lossy_webp_quantizes_channels() {
        let img = gradient(16, 16);
        let bytes = encode(&img, options(Codec::WebP, 10, false)).unwrap();
        let decoded = decode(&bytes, Codec::WebP).unwrap().to_rgba8();
        assert_ne!(decoded, img.to_rgba8());
    }

    #[test]
    fn decode_garbage_is_codec_error() {
        let result = decode(b"definitely not a jpeg", Codec::Jpeg);
        assert!(matches!(result, Err(CodecError::Decode { codec: Codec::Jpeg, .. })));
    }

    #[test]
    fn quantize_full_quality_is_noop() {
        let mut data = vec![13, 77, 201, 255];
        quantize_rgb(&mut data, 100);
        assert_eq!(data, vec![13, 77, 201, 255]);
    }

    #[test]
    fn quantize_leaves_alpha() {
        let mut data = vec![13, 77, 201, 42];
        quantize_rgb(&mut data, 1);
        assert_eq!(data[3], 42);
        // Two levels: every channel snaps to 0 or 255
        assert!(data[..3].iter().all(|&c| c == 0 || c == 255));
    }
}
