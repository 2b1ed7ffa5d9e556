//! Image processing in pure Rust, no system libraries.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader::into_dimensions` |
//! | **Resize** | `resize_exact` with Lanczos3 |
//! | **Thumbnail** | cover scale + barycentric crop (`crop_imm`) |
//! | **Placeholder** | scale to width + `blur` |
//! | **Encode** | JPEG / PNG / GIF / lossless WebP encoders |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and crop math (unit testable)
//! - **Parameters**: Data structures describing an encode or blur
//! - **Codec**: Format registry, decode and encode
//! - **Operations**: Pixel operations on decoded images

pub mod calculations;
pub mod codec;
pub mod operations;
mod params;

pub use codec::{Codec, CodecError, decode, encode, read_dimensions};
pub use operations::{blur_placeholder, resize_to_width, scale_to_width, smart_crop};
pub use params::{BlurParams, EncodeOptions, Quality};
