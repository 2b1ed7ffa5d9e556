//! Engine configuration.
//!
//! Handles loading, validating, and merging `picture-press.toml`. Every
//! recognized option is enumerated here with its default; the file is sparse
//! and only needs the keys it wants to override. Unknown keys are rejected to
//! catch typos early.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [scan]
//! extensions = ["jpg", "jpeg", "png", "gif"]
//!
//! [resize]
//! enabled = true
//! max_width = 1280          # Sources wider than this are resized in place
//!
//! [encoding]
//! jpeg_quality = 85
//! webp_quality = 85
//!
//! [thumbnails]
//! enabled = true
//! sizes = [[300, 300]]      # [width, height] crops
//! barycenter = 0.5          # Crop window center (0 = left/top, 1 = right/bottom)
//!
//! [responsive]
//! enabled = true
//! widths = [320, 640, 960, 1280]
//! additional_formats = ["webp"]
//! cache_min_image_width = 320
//!
//! [frozen]
//! enabled = true
//! width = 42
//! blur_radius = 2.0
//!
//! [processing]
//! batch_size = 20
//! max_processes = 4         # Omit for auto = CPU cores
//!
//! [cache]
//! max_size_mb = 2048
//! ```

use crate::imaging::Codec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `picture-press.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Which files the catalog scan picks up.
    pub scan: ScanConfig,
    /// In-place downsizing of oversized sources.
    pub resize: ResizeConfig,
    /// Per-codec encoder quality.
    pub encoding: EncodingConfig,
    /// Smart-cropped thumbnails.
    pub thumbnails: ThumbnailsConfig,
    /// Responsive width/format sets.
    pub responsive: ResponsiveConfig,
    /// Blurred inline placeholders.
    pub frozen: FrozenConfig,
    /// Batch scheduling.
    pub processing: ProcessingConfig,
    /// Derivative cache limits.
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "scan.extensions must not be empty".into(),
            ));
        }
        for ext in &self.scan.extensions {
            if Codec::from_extension(ext).is_none() {
                return Err(ConfigError::Validation(format!(
                    "scan.extensions: no codec for '{ext}'"
                )));
            }
        }
        if self.resize.max_width == 0 {
            return Err(ConfigError::Validation(
                "resize.max_width must be non-zero".into(),
            ));
        }
        if self.encoding.jpeg_quality > 100 || self.encoding.webp_quality > 100 {
            return Err(ConfigError::Validation(
                "encoding quality values must be 0-100".into(),
            ));
        }
        if self.thumbnails.sizes.iter().any(|[w, h]| *w == 0 || *h == 0) {
            return Err(ConfigError::Validation(
                "thumbnails.sizes values must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.thumbnails.barycenter) {
            return Err(ConfigError::Validation(
                "thumbnails.barycenter must be within 0.0-1.0".into(),
            ));
        }
        if self.responsive.widths.contains(&0) {
            return Err(ConfigError::Validation(
                "responsive.widths values must be non-zero".into(),
            ));
        }
        for format in &self.responsive.additional_formats {
            if Codec::from_extension(format).is_none() {
                return Err(ConfigError::Validation(format!(
                    "responsive.additional_formats: no codec for '{format}'"
                )));
            }
        }
        if self.frozen.width == 0 {
            return Err(ConfigError::Validation(
                "frozen.width must be non-zero".into(),
            ));
        }
        if !(self.frozen.blur_radius >= 0.0 && self.frozen.blur_radius.is_finite()) {
            return Err(ConfigError::Validation(
                "frozen.blur_radius must be a non-negative number".into(),
            ));
        }
        if self.processing.batch_size == 0 {
            return Err(ConfigError::Validation(
                "processing.batch_size must be non-zero".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Catalog scan settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// File extensions (without the dot, case-insensitive) to include.
    pub extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// In-place resize settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResizeConfig {
    pub enabled: bool,
    /// Sources wider than this many pixels are downsized to exactly this width.
    pub max_width: u32,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_width: 1280,
        }
    }
}

/// Encoder quality settings (0 = worst, 100 = best).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    pub jpeg_quality: u8,
    pub webp_quality: u8,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 85,
            webp_quality: 85,
        }
    }
}

/// Thumbnail generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThumbnailsConfig {
    pub enabled: bool,
    /// Crop sizes as `[width, height]`.
    pub sizes: Vec<[u32; 2]>,
    /// Normalized center of interest used to place the crop window.
    pub barycenter: f64,
}

impl Default for ThumbnailsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sizes: vec![[300, 300]],
            barycenter: 0.5,
        }
    }
}

/// Responsive image settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResponsiveConfig {
    pub enabled: bool,
    /// Pixel widths to generate. Widths larger than the source are skipped.
    pub widths: Vec<u32>,
    /// Formats generated in addition to the source's own format.
    pub additional_formats: Vec<String>,
    /// Sources narrower than this bypass the cache.
    pub cache_min_image_width: u32,
}

impl Default for ResponsiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            widths: vec![320, 640, 960, 1280],
            additional_formats: vec!["webp".to_string()],
            cache_min_image_width: 320,
        }
    }
}

/// Blurred placeholder settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrozenConfig {
    pub enabled: bool,
    pub width: u32,
    pub blur_radius: f32,
}

impl Default for FrozenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 42,
            blur_radius: 2.0,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Images per batch handed to a single worker.
    pub batch_size: usize,
    /// Maximum number of parallel workers.
    /// When absent or null, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            max_processes: None,
        }
    }
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Derivative cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Size cap per generator namespace; least recently used entries are
    /// evicted past it.
    pub max_size_mb: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_size_mb: 2048 }
    }
}

impl CacheConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(EngineConfig::default())
        .map_err(|e| ConfigError::Validation(format!("default config must serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<EngineConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file.
///
/// A missing file yields the validated stock defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# picture-press configuration
# ===========================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Catalog scan
# ---------------------------------------------------------------------------
[scan]
# Extensions (case-insensitive) picked up under the input directory.
extensions = ["jpg", "jpeg", "png", "gif"]

# ---------------------------------------------------------------------------
# In-place resize
# ---------------------------------------------------------------------------
[resize]
enabled = true
# Sources wider than this are overwritten with a copy exactly this wide.
max_width = 1280

# ---------------------------------------------------------------------------
# Encoder quality (0 = worst, 100 = best)
# ---------------------------------------------------------------------------
[encoding]
jpeg_quality = 85
webp_quality = 85

# ---------------------------------------------------------------------------
# Thumbnails: {stem}-thumb-{W}x{H}{extension}
# ---------------------------------------------------------------------------
[thumbnails]
enabled = true
sizes = [[300, 300]]
# Center of interest for the crop window, 0.5 = geometric center.
barycenter = 0.5

# ---------------------------------------------------------------------------
# Responsive variants: {stem}.{width}{extension}
# ---------------------------------------------------------------------------
[responsive]
enabled = true
widths = [320, 640, 960, 1280]
# Generated in addition to the source's own format.
additional_formats = ["webp"]
# Images narrower than this are regenerated every build instead of cached.
cache_min_image_width = 320

# ---------------------------------------------------------------------------
# Frozen placeholders: {stem}.frozen{extension} + base64 data URI
# ---------------------------------------------------------------------------
[frozen]
enabled = true
width = 42
blur_radius = 2.0

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Images handed to one worker at a time.
batch_size = 20
# Maximum parallel workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Cache
# ---------------------------------------------------------------------------
[cache]
# Per-generator size cap; least recently used entries are evicted past it.
max_size_mb = 2048
"##
}
