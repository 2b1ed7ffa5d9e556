//! Derivative generators and the per-image result contract.
//!
//! Each generator turns one catalog record into zero or more derived files,
//! going through its own cache namespace:
//!
//! | Generator | Namespace | Consumes | Writes |
//! |---|---|---|---|
//! | [`ResizeGenerator`] | `resize` | sources | the source itself, downsized |
//! | [`ThumbnailGenerator`] | `thumbnails` | sources | `{stem}-thumb-{W}x{H}{ext}` |
//! | [`ResponsiveGenerator`] | `responsive` | sources, thumbnails | `{stem}.{width}{ext}` |
//! | [`FrozenGenerator`] | `frozen` | sources, thumbnails | `{stem}.frozen{ext}` |
//!
//! ## Per-variant flow
//!
//! ```text
//! trivial skip? ──yes──▶ SKIP (no cache access)
//!      │no
//! cache entry has secondary key? ──yes──▶ HIT (reuse bytes)
//!      │no
//! decode (raw bytes from cache or disk) → generate → encode → store ──▶ MISS
//!      │
//! write output file, describe it for the catalog merge
//! ```
//!
//! Generators never touch the catalog. They return an [`ImageResult`] that the
//! orchestrator folds in with [`merge`](crate::merge::merge). A failure on one
//! variant is recorded in [`ImageResult::errors`] and the remaining variants of
//! the image still run.

mod frozen;
mod resize;
mod responsive;
mod thumbnail;

pub use frozen::FrozenGenerator;
pub use resize::ResizeGenerator;
pub use responsive::ResponsiveGenerator;
pub use thumbnail::ThumbnailGenerator;

use crate::cache::{CacheEntry, CacheHandle, CacheStats, VariantStatus};
use crate::catalog::{FrozenImage, ImageRecord, ResponsiveSet};
use crate::config::EncodingConfig;
use crate::imaging::{self, Codec, CodecError, EncodeOptions};
use image::DynamicImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;

/// Secondary key under which the source bytes themselves are cached.
pub const RAW_KEY: &str = "raw";

static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-image failure. Never aborts a batch or a run.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("failed to write {}: {source}", path.display())]
    OutputWrite { path: PathBuf, source: io::Error },
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("output {output} is already claimed by {owner}")]
    OutputConflict { output: String, owner: String },
}

/// Kind of derivative a [`VariantKey`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Resize,
    Thumbnail,
    Responsive,
    Frozen,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resize => "resize",
            Self::Thumbnail => "thumbnail",
            Self::Responsive => "responsive",
            Self::Frozen => "frozen",
        })
    }
}

/// Identity of one requested derivative. Two equal keys against the same
/// content hash are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    pub operation: Operation,
    pub width: u32,
    pub height: u32,
    pub format: Codec,
}

impl VariantKey {
    /// Key inside the cache entry of the source.
    ///
    /// Thumbnails are tagged by crop size (`"300x300"`), everything else by
    /// codec and width (`"webp-480"`). Each operation has its own namespace,
    /// so the tags only need to be unique within one operation.
    pub fn secondary_key(&self) -> String {
        match self.operation {
            Operation::Thumbnail => format!("{}x{}", self.width, self.height),
            Operation::Resize | Operation::Responsive | Operation::Frozen => {
                format!("{}-{}", self.format.name(), self.width)
            }
        }
    }
}

/// Display label and cache outcome of one variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariantInfo {
    pub label: String,
    pub status: VariantStatus,
}

/// New physical content of a record rewritten in place.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub content_hash: String,
}

/// Consumer-facing summary attached to the source's web path.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    /// `{"WxH" → thumbnail web path}`
    Thumbnails(BTreeMap<String, String>),
    Responsive(ResponsiveSet),
    Frozen(FrozenImage),
}

/// Everything a worker reports about one image.
#[derive(Debug)]
pub struct ImageResult {
    pub web_path: String,
    pub variants: Vec<VariantInfo>,
    pub update: Option<RecordUpdate>,
    /// New catalog records for files written next to the source.
    pub derived: Vec<ImageRecord>,
    pub artifact: Option<Artifact>,
    pub errors: Vec<ImageError>,
}

impl ImageResult {
    pub fn new(web_path: &str) -> Self {
        Self {
            web_path: web_path.to_string(),
            variants: Vec::new(),
            update: None,
            derived: Vec::new(),
            artifact: None,
            errors: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One stage of the build: a pure function of a record and a cache handle.
pub trait Generator: Send + Sync {
    /// Cache namespace and report label.
    fn name(&self) -> &'static str;

    /// Whether `record` is an input of this generator.
    fn wants(&self, record: &ImageRecord) -> bool;

    /// Web paths of the new files `process` would write for `record`.
    /// Files rewritten in place are not listed.
    fn outputs(&self, _record: &ImageRecord) -> Vec<String> {
        Vec::new()
    }

    fn process(&self, record: &ImageRecord, cache: &mut CacheHandle) -> ImageResult;
}

// ============================================================================
// Progress events
// ============================================================================

/// Terminal status of a generator run or of a whole build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Ok,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Error => "ERROR",
        })
    }
}

/// Progress reported to the CLI while a build runs.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    GeneratorStarted {
        generator: String,
        image_count: usize,
        batch_count: usize,
        workers: usize,
    },
    ImageProcessed {
        generator: String,
        web_path: String,
        variants: Vec<VariantInfo>,
        errors: Vec<String>,
    },
    BatchFailed {
        generator: String,
        batch: usize,
        image_count: usize,
        message: String,
    },
    GeneratorFinished {
        generator: String,
        status: RunStatus,
        stats: CacheStats,
    },
}

/// Optional event channel. A sink without a receiver drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<Sender<ProcessEvent>>);

impl EventSink {
    pub fn new(sender: Sender<ProcessEvent>) -> Self {
        Self(Some(sender))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.0 {
            // Receiver gone means nobody is listening anymore
            let _ = tx.send(event);
        }
    }
}

// ============================================================================
// Shared generator plumbing
// ============================================================================

/// Lazily loaded source pixels. Raw bytes are read at most once, decoding
/// happens at most once, and only when a variant actually misses.
pub(crate) struct SourceImage<'a> {
    record: &'a ImageRecord,
    raw: Option<Vec<u8>>,
    decoded: Option<DynamicImage>,
}

impl<'a> SourceImage<'a> {
    pub(crate) fn new(record: &'a ImageRecord, cached_raw: Option<Vec<u8>>) -> Self {
        Self {
            record,
            raw: cached_raw,
            decoded: None,
        }
    }

    pub(crate) fn raw(&mut self) -> Result<&[u8], ImageError> {
        let raw = match self.raw.take() {
            Some(raw) => raw,
            None => fs::read(&self.record.disk_path).map_err(|source| ImageError::Io {
                path: self.record.disk_path.clone(),
                source,
            })?,
        };
        Ok(self.raw.insert(raw))
    }

    pub(crate) fn decoded(&mut self) -> Result<&DynamicImage, ImageError> {
        let codec = self.record.codec;
        let image = match self.decoded.take() {
            Some(image) => image,
            None => imaging::decode(self.raw()?, codec)?,
        };
        Ok(self.decoded.insert(image))
    }

    /// Raw bytes if they were loaded, for caching under [`RAW_KEY`].
    pub(crate) fn loaded_raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }
}

/// The cache entry of one image while its variants are being produced.
pub(crate) struct EntrySession {
    entry: CacheEntry,
    caching: bool,
    dirty: bool,
}

impl EntrySession {
    /// Fetch the entry for `record`. With `caching` off the cache is not
    /// consulted and every generated variant is a BYPASS.
    pub(crate) fn open(cache: &mut CacheHandle, record: &ImageRecord, caching: bool) -> Self {
        let caching = caching && cache.is_enabled();
        let entry = if caching {
            cache.fetch(&record.content_hash).unwrap_or_default()
        } else {
            CacheEntry::new()
        };
        Self {
            entry,
            caching,
            dirty: false,
        }
    }

    /// Cached source bytes, if this entry carries them.
    pub(crate) fn raw(&self) -> Option<Vec<u8>> {
        self.entry.get(RAW_KEY).cloned()
    }

    /// Reuse the stored bytes for `key` or produce and remember them.
    pub(crate) fn get_or_generate(
        &mut self,
        key: &VariantKey,
        stats: &mut CacheStats,
        generate: impl FnOnce() -> Result<Vec<u8>, ImageError>,
    ) -> Result<(Vec<u8>, VariantStatus), ImageError> {
        let secondary = key.secondary_key();
        if self.caching
            && let Some(bytes) = self.entry.get(&secondary)
        {
            stats.record(VariantStatus::Hit);
            return Ok((bytes.clone(), VariantStatus::Hit));
        }

        let bytes = generate()?;
        let status = if self.caching {
            self.entry.insert(secondary, bytes.clone());
            self.dirty = true;
            VariantStatus::Miss
        } else {
            VariantStatus::Bypass
        };
        stats.record(status);
        Ok((bytes, status))
    }

    /// Keep the source bytes in the entry so later misses skip the disk read.
    pub(crate) fn keep_raw(&mut self, raw: Option<&[u8]>) {
        if let Some(raw) = raw
            && self.caching
            && !self.entry.contains_key(RAW_KEY)
        {
            self.entry.insert(RAW_KEY.to_string(), raw.to_vec());
            self.dirty = true;
        }
    }

    /// Persist anything generated during this session.
    pub(crate) fn finish(self, cache: &mut CacheHandle, record: &ImageRecord) {
        if self.dirty {
            cache.store(&record.content_hash, &self.entry);
        }
    }
}

/// Encoder settings for `codec`, lossless when the source is.
pub(crate) fn encode_options(encoding: &EncodingConfig, codec: Codec, lossless_source: bool) -> EncodeOptions {
    EncodeOptions::for_codec(
        codec,
        encoding.jpeg_quality,
        encoding.webp_quality,
        lossless_source,
    )
}

/// Write `bytes` to `path` via a temp file and rename, so readers never see a
/// partial file. Files that already hold exactly `bytes` are left untouched.
pub(crate) fn write_output(path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
    let write_err = |source| ImageError::OutputWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Ok(existing) = fs::read(path)
        && existing == bytes
    {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_file_name(format!(".{file_name}.partial-{}-{n}", std::process::id()));
    fs::write(&tmp, bytes).map_err(write_err)?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        write_err(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::test_helpers::{catalog_record, write_jpeg};
    use tempfile::TempDir;

    fn key(operation: Operation, width: u32, height: u32, format: Codec) -> VariantKey {
        VariantKey {
            operation,
            width,
            height,
            format,
        }
    }

    // =========================================================================
    // VariantKey
    // =========================================================================

    #[test]
    fn thumbnail_key_is_dimensions() {
        assert_eq!(
            key(Operation::Thumbnail, 300, 300, Codec::Jpeg).secondary_key(),
            "300x300"
        );
    }

    #[test]
    fn responsive_key_is_codec_and_width() {
        assert_eq!(
            key(Operation::Responsive, 480, 320, Codec::WebP).secondary_key(),
            "webp-480"
        );
    }

    #[test]
    fn equal_keys_have_equal_secondary_keys() {
        let a = key(Operation::Frozen, 42, 28, Codec::Png);
        let b = key(Operation::Frozen, 42, 28, Codec::Png);
        assert_eq!(a, b);
        assert_eq!(a.secondary_key(), b.secondary_key());
    }

    // =========================================================================
    // EntrySession
    // =========================================================================

    #[test]
    fn session_miss_then_hit() {
        let tmp = TempDir::new().unwrap();
        let record = catalog_record(tmp.path(), "a.jpg", 32, 32);
        let store = CacheStore::at(&tmp.path().join("cache"), "test");
        let k = key(Operation::Responsive, 16, 16, Codec::Jpeg);

        let mut handle = store.open().unwrap();
        let mut session = EntrySession::open(&mut handle, &record, true);
        let mut stats = CacheStats::default();
        let (bytes, status) = session
            .get_or_generate(&k, &mut stats, || Ok(b"generated".to_vec()))
            .unwrap();
        assert_eq!(status, VariantStatus::Miss);
        session.finish(&mut handle, &record);

        let mut session = EntrySession::open(&mut handle, &record, true);
        let (again, status) = session
            .get_or_generate(&k, &mut stats, || panic!("must not regenerate"))
            .unwrap();
        assert_eq!(status, VariantStatus::Hit);
        assert_eq!(again, bytes);
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn session_without_caching_bypasses() {
        let tmp = TempDir::new().unwrap();
        let record = catalog_record(tmp.path(), "a.jpg", 32, 32);
        let mut handle = CacheStore::at(&tmp.path().join("cache"), "test").open().unwrap();
        let mut stats = CacheStats::default();

        let mut session = EntrySession::open(&mut handle, &record, false);
        let (_, status) = session
            .get_or_generate(&key(Operation::Frozen, 4, 4, Codec::Jpeg), &mut stats, || {
                Ok(vec![1])
            })
            .unwrap();
        assert_eq!(status, VariantStatus::Bypass);
        session.finish(&mut handle, &record);
        assert_eq!(handle.get(&record.content_hash).unwrap(), None);
    }

    #[test]
    fn session_generation_error_is_not_cached() {
        let tmp = TempDir::new().unwrap();
        let record = catalog_record(tmp.path(), "a.jpg", 32, 32);
        let mut handle = CacheStore::at(&tmp.path().join("cache"), "test").open().unwrap();
        let mut stats = CacheStats::default();

        let mut session = EntrySession::open(&mut handle, &record, true);
        let result = session.get_or_generate(
            &key(Operation::Resize, 8, 8, Codec::Jpeg),
            &mut stats,
            || Err(ImageError::UnsupportedFormat("bmp".into())),
        );
        assert!(result.is_err());
        session.finish(&mut handle, &record);
        assert_eq!(handle.get(&record.content_hash).unwrap(), None);
        assert_eq!(stats.total(), 0);
    }

    // =========================================================================
    // SourceImage and output writing
    // =========================================================================

    #[test]
    fn source_image_prefers_cached_raw() {
        let tmp = TempDir::new().unwrap();
        let record = catalog_record(tmp.path(), "a.jpg", 20, 10);
        let disk = fs::read(&record.disk_path).unwrap();
        // Delete the file: decoding must work from the cached bytes alone
        fs::remove_file(&record.disk_path).unwrap();

        let mut source = SourceImage::new(&record, Some(disk));
        let img = source.decoded().unwrap();
        assert_eq!((img.width(), img.height()), (20, 10));
    }

    #[test]
    fn source_image_missing_file_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let record = catalog_record(tmp.path(), "a.jpg", 20, 10);
        fs::remove_file(&record.disk_path).unwrap();
        let mut source = SourceImage::new(&record, None);
        assert!(matches!(source.decoded(), Err(ImageError::Io { .. })));
    }

    #[test]
    fn write_output_creates_parents_and_overwrites() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("deep/dir/out.jpg");
        write_output(&path, b"one").unwrap();
        write_output(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
    }

    #[test]
    fn concurrent_writes_to_same_stem_stay_separate() {
        let tmp = TempDir::new().unwrap();
        let jpg = tmp.path().join("photo.jpg");
        let png = tmp.path().join("photo.png");

        for round in 0..200u32 {
            let a = format!("jpeg bytes {round}").into_bytes();
            let b = format!("png bytes {round}").into_bytes();
            std::thread::scope(|s| {
                let first = s.spawn(|| write_output(&jpg, &a));
                let second = s.spawn(|| write_output(&png, &b));
                first.join().unwrap().unwrap();
                second.join().unwrap().unwrap();
            });
            assert_eq!(fs::read(&jpg).unwrap(), a);
            assert_eq!(fs::read(&png).unwrap(), b);
        }

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().contains(".partial-"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn write_output_into_file_parent_fails() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        write_jpeg(&blocker, 4, 4);
        let result = write_output(&blocker.join("out.jpg"), b"x");
        assert!(matches!(result, Err(ImageError::OutputWrite { .. })));
    }
}
