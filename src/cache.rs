//! Content-addressed derivative cache for incremental builds.
//!
//! Re-encoding is the bottleneck of every generator. This module lets a
//! generator skip the work when the source bytes and the requested variant
//! haven't changed since the last build.
//!
//! # Design
//!
//! Each generator owns an independent namespace (`resize`, `thumbnails`,
//! `responsive`, `frozen`) so unrelated variant shapes never collide and one
//! generator can be wiped without touching the others.
//!
//! ## Cache keys
//!
//! The cache is **two-level**:
//!
//! - **Primary key**: the source's `content_hash` (SHA-256 of its raw bytes).
//!   Any edit to the file produces a new key, so there is no explicit
//!   invalidation; entries for abandoned hashes are never looked up again and
//!   are reclaimed by [`CacheStore::prune`].
//! - **Secondary key**: names one derivative inside the entry, such as
//!   `"webp-480"`, `"300x300"` or `"raw"` for the source bytes themselves. One
//!   entry accumulates every variant generated for that source across builds.
//!
//! ## Storage
//!
//! ```text
//! <cache>/<namespace>/v1/<hash[..2]>/<hash>/
//!     ├── .last-used        # touched on every hit, drives LRU eviction
//!     ├── raw.bin
//!     ├── jpeg-640.bin
//!     └── webp-640.bin
//! ```
//!
//! Every blob is written to a unique temp file and renamed into place, so
//! concurrent workers writing the same key never expose a torn file; the
//! last rename wins and both writers hold identical bytes.
//!
//! ## Failures
//!
//! The cache is an optimisation. [`CacheHandle::fetch`] and
//! [`CacheHandle::store`] turn every [`CacheError`] into a forced MISS (or a
//! dropped write), log it and count it in [`CacheStats::io_errors`].
//!
//! ## Bypassing the cache
//!
//! `--no-cache` builds use [`CacheStore::disabled`]: every lookup misses and
//! nothing is written.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

/// Layout version. Bump to orphan every existing entry when the on-disk
/// format or key computation changes.
const CACHE_VERSION: &str = "v1";

const BLOB_SUFFIX: &str = ".bin";
const LAST_USED_MARKER: &str = ".last-used";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid cache key: {0:?}")]
    InvalidKey(String),
}

/// One cache value: every stored derivative of one source, by secondary key.
pub type CacheEntry = BTreeMap<String, Vec<u8>>;

/// Location of one generator's namespace. Cheap to clone and send to workers,
/// each of which [opens](CacheStore::open) its own handle.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: Option<PathBuf>,
}

impl CacheStore {
    /// Namespace `namespace` under the cache root.
    pub fn at(root: &Path, namespace: &str) -> Self {
        Self {
            dir: Some(root.join(namespace).join(CACHE_VERSION)),
        }
    }

    /// A store that never hits and never writes.
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn open(&self) -> Result<CacheHandle, CacheError> {
        match &self.dir {
            Some(dir) => CacheHandle::open(dir),
            None => Ok(CacheHandle::disabled()),
        }
    }

    /// Evict least recently used entries until the namespace fits in `max_bytes`.
    pub fn prune(&self, max_bytes: u64) -> Result<PruneStats, CacheError> {
        let Some(dir) = &self.dir else {
            return Ok(PruneStats::default());
        };
        if !dir.is_dir() {
            return Ok(PruneStats::default());
        }

        let mut entries = Vec::new();
        for shard in fs::read_dir(dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    entries.push(entry_usage(&entry.path())?);
                }
            }
        }

        let total: u64 = entries.iter().map(|e| e.bytes).sum();
        let mut stats = PruneStats {
            entries: entries.len(),
            bytes: total,
            ..Default::default()
        };
        if total <= max_bytes {
            return Ok(stats);
        }

        entries.sort_by_key(|e| e.last_used);
        let mut remaining = total;
        for entry in entries {
            if remaining <= max_bytes {
                break;
            }
            fs::remove_dir_all(&entry.path)?;
            remaining -= entry.bytes;
            stats.evicted += 1;
            stats.bytes_freed += entry.bytes;
        }
        debug!(
            dir = %dir.display(),
            evicted = stats.evicted,
            freed = stats.bytes_freed,
            "pruned cache namespace"
        );
        Ok(stats)
    }
}

/// Outcome of a [`CacheStore::prune`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub entries: usize,
    pub bytes: u64,
    pub evicted: usize,
    pub bytes_freed: u64,
}

struct EntryUsage {
    path: PathBuf,
    bytes: u64,
    last_used: SystemTime,
}

fn entry_usage(path: &Path) -> io::Result<EntryUsage> {
    let mut bytes = 0;
    for file in fs::read_dir(path)? {
        let file = file?;
        bytes += file.metadata()?.len();
    }
    let last_used = fs::metadata(path.join(LAST_USED_MARKER))
        .or_else(|_| fs::metadata(path))?
        .modified()?;
    Ok(EntryUsage {
        path: path.to_path_buf(),
        bytes,
        last_used,
    })
}

/// A worker's private view of one namespace for the duration of one batch.
pub struct CacheHandle {
    dir: Option<PathBuf>,
    stats: CacheStats,
}

impl CacheHandle {
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            stats: CacheStats::default(),
        })
    }

    pub fn disabled() -> Self {
        Self {
            dir: None,
            stats: CacheStats::default(),
        }
    }

    /// Every stored derivative for `content_hash`, or `None` when absent.
    pub fn get(&mut self, content_hash: &str) -> Result<Option<CacheEntry>, CacheError> {
        let Some(entry_dir) = self.entry_dir(content_hash)? else {
            return Ok(None);
        };
        if !entry_dir.is_dir() {
            return Ok(None);
        }

        let mut entry = CacheEntry::new();
        for file in fs::read_dir(&entry_dir)? {
            let file = file?;
            let name = file.file_name();
            let Some(key) = name.to_str().and_then(|n| n.strip_suffix(BLOB_SUFFIX)) else {
                continue;
            };
            if key.starts_with('.') {
                continue;
            }
            entry.insert(key.to_string(), fs::read(file.path())?);
        }
        if entry.is_empty() {
            return Ok(None);
        }

        touch(&entry_dir)?;
        Ok(Some(entry))
    }

    /// Store every blob of `entry` under `content_hash`. Keys already on disk
    /// are left alone.
    pub fn put(&mut self, content_hash: &str, entry: &CacheEntry) -> Result<(), CacheError> {
        let Some(entry_dir) = self.entry_dir(content_hash)? else {
            return Ok(());
        };
        for key in entry.keys() {
            validate_key(key)?;
        }
        fs::create_dir_all(&entry_dir)?;

        for (key, bytes) in entry {
            let target = entry_dir.join(format!("{key}{BLOB_SUFFIX}"));
            if target.exists() {
                continue;
            }
            write_atomic(&target, bytes)?;
        }
        touch(&entry_dir)?;
        Ok(())
    }

    /// [`get`](Self::get) with failures downgraded to a logged MISS.
    pub fn fetch(&mut self, content_hash: &str) -> Option<CacheEntry> {
        match self.get(content_hash) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(hash = content_hash, error = %e, "cache read failed, treating as miss");
                self.stats.io_errors += 1;
                None
            }
        }
    }

    /// [`put`](Self::put) with failures logged and counted.
    pub fn store(&mut self, content_hash: &str, entry: &CacheEntry) {
        if let Err(e) = self.put(content_hash, entry) {
            warn!(hash = content_hash, error = %e, "cache write failed");
            self.stats.io_errors += 1;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    pub fn stats_mut(&mut self) -> &mut CacheStats {
        &mut self.stats
    }

    /// Release the handle, returning what it counted.
    pub fn close(self) -> CacheStats {
        self.stats
    }

    fn entry_dir(&self, content_hash: &str) -> Result<Option<PathBuf>, CacheError> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if content_hash.len() < 2 || !content_hash.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CacheError::InvalidKey(content_hash.to_string()));
        }
        Ok(Some(dir.join(&content_hash[..2]).join(content_hash)))
    }
}

/// Secondary keys become file names: ASCII letters, digits, `-`, `_` and `.`,
/// not starting with a dot.
fn validate_key(key: &str) -> Result<(), CacheError> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

fn write_atomic(target: &Path, bytes: &[u8]) -> io::Result<()> {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = target.with_extension(format!("tmp-{}-{n}", std::process::id()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, target).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn touch(entry_dir: &Path) -> io::Result<()> {
    fs::write(entry_dir.join(LAST_USED_MARKER), b"")
}

/// How each requested variant was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VariantStatus {
    /// Reused stored bytes.
    Hit,
    /// Generated and stored.
    Miss,
    /// Nothing to do (e.g. the source is already narrow enough).
    Skip,
    /// Generated without touching the cache (cache disabled or source too small).
    Bypass,
}

impl fmt::Display for VariantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
            Self::Skip => "SKIP",
            Self::Bypass => "BYPASS",
        })
    }
}

/// Summary of cache performance for one generator run.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    pub skips: u32,
    pub bypasses: u32,
    pub io_errors: u32,
}

impl CacheStats {
    pub fn record(&mut self, status: VariantStatus) {
        match status {
            VariantStatus::Hit => self.hits += 1,
            VariantStatus::Miss => self.misses += 1,
            VariantStatus::Skip => self.skips += 1,
            VariantStatus::Bypass => self.bypasses += 1,
        }
    }

    /// Fold another worker's counters into these.
    pub fn absorb(&mut self, other: &CacheStats) {
        self.hits += other.hits;
        self.misses += other.misses;
        self.skips += other.skips;
        self.bypasses += other.bypasses;
        self.io_errors += other.io_errors;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses + self.skips + self.bypasses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generated = self.misses + self.bypasses;
        if self.hits > 0 {
            write!(f, "{} cached, {} generated", self.hits, generated)?;
        } else {
            write!(f, "{} generated", generated)?;
        }
        if self.skips > 0 {
            write!(f, ", {} skipped", self.skips)?;
        }
        write!(f, " ({} total)", self.total())?;
        if self.io_errors > 0 {
            write!(f, ", {} cache errors", self.io_errors)?;
        }
        Ok(())
    }
}
