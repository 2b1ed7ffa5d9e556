//! Image catalog: the single source of truth about every image in a build.
//!
//! [`scan`] walks the input directory, reads each matching file once, takes
//! its dimensions from the header and hashes the raw bytes. Generators read
//! records from the catalog and the orchestrator folds their results back in
//! (see [`merge`](crate::merge)).
//!
//! ## Paths
//!
//! ```text
//! site/                             # site root (web paths are relative to it)
//! └── static/img/                   # input directory (scanned)
//!     ├── photo.jpg                 # → web_path "/static/img/photo.jpg"
//!     ├── photo-thumb-300x300.jpg   # previous output, ignored by the scan
//!     └── trips/boat.png            # → web_path "/static/img/trips/boat.png"
//! ```
//!
//! ## Content hash
//!
//! `content_hash` is the SHA-256 of the raw file bytes, not of decoded
//! pixels. Decoders are not guaranteed bit-stable across versions; bytes are.
//! Any byte change in a file changes its hash, which in turn changes every
//! cache key derived from it.

use crate::imaging::{self, Codec};
use crate::naming;
use crate::process::ImageError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("No images found under {0}")]
    EmptyCatalog(PathBuf),
    #[error("Input directory does not exist: {0}")]
    MissingRoot(PathBuf),
}

/// Where a record came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Origin {
    /// Found by the scan.
    Source,
    /// Smart-cropped from the record at `of`.
    Thumbnail { of: String },
    /// Width/format variant of the record at `of`.
    Responsive { of: String },
}

/// One image, keyed in the catalog by its `web_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// `photo.jpg`
    pub filename: String,
    /// `photo`
    pub stem: String,
    /// `.jpg`, with the dot and the original case
    pub extension: String,
    pub disk_path: PathBuf,
    pub disk_dir: PathBuf,
    /// `/static/img/photo.jpg`
    pub web_path: String,
    /// `/static/img/`, always with a trailing slash
    pub web_dir: String,
    pub codec: Codec,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub content_hash: String,
    /// Palette/indexed source; derivatives are encoded losslessly.
    pub lossless: bool,
    pub origin: Origin,
}

impl ImageRecord {
    pub fn is_source(&self) -> bool {
        matches!(self.origin, Origin::Source)
    }

    pub fn is_thumbnail(&self) -> bool {
        matches!(self.origin, Origin::Thumbnail { .. })
    }

    /// Describe `bytes` written next to this image as `filename`.
    ///
    /// Only the header of `bytes` is decoded. Derivatives of a lossless
    /// source stay lossless whatever their codec.
    pub fn derive(
        &self,
        filename: &str,
        codec: Codec,
        bytes: &[u8],
        origin: Origin,
    ) -> Result<ImageRecord, ImageError> {
        let (width, height) = imaging::read_dimensions(bytes, codec)?;
        let (stem, extension) = split_file_name(Path::new(filename));
        Ok(ImageRecord {
            filename: filename.to_string(),
            stem,
            extension,
            disk_path: self.disk_dir.join(filename),
            disk_dir: self.disk_dir.clone(),
            web_path: format!("{}{}", self.web_dir, filename),
            web_dir: self.web_dir.clone(),
            codec,
            mime_type: codec.mime_type().to_string(),
            width,
            height,
            file_size: bytes.len() as u64,
            content_hash: hash_bytes(bytes),
            lossless: self.lossless || codec.is_palette(),
            origin,
        })
    }
}

/// One `srcset` attribute value and the mime type it is served as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SrcSet {
    /// `"/img/photo.jpg 1200w, /img/photo.320.jpg 320w"`
    pub srcset: String,
    pub format: String,
}

/// Everything a template needs to emit a `<picture>` element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsiveSet {
    /// Keyed by `"original"` for the source format, otherwise the codec name.
    pub srcsets: BTreeMap<String, SrcSet>,
    /// `"(max-width: 1200px)"`
    pub media: String,
    pub sizes: String,
    /// Content hash of the source the set was built from.
    pub hash: String,
    /// `{width → {"original" | codec → web path}}`
    pub allsizes: BTreeMap<u32, BTreeMap<String, String>>,
    /// Largest variant in the source's own format.
    pub last: String,
}

/// Blurred placeholder: its file and an inline data URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenImage {
    pub url: String,
    pub base64: String,
}

/// The full catalog consumed by rendering collaborators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub images: BTreeMap<String, ImageRecord>,
    /// `{source web path → {"WxH" → thumbnail web path}}`
    pub thumbnails: BTreeMap<String, BTreeMap<String, String>>,
    pub responsive: BTreeMap<String, ResponsiveSet>,
    pub frozen: BTreeMap<String, FrozenImage>,
}

impl Catalog {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, web_path: &str) -> Option<&ImageRecord> {
        self.images.get(web_path)
    }

    /// Records matching `filter`, cloned so they can be sent to workers.
    pub fn select(&self, filter: impl Fn(&ImageRecord) -> bool) -> Vec<ImageRecord> {
        self.images.values().filter(|r| filter(r)).cloned().collect()
    }
}

/// A file the scan matched but could not catalog.
#[derive(Debug)]
pub struct ScanFinding {
    pub path: PathBuf,
    pub error: ImageError,
}

/// Output of [`scan`]: the catalog plus per-file findings.
#[derive(Debug)]
pub struct ScanReport {
    pub catalog: Catalog,
    pub findings: Vec<ScanFinding>,
    /// Previous outputs left out of the catalog.
    pub skipped: Vec<PathBuf>,
}

/// Catalog every image under `root` whose extension is in `extensions`.
///
/// Web paths are computed relative to `site_root`. A file named like a
/// derivative (see [`naming`]) is skipped only when the image it would have
/// been derived from is in the same directory. A file that cannot be walked
/// or read, whose extension has no codec, or whose header cannot be decoded
/// becomes a [`ScanFinding`] rather than an error. Fails with
/// [`CatalogError::EmptyCatalog`] when nothing could be cataloged.
pub fn scan(root: &Path, site_root: &Path, extensions: &[String]) -> Result<ScanReport, CatalogError> {
    if !root.is_dir() {
        return Err(CatalogError::MissingRoot(root.to_path_buf()));
    }

    let wanted: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
        .collect();

    let mut findings = Vec::new();
    let mut candidates = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                findings.push(ScanFinding {
                    path: path.clone(),
                    error: ImageError::Io {
                        path,
                        source: io::Error::from(err),
                    },
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry.path().extension().and_then(|e| e.to_str());
        if ext.is_some_and(|ext| wanted.contains(&ext.to_ascii_lowercase())) {
            candidates.push(entry.into_path());
        }
    }

    // (directory, stem) of every candidate, derived-looking or not
    let stems: HashSet<(&Path, &str)> = candidates
        .iter()
        .filter_map(|path| Some((path.parent()?, path.file_stem()?.to_str()?)))
        .collect();

    let mut catalog = Catalog::default();
    let mut skipped = Vec::new();
    for path in &candidates {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let dir = path.parent().unwrap_or(root);
        if let Some(derived) = naming::parse_derived_stem(stem)
            && stems.contains(&(dir, derived.base()))
        {
            skipped.push(path.clone());
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let Some(codec) = Codec::from_extension(ext) else {
            findings.push(ScanFinding {
                path: path.clone(),
                error: ImageError::UnsupportedFormat(ext.to_string()),
            });
            continue;
        };

        let record = fs::read(path)
            .map_err(|source| ImageError::Io {
                path: path.clone(),
                source,
            })
            .and_then(|bytes| record_from_bytes(path, site_root, codec, &bytes, Origin::Source));
        match record {
            Ok(record) => {
                catalog.images.insert(record.web_path.clone(), record);
            }
            Err(error) => findings.push(ScanFinding {
                path: path.clone(),
                error,
            }),
        }
    }

    if catalog.is_empty() {
        return Err(CatalogError::EmptyCatalog(root.to_path_buf()));
    }

    Ok(ScanReport {
        catalog,
        findings,
        skipped,
    })
}

/// Build a record for `bytes` that are (or are about to be) stored at `disk_path`.
///
/// Only the header is decoded. Used by the scan and by generators describing
/// the files they write.
pub fn record_from_bytes(
    disk_path: &Path,
    site_root: &Path,
    codec: Codec,
    bytes: &[u8],
    origin: Origin,
) -> Result<ImageRecord, ImageError> {
    let (width, height) = imaging::read_dimensions(bytes, codec)?;

    let filename = file_name_string(disk_path);
    let (stem, extension) = split_file_name(disk_path);
    let disk_dir = disk_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let web_path = web_path_for(disk_path, site_root);
    let web_dir = match web_path.rfind('/') {
        Some(pos) => web_path[..=pos].to_string(),
        None => "/".to_string(),
    };

    Ok(ImageRecord {
        filename,
        stem,
        extension,
        disk_path: disk_path.to_path_buf(),
        disk_dir,
        web_path,
        web_dir,
        codec,
        mime_type: codec.mime_type().to_string(),
        width,
        height,
        file_size: bytes.len() as u64,
        content_hash: hash_bytes(bytes),
        lossless: codec.is_palette(),
        origin,
    })
}

/// SHA-256 of `bytes` as a lowercase hex string.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `/`-separated path of `disk_path` below `site_root`, with a leading `/`.
///
/// Paths outside the site root fall back to their bare file name.
pub fn web_path_for(disk_path: &Path, site_root: &Path) -> String {
    match disk_path.strip_prefix(site_root) {
        Ok(rel) => {
            let parts: Vec<String> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            format!("/{}", parts.join("/"))
        }
        Err(_) => format!("/{}", file_name_string(disk_path)),
    }
}

/// `("photo", ".jpg")` for `.../photo.jpg`.
fn split_file_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, extension)
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
