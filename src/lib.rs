//! # Picture Press
//!
//! A build-time engine that turns a directory of source images into the
//! derivatives a static site needs: downsized originals, smart-cropped
//! thumbnails, responsive width/format sets and tiny blurred placeholders.
//! Everything it generates is cached by content, so a rebuild only pays for
//! images that actually changed.
//!
//! # Architecture: Scan, then Generators
//!
//! ```text
//! 1. Scan        site/           →  Catalog       (one record per image)
//! 2. Resize      sources         →  sources       (overwritten in place)
//! 3. Thumbnails  sources         →  {stem}-thumb-{W}x{H}{ext}
//! 4. Responsive  sources+thumbs  →  {stem}.{width}{ext}
//! 5. Frozen      sources+thumbs  →  {stem}.frozen{ext} + data URI
//!                                →  image-catalog.json
//! ```
//!
//! Each generator is a pure function from one catalog record (plus a cache
//! handle) to an [`ImageResult`](process::ImageResult). The
//! [`scheduler`] fans records out to a worker pool in shuffled batches; the
//! [`pipeline`] collects results and [`merge`]s them into the catalog before
//! the next generator runs. Workers never see the catalog, so there is no
//! shared mutable state beyond the on-disk cache.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`catalog`] | Scans the input directory into [`Catalog`](catalog::Catalog) records; SHA-256 content hashes |
//! | [`cache`] | Content-addressed, per-generator derivative cache with LRU pruning |
//! | [`process`] | The four generators and the per-image result contract |
//! | [`scheduler`] | Shuffle, batch and run a generator on a rayon pool |
//! | [`merge`] | Folds generator results back into the catalog |
//! | [`pipeline`] | [`RunContext`](pipeline::RunContext), stage order, reports, catalog JSON |
//! | [`imaging`] | Pure-Rust pixel math, codecs, resize, crop and blur |
//! | [`naming`] | Derivative file names and recognizing them during a scan |
//! | [`config`] | `picture-press.toml` loading, validation and defaults |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Hash the Bytes, Not the Pixels
//!
//! Cache keys start from the SHA-256 of the raw file. Editing a file in any
//! way gives it a new key, so the cache never needs explicit invalidation.
//! Stale entries are simply never looked up again and age out through
//! [`CacheStore::prune`](cache::CacheStore::prune).
//!
//! ## Failures Stay Local
//!
//! A corrupt image fails its own variants, nothing else. A panicking worker
//! loses its batch, nothing else. Both surface in the run report and flip the
//! build status to `ERROR`, but every other image is still produced.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, resampling, blurring and encoding all go through the `image`
//! crate. There are no system libraries to install and the binary is
//! self-contained.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod imaging;
pub mod merge;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_helpers;
