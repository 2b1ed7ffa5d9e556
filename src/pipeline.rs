//! Build orchestration: scan once, then run each enabled generator in order.
//!
//! ```text
//! scan ─▶ catalog ─▶ resize ─▶ thumbnails ─▶ responsive ─▶ frozen ─▶ catalog JSON
//!                      │            │             │            │
//!                      └── select → schedule → merge → prune ──┘  (per generator)
//! ```
//!
//! The order matters. Resize rewrites sources in place, so everything after
//! it sees the downsized image and its new hash. Thumbnails are merged as
//! records before the responsive and frozen generators run, so those process
//! thumbnails as well.
//!
//! All run state lives in an explicit [`RunContext`]; nothing here reads
//! globals or the environment. A per-image failure only marks its generator's
//! [`RunReport`] as `ERROR`; the build itself fails only on configuration,
//! an empty catalog, or an unusable worker pool.

use crate::cache::{CacheStats, CacheStore};
use crate::catalog::{self, Catalog, CatalogError, ImageRecord};
use crate::config::{ConfigError, EngineConfig, effective_threads};
use crate::merge::merge;
use crate::process::{
    EventSink, FrozenGenerator, Generator, ImageError, ImageResult, ProcessEvent,
    ResizeGenerator, ResponsiveGenerator, RunStatus, ThumbnailGenerator,
};
use crate::scheduler::BatchScheduler;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the catalog written at the site root.
pub const CATALOG_FILE: &str = "image-catalog.json";

/// Default cache directory name, created under the site root.
pub const DEFAULT_CACHE_DIR: &str = ".picture-press-cache";

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Everything one build needs.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: EngineConfig,
    /// Web paths are computed relative to this directory.
    pub site_root: PathBuf,
    /// Directory scanned for source images, usually inside `site_root`.
    pub input_dir: PathBuf,
    pub cache_root: PathBuf,
    /// `false` disables every cache read and write.
    pub use_cache: bool,
    pub events: EventSink,
    /// Fixes the batch shuffle for reproducible runs.
    pub seed: Option<u64>,
}

impl RunContext {
    /// Scan the whole site and cache under `<site>/.picture-press-cache`.
    pub fn new(config: EngineConfig, site_root: &Path) -> Self {
        Self {
            config,
            site_root: site_root.to_path_buf(),
            input_dir: site_root.to_path_buf(),
            cache_root: site_root.join(DEFAULT_CACHE_DIR),
            use_cache: true,
            events: EventSink::none(),
            seed: None,
        }
    }

    fn store(&self, namespace: &str) -> CacheStore {
        if self.use_cache {
            CacheStore::at(&self.cache_root, namespace)
        } else {
            CacheStore::disabled()
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub generator: String,
    pub status: RunStatus,
    pub stats: CacheStats,
    /// Images handed to the stage.
    pub images: usize,
    /// `"{web path}: {error}"`, one line per failure.
    pub errors: Vec<String>,
    /// Previous outputs the scan left out; zero for generators.
    pub skipped: usize,
}

impl RunReport {
    fn new(generator: &str, images: usize, stats: CacheStats, errors: Vec<String>) -> Self {
        let status = if errors.is_empty() {
            RunStatus::Ok
        } else {
            RunStatus::Error
        };
        Self {
            generator: generator.to_string(),
            status,
            stats,
            images,
            errors,
            skipped: 0,
        }
    }
}

/// Final catalog plus one report per stage (the scan first).
#[derive(Debug)]
pub struct BuildOutcome {
    pub catalog: Catalog,
    pub reports: Vec<RunReport>,
}

impl BuildOutcome {
    /// `ERROR` if any stage reported an error.
    pub fn status(&self) -> RunStatus {
        if self.reports.iter().any(|r| r.status == RunStatus::Error) {
            RunStatus::Error
        } else {
            RunStatus::Ok
        }
    }
}

/// The enabled generators, in run order.
pub fn generators(config: &EngineConfig) -> Vec<Box<dyn Generator>> {
    let mut generators: Vec<Box<dyn Generator>> = Vec::new();
    if config.resize.enabled {
        generators.push(Box::new(ResizeGenerator::new(
            &config.resize,
            &config.encoding,
        )));
    }
    if config.thumbnails.enabled {
        generators.push(Box::new(ThumbnailGenerator::new(
            &config.thumbnails,
            &config.encoding,
        )));
    }
    if config.responsive.enabled {
        generators.push(Box::new(ResponsiveGenerator::new(
            &config.responsive,
            &config.encoding,
        )));
    }
    if config.frozen.enabled {
        generators.push(Box::new(FrozenGenerator::new(
            &config.frozen,
            &config.encoding,
        )));
    }
    generators
}

/// Scan `ctx.input_dir` into a catalog. Unreadable files become report
/// errors and previous outputs are counted as skipped; an empty result is
/// fatal.
pub fn scan(ctx: &RunContext) -> Result<(Catalog, RunReport), BuildError> {
    let report = catalog::scan(&ctx.input_dir, &ctx.site_root, &ctx.config.scan.extensions)?;
    let errors: Vec<String> = report
        .findings
        .iter()
        .map(|f| format!("{}: {}", f.path.display(), f.error))
        .collect();
    let scanned = report.catalog.len() + report.findings.len();
    info!(
        images = report.catalog.len(),
        findings = report.findings.len(),
        skipped = report.skipped.len(),
        "catalog scanned"
    );
    for path in &report.skipped {
        debug!(path = %path.display(), "previous output skipped");
    }
    let run_report = RunReport {
        skipped: report.skipped.len(),
        ..RunReport::new("scan", scanned, CacheStats::default(), errors)
    };
    Ok((report.catalog, run_report))
}

/// Run the full build described by `ctx`.
pub fn build(ctx: &RunContext) -> Result<BuildOutcome, BuildError> {
    ctx.config.validate()?;
    let (mut catalog, scan_report) = scan(ctx)?;
    let mut reports = vec![scan_report];

    let processing = &ctx.config.processing;
    let scheduler = BatchScheduler::new(effective_threads(processing), processing.batch_size, ctx.seed)?;

    for generator in generators(&ctx.config) {
        let report = run_generator(ctx, &scheduler, generator.as_ref(), &mut catalog);
        ctx.events.emit(ProcessEvent::GeneratorFinished {
            generator: report.generator.clone(),
            status: report.status,
            stats: report.stats.clone(),
        });
        reports.push(report);
    }

    Ok(BuildOutcome { catalog, reports })
}

fn run_generator(
    ctx: &RunContext,
    scheduler: &BatchScheduler,
    generator: &dyn Generator,
    catalog: &mut Catalog,
) -> RunReport {
    let name = generator.name();
    let selected = catalog.select(|r| generator.wants(r));
    let images = selected.len();
    let (records, rejected) = claim_outputs(generator, catalog, selected);
    let store = ctx.store(name);
    let started = Instant::now();

    let output = scheduler.run(generator, &store, records, &ctx.events);
    let mut results = output.results;
    results.extend(rejected);

    let mut errors: Vec<String> = Vec::new();
    for result in &results {
        errors.extend(
            result
                .errors
                .iter()
                .map(|e| format!("{}: {}", result.web_path, e)),
        );
    }
    errors.extend(output.failures.iter().map(|f| {
        format!(
            "batch {} ({} images) aborted: {}",
            f.index, f.image_count, f.message
        )
    }));

    let summary = merge(catalog, results);
    debug!(
        generator = name,
        updated = summary.updated,
        inserted = summary.inserted,
        artifacts = summary.artifacts,
        "merged"
    );

    let mut stats = output.stats;
    match store.prune(ctx.config.cache.max_bytes()) {
        Ok(pruned) if pruned.evicted > 0 => {
            info!(generator = name, evicted = pruned.evicted, freed = pruned.bytes_freed, "cache pruned");
        }
        Ok(_) => {}
        Err(e) => {
            warn!(generator = name, error = %e, "cache prune failed");
            stats.io_errors += 1;
        }
    }

    info!(
        generator = name,
        images,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "{stats}"
    );
    RunReport::new(name, images, stats, errors)
}

/// Split `records` into those whose planned outputs are free and failed
/// results for the rest.
///
/// Records are visited in web path order and the first one to plan an
/// output owns it, so `photo.jpg` keeps `photo.100.webp` and `photo.png`
/// fails whatever order the workers would have finished in. Outputs that
/// name an image already in the catalog are never free.
fn claim_outputs(
    generator: &dyn Generator,
    catalog: &Catalog,
    mut records: Vec<ImageRecord>,
) -> (Vec<ImageRecord>, Vec<ImageResult>) {
    records.sort_by(|a, b| a.web_path.cmp(&b.web_path));
    let mut claimed: BTreeMap<String, String> = catalog
        .images
        .keys()
        .map(|path| (path.clone(), path.clone()))
        .collect();
    let mut accepted = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();

    for record in records {
        let outputs = generator.outputs(&record);
        let conflict = outputs
            .iter()
            .find_map(|output| claimed.get(output).map(|owner| (output, owner)));
        if let Some((output, owner)) = conflict {
            warn!(
                generator = generator.name(),
                image = %record.web_path,
                output = %output,
                owner = %owner,
                "output conflict"
            );
            let mut result = ImageResult::new(&record.web_path);
            result.errors.push(ImageError::OutputConflict {
                output: output.clone(),
                owner: owner.clone(),
            });
            rejected.push(result);
            continue;
        }
        for output in outputs {
            claimed.insert(output, record.web_path.clone());
        }
        accepted.push(record);
    }
    (accepted, rejected)
}

/// Write `catalog` as pretty JSON to `path`.
pub fn write_catalog(catalog: &Catalog, path: &Path) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(catalog)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Origin;
    use crate::test_helpers::{write_jpeg, write_png};
    use tempfile::TempDir;

    fn context(site: &Path) -> RunContext {
        let mut config = EngineConfig::default();
        config.processing.max_processes = Some(2);
        config.thumbnails.sizes = vec![[40, 40]];
        config.responsive.widths = vec![60, 120];
        config.responsive.cache_min_image_width = 10;
        config.resize.max_width = 150;
        RunContext {
            seed: Some(1),
            ..RunContext::new(config, site)
        }
    }

    #[test]
    fn generators_follow_config_order_and_switches() {
        let mut config = EngineConfig::default();
        let names: Vec<&str> = generators(&config).iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["resize", "thumbnails", "responsive", "frozen"]);

        config.thumbnails.enabled = false;
        config.frozen.enabled = false;
        let names: Vec<&str> = generators(&config).iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["resize", "responsive"]);
    }

    #[test]
    fn empty_site_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let result = build(&context(tmp.path()));
        assert!(matches!(
            result,
            Err(BuildError::Catalog(CatalogError::EmptyCatalog(_)))
        ));
    }

    #[test]
    fn invalid_config_is_fatal() {
        let tmp = TempDir::new().unwrap();
        write_jpeg(&tmp.path().join("a.jpg"), 10, 10);
        let mut ctx = context(tmp.path());
        ctx.config.processing.batch_size = 0;
        assert!(matches!(build(&ctx), Err(BuildError::Config(_))));
    }

    #[test]
    fn build_runs_every_stage() {
        let tmp = TempDir::new().unwrap();
        write_jpeg(&tmp.path().join("img/wide.jpg"), 300, 200);
        write_png(&tmp.path().join("img/logo.png"), 80, 80);

        let outcome = build(&context(tmp.path())).unwrap();
        assert_eq!(outcome.status(), RunStatus::Ok, "{:?}", outcome.reports);
        let stages: Vec<&str> = outcome.reports.iter().map(|r| r.generator.as_str()).collect();
        assert_eq!(stages, vec!["scan", "resize", "thumbnails", "responsive", "frozen"]);

        let catalog = &outcome.catalog;
        // Resized in place before anything else saw it
        assert_eq!(catalog.images["/img/wide.jpg"].width, 150);
        assert_eq!(catalog.images["/img/wide.jpg"].height, 100);
        assert!(catalog.images.contains_key("/img/wide-thumb-40x40.jpg"));
        assert!(catalog.images.contains_key("/img/wide.120.webp"));
        // Thumbnails get their own responsive set and placeholder
        assert!(catalog.responsive.contains_key("/img/wide-thumb-40x40.jpg"));
        assert!(catalog.frozen.contains_key("/img/wide-thumb-40x40.jpg"));
        assert_eq!(catalog.thumbnails["/img/logo.png"]["40x40"], "/img/logo-thumb-40x40.png");
    }

    #[test]
    fn unreadable_file_marks_scan_as_error() {
        let tmp = TempDir::new().unwrap();
        write_jpeg(&tmp.path().join("good.jpg"), 20, 20);
        fs::write(tmp.path().join("broken.jpg"), b"not a jpeg").unwrap();

        let outcome = build(&context(tmp.path())).unwrap();
        assert_eq!(outcome.reports[0].status, RunStatus::Error);
        assert_eq!(outcome.reports[0].errors.len(), 1);
        assert_eq!(outcome.status(), RunStatus::Error);
        assert!(outcome.catalog.images.contains_key("/good.jpg"));
    }

    #[test]
    fn rebuild_skips_previous_outputs() {
        let tmp = TempDir::new().unwrap();
        write_jpeg(&tmp.path().join("vacation.2019.jpg"), 80, 60);

        let first = build(&context(tmp.path())).unwrap();
        assert_eq!(first.reports[0].skipped, 0);
        assert!(first.catalog.images.contains_key("/vacation.2019.jpg"));

        let second = build(&context(tmp.path())).unwrap();
        assert_eq!(second.status(), RunStatus::Ok, "{:?}", second.reports);
        // Thumb, 60px jpeg, and a placeholder each for the source and the thumb
        assert_eq!(second.reports[0].skipped, 4);
        assert_eq!(second.reports[0].images, 1);
        assert_eq!(first.catalog, second.catalog);
    }

    #[test]
    fn events_end_with_generator_finished() {
        let tmp = TempDir::new().unwrap();
        write_jpeg(&tmp.path().join("a.jpg"), 20, 20);
        let (tx, rx) = std::sync::mpsc::channel();
        let ctx = RunContext {
            events: EventSink::new(tx),
            ..context(tmp.path())
        };

        build(&ctx).unwrap();
        drop(ctx);
        let finished: Vec<String> = rx
            .iter()
            .filter_map(|e| match e {
                ProcessEvent::GeneratorFinished { generator, .. } => Some(generator),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["resize", "thumbnails", "responsive", "frozen"]);
    }

    #[test]
    fn same_stem_sources_resolve_shared_outputs_by_path_order() {
        let tmp = TempDir::new().unwrap();
        write_jpeg(&tmp.path().join("photo.jpg"), 200, 100);
        write_png(&tmp.path().join("photo.png"), 200, 100);

        let mut catalogs = Vec::new();
        for seed in 0..12 {
            let mut ctx = context(tmp.path());
            ctx.config.resize.enabled = false;
            ctx.config.responsive.widths = vec![100];
            ctx.config.processing.batch_size = 1;
            ctx.seed = Some(seed);

            let outcome = build(&ctx).unwrap();
            assert_eq!(outcome.status(), RunStatus::Error);
            let responsive = outcome
                .reports
                .iter()
                .find(|r| r.generator == "responsive")
                .unwrap();
            assert_eq!(responsive.errors.len(), 1, "{:?}", responsive.errors);
            assert!(responsive.errors[0].starts_with("/photo.png: output /photo.100.webp"));
            catalogs.push(outcome.catalog);
        }

        let catalog = &catalogs[0];
        assert!(catalogs.iter().all(|c| c == catalog));
        assert_eq!(
            catalog.images["/photo.100.webp"].origin,
            Origin::Responsive {
                of: "/photo.jpg".into()
            }
        );
        assert!(catalog.responsive.contains_key("/photo.jpg"));
        assert!(!catalog.responsive.contains_key("/photo.png"));
        assert!(!catalog.images.contains_key("/photo.100.png"));
    }

    #[test]
    fn claim_outputs_rejects_cataloged_paths() {
        let tmp = TempDir::new().unwrap();
        write_jpeg(&tmp.path().join("a.jpg"), 20, 20);
        write_jpeg(&tmp.path().join("a.frozen.jpg"), 20, 20);
        let mut catalog = Catalog::default();
        for name in ["a.jpg", "a.frozen.jpg"] {
            let path = tmp.path().join(name);
            let bytes = fs::read(&path).unwrap();
            let record = crate::catalog::record_from_bytes(
                &path,
                tmp.path(),
                crate::imaging::Codec::Jpeg,
                &bytes,
                Origin::Source,
            )
            .unwrap();
            catalog.images.insert(record.web_path.clone(), record);
        }
        let frozen = FrozenGenerator::new(
            &crate::config::FrozenConfig::default(),
            &crate::config::EncodingConfig::default(),
        );

        let (accepted, rejected) =
            claim_outputs(&frozen, &catalog, vec![catalog.images["/a.jpg"].clone()]);
        assert!(accepted.is_empty());
        assert!(matches!(
            &rejected[0].errors[0],
            ImageError::OutputConflict { output, .. } if output == "/a.frozen.jpg"
        ));
    }

    #[test]
    fn catalog_json_is_written() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out").join(CATALOG_FILE);
        write_catalog(&Catalog::default(), &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value["images"].as_object().unwrap().is_empty());
    }
}
