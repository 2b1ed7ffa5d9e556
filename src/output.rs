//! CLI output formatting.
//!
//! Every function here is pure: it turns pipeline data into display lines
//! (`Vec<String>`) and leaves printing to `main`. That keeps the exact output
//! under test.
//!
//! # Output Format
//!
//! ## Scan
//!
//! ```text
//! Images
//! 001 /img/boat.png (png, 640x480, 12.4 KB)
//! 002 /img/photo.jpg (jpeg, 1200x800, 310.0 KB)
//!
//! Findings
//!     /site/img/broken.jpg: failed to decode jpeg: ...
//!
//! Cataloged 2 images, 4 previous outputs skipped
//! ```
//!
//! ## Build progress
//!
//! ```text
//! ==> thumbnails: 2 images, 1 batch, 4 workers
//!     /img/photo.jpg
//!         thumb 300x300: HIT
//!     /img/boat.png
//!         thumb 300x300: MISS
//! ==> thumbnails OK: 1 cached, 1 generated (2 total)
//! ```
//!
//! ## Summary
//!
//! ```text
//! scan        OK     2 images  4 previous outputs skipped
//! resize      OK     2 images  2 skipped (2 total)
//! thumbnails  ERROR  2 images  1 cached, 0 generated (1 total)
//!     /img/boat.png: failed to decode png: ...
//! Build ERROR
//! ```

use crate::catalog::Catalog;
use crate::pipeline::RunReport;
use crate::process::{ProcessEvent, RunStatus};

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// `1 image`, `3 images`.
fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{count} {one}")
    } else {
        format!("{count} {many}")
    }
}

/// Human readable byte count with one decimal.
fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

// ============================================================================
// Scan output
// ============================================================================

/// Format the scanned catalog: one line per image, then scan findings.
pub fn format_scan_output(catalog: &Catalog, report: &RunReport) -> Vec<String> {
    let mut lines = vec!["Images".to_string()];
    for (pos, record) in catalog.images.values().enumerate() {
        lines.push(format!(
            "{} {} ({}, {}x{}, {})",
            format_index(pos + 1),
            record.web_path,
            record.codec,
            record.width,
            record.height,
            format_size(record.file_size)
        ));
    }

    if !report.errors.is_empty() {
        lines.push(String::new());
        lines.push("Findings".to_string());
        for error in &report.errors {
            lines.push(format!("{}{}", indent(1), error));
        }
    }

    lines.push(String::new());
    let mut total = format!("Cataloged {}", plural(catalog.len(), "image", "images"));
    if report.skipped > 0 {
        total.push_str(&format!(", {}", skipped_outputs(report.skipped)));
    }
    lines.push(total);
    lines
}

fn skipped_outputs(count: usize) -> String {
    format!("{} skipped", plural(count, "previous output", "previous outputs"))
}

pub fn print_scan_output(catalog: &Catalog, report: &RunReport) {
    for line in format_scan_output(catalog, report) {
        println!("{}", line);
    }
}

// ============================================================================
// Build progress
// ============================================================================

/// Format a single build progress event as display lines.
pub fn format_process_event(event: &ProcessEvent) -> Vec<String> {
    match event {
        ProcessEvent::GeneratorStarted {
            generator,
            image_count,
            batch_count,
            workers,
        } => vec![format!(
            "==> {}: {}, {}, {}",
            generator,
            plural(*image_count, "image", "images"),
            plural(*batch_count, "batch", "batches"),
            plural(*workers, "worker", "workers")
        )],
        ProcessEvent::ImageProcessed {
            web_path,
            variants,
            errors,
            ..
        } => {
            let mut lines = vec![format!("{}{}", indent(1), web_path)];
            for variant in variants {
                lines.push(format!("{}{}: {}", indent(2), variant.label, variant.status));
            }
            for error in errors {
                lines.push(format!("{}error: {}", indent(2), error));
            }
            lines
        }
        ProcessEvent::BatchFailed {
            batch,
            image_count,
            message,
            ..
        } => vec![format!(
            "{}batch {} aborted ({} lost): {}",
            indent(1),
            batch,
            plural(*image_count, "image", "images"),
            message
        )],
        ProcessEvent::GeneratorFinished {
            generator,
            status,
            stats,
        } => vec![format!("==> {} {}: {}", generator, status, stats)],
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Format the per-stage summary printed at the end of a build.
///
/// The scan has no cache, so its stats column is left out.
pub fn format_run_report(reports: &[RunReport]) -> Vec<String> {
    let width = reports.iter().map(|r| r.generator.len()).max().unwrap_or(0);
    let mut lines = Vec::new();

    for report in reports {
        let mut line = format!(
            "{:<width$}  {:<5}  {}",
            report.generator,
            report.status.to_string(),
            plural(report.images, "image", "images"),
        );
        if report.skipped > 0 {
            line.push_str(&format!("  {}", skipped_outputs(report.skipped)));
        }
        if report.stats.total() > 0 || report.stats.io_errors > 0 {
            line.push_str(&format!("  {}", report.stats));
        }
        lines.push(line);
        for error in &report.errors {
            lines.push(format!("{}{}", indent(1), error));
        }
    }

    let overall = if reports.iter().any(|r| r.status == RunStatus::Error) {
        RunStatus::Error
    } else {
        RunStatus::Ok
    };
    lines.push(format!("Build {}", overall));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, VariantStatus};
    use crate::process::VariantInfo;
    use crate::test_helpers::catalog_record;
    use tempfile::TempDir;

    fn report(name: &str, images: usize, stats: CacheStats, errors: &[&str]) -> RunReport {
        RunReport {
            generator: name.to_string(),
            status: if errors.is_empty() {
                RunStatus::Ok
            } else {
                RunStatus::Error
            },
            stats,
            images,
            errors: errors.iter().map(|e| e.to_string()).collect(),
            skipped: 0,
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn plural_forms() {
        assert_eq!(plural(1, "image", "images"), "1 image");
        assert_eq!(plural(0, "batch", "batches"), "0 batches");
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    // =========================================================================
    // Scan output
    // =========================================================================

    #[test]
    fn scan_output_lists_images_and_findings() {
        let tmp = TempDir::new().unwrap();
        let record = catalog_record(tmp.path(), "photo.jpg", 12, 8);
        let mut catalog = Catalog::default();
        catalog.images.insert(record.web_path.clone(), record.clone());

        let lines = format_scan_output(
            &catalog,
            &report("scan", 2, CacheStats::default(), &["broken.jpg: bad header"]),
        );
        assert_eq!(
            lines[1],
            format!("001 /photo.jpg (jpeg, 12x8, {})", format_size(record.file_size))
        );
        assert_eq!(lines[3], "Findings");
        assert_eq!(lines[4], "    broken.jpg: bad header");
        assert_eq!(lines.last().unwrap(), "Cataloged 1 image");
    }

    #[test]
    fn scan_output_counts_skipped_outputs() {
        let tmp = TempDir::new().unwrap();
        let record = catalog_record(tmp.path(), "photo.jpg", 12, 8);
        let mut catalog = Catalog::default();
        catalog.images.insert(record.web_path.clone(), record);

        let scan = RunReport {
            skipped: 3,
            ..report("scan", 1, CacheStats::default(), &[])
        };
        let lines = format_scan_output(&catalog, &scan);
        assert_eq!(
            lines.last().unwrap(),
            "Cataloged 1 image, 3 previous outputs skipped"
        );
        assert_eq!(
            format_run_report(&[scan])[0],
            "scan  OK     1 image  3 previous outputs skipped"
        );
    }

    // =========================================================================
    // Progress events
    // =========================================================================

    #[test]
    fn generator_started_line() {
        let event = ProcessEvent::GeneratorStarted {
            generator: "thumbnails".to_string(),
            image_count: 41,
            batch_count: 3,
            workers: 1,
        };
        assert_eq!(
            format_process_event(&event),
            vec!["==> thumbnails: 41 images, 3 batches, 1 worker"]
        );
    }

    #[test]
    fn image_processed_lines() {
        let event = ProcessEvent::ImageProcessed {
            generator: "responsive".to_string(),
            web_path: "/img/photo.jpg".to_string(),
            variants: vec![
                VariantInfo {
                    label: "320px jpeg".to_string(),
                    status: VariantStatus::Hit,
                },
                VariantInfo {
                    label: "320px webp".to_string(),
                    status: VariantStatus::Miss,
                },
            ],
            errors: vec!["failed to encode webp: boom".to_string()],
        };
        let lines = format_process_event(&event);
        assert_eq!(lines[0], "    /img/photo.jpg");
        assert_eq!(lines[1], "        320px jpeg: HIT");
        assert_eq!(lines[2], "        320px webp: MISS");
        assert_eq!(lines[3], "        error: failed to encode webp: boom");
    }

    #[test]
    fn batch_failed_line() {
        let event = ProcessEvent::BatchFailed {
            generator: "frozen".to_string(),
            batch: 2,
            image_count: 20,
            message: "index out of bounds".to_string(),
        };
        assert_eq!(
            format_process_event(&event),
            vec!["    batch 2 aborted (20 images lost): index out of bounds"]
        );
    }

    #[test]
    fn generator_finished_line() {
        let event = ProcessEvent::GeneratorFinished {
            generator: "resize".to_string(),
            status: RunStatus::Ok,
            stats: CacheStats {
                hits: 3,
                misses: 2,
                ..CacheStats::default()
            },
        };
        assert_eq!(
            format_process_event(&event),
            vec!["==> resize OK: 3 cached, 2 generated (5 total)"]
        );
    }

    // =========================================================================
    // Summary
    // =========================================================================

    #[test]
    fn run_report_aligns_and_lists_errors() {
        let reports = vec![
            report("scan", 2, CacheStats::default(), &[]),
            report(
                "thumbnails",
                2,
                CacheStats {
                    hits: 1,
                    ..CacheStats::default()
                },
                &["/img/boat.png: failed"],
            ),
        ];
        let lines = format_run_report(&reports);
        assert_eq!(lines[0], "scan        OK     2 images");
        assert_eq!(
            lines[1],
            "thumbnails  ERROR  2 images  1 cached, 0 generated (1 total)"
        );
        assert_eq!(lines[2], "    /img/boat.png: failed");
        assert_eq!(lines[3], "Build ERROR");
    }

    #[test]
    fn run_report_all_ok() {
        let lines = format_run_report(&[report("scan", 1, CacheStats::default(), &[])]);
        assert_eq!(lines, vec!["scan  OK     1 image", "Build OK"]);
    }
}
