//! Folding generator results back into the catalog.
//!
//! Only the orchestrator mutates the catalog, and only here. Every result
//! touches keys nobody else touches: the source's own record (in-place
//! updates), its derived records (keyed by their own web path) and the
//! artifact maps (keyed by the source's web path). Applying a set of results
//! in any order therefore yields the same catalog.

use crate::catalog::Catalog;
use crate::process::{Artifact, ImageResult};

/// What one merge changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// Records rewritten in place.
    pub updated: usize,
    /// New derived records.
    pub inserted: usize,
    /// Thumbnail maps, responsive sets and placeholders attached.
    pub artifacts: usize,
    /// Results that carried at least one error.
    pub failed_images: usize,
}

/// Apply `results` to `catalog`.
///
/// Updates for web paths no longer in the catalog are dropped.
pub fn merge(catalog: &mut Catalog, results: Vec<ImageResult>) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for result in results {
        if !result.is_ok() {
            summary.failed_images += 1;
        }

        if let Some(update) = result.update
            && let Some(record) = catalog.images.get_mut(&result.web_path)
        {
            record.width = update.width;
            record.height = update.height;
            record.file_size = update.file_size;
            record.content_hash = update.content_hash;
            summary.updated += 1;
        }

        for derived in result.derived {
            catalog.images.insert(derived.web_path.clone(), derived);
            summary.inserted += 1;
        }

        if let Some(artifact) = result.artifact {
            let key = result.web_path;
            match artifact {
                Artifact::Thumbnails(map) => {
                    catalog.thumbnails.insert(key, map);
                }
                Artifact::Responsive(set) => {
                    catalog.responsive.insert(key, set);
                }
                Artifact::Frozen(frozen) => {
                    catalog.frozen.insert(key, frozen);
                }
            }
            summary.artifacts += 1;
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FrozenImage, ImageRecord, Origin};
    use crate::process::{ImageError, RecordUpdate};
    use crate::test_helpers::catalog_record;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn catalog_of(records: &[ImageRecord]) -> Catalog {
        Catalog {
            images: records
                .iter()
                .map(|r| (r.web_path.clone(), r.clone()))
                .collect(),
            ..Catalog::default()
        }
    }

    fn thumb_result(source: &ImageRecord, thumb: &ImageRecord) -> ImageResult {
        let mut result = ImageResult::new(&source.web_path);
        result.derived.push(thumb.clone());
        result.artifact = Some(Artifact::Thumbnails(BTreeMap::from([(
            "10x10".to_string(),
            thumb.web_path.clone(),
        )])));
        result
    }

    /// Fresh copies of three results touching different records.
    fn sample_results(a: &ImageRecord, b: &ImageRecord, thumb: &ImageRecord) -> Vec<ImageResult> {
        let mut resized = ImageResult::new(&a.web_path);
        resized.update = Some(RecordUpdate {
            width: 10,
            height: 5,
            file_size: 99,
            content_hash: "feed".into(),
        });

        let mut frozen = ImageResult::new(&b.web_path);
        frozen.artifact = Some(Artifact::Frozen(FrozenImage {
            url: "/b.frozen.jpg".into(),
            base64: "data:image/jpeg;base64,AA==".into(),
        }));

        vec![resized, frozen, thumb_result(b, thumb)]
    }

    #[test]
    fn update_overwrites_physical_fields_only() {
        let tmp = TempDir::new().unwrap();
        let a = catalog_record(tmp.path(), "a.jpg", 20, 10);
        let mut catalog = catalog_of(std::slice::from_ref(&a));

        let mut result = ImageResult::new(&a.web_path);
        result.update = Some(RecordUpdate {
            width: 10,
            height: 5,
            file_size: 42,
            content_hash: "cafe".into(),
        });
        let summary = merge(&mut catalog, vec![result]);

        let merged = &catalog.images["/a.jpg"];
        assert_eq!((merged.width, merged.height), (10, 5));
        assert_eq!(merged.file_size, 42);
        assert_eq!(merged.content_hash, "cafe");
        assert_eq!(merged.filename, a.filename);
        assert_eq!(summary.updated, 1);
    }

    #[test]
    fn derived_records_are_inserted_by_web_path() {
        let tmp = TempDir::new().unwrap();
        let b = catalog_record(tmp.path(), "b.jpg", 20, 20);
        let thumb = catalog_record(tmp.path(), "b-thumb-10x10.jpg", 10, 10);
        let thumb = ImageRecord {
            origin: Origin::Thumbnail {
                of: b.web_path.clone(),
            },
            ..thumb
        };
        let mut catalog = catalog_of(std::slice::from_ref(&b));

        let summary = merge(&mut catalog, vec![thumb_result(&b, &thumb)]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.images["/b-thumb-10x10.jpg"].is_thumbnail());
        assert_eq!(catalog.thumbnails["/b.jpg"]["10x10"], "/b-thumb-10x10.jpg");
        assert_eq!((summary.inserted, summary.artifacts), (1, 1));
    }

    #[test]
    fn merge_order_is_irrelevant() {
        let tmp = TempDir::new().unwrap();
        let a = catalog_record(tmp.path(), "a.jpg", 20, 10);
        let b = catalog_record(tmp.path(), "b.jpg", 20, 20);
        let thumb = catalog_record(tmp.path(), "b-thumb-10x10.jpg", 10, 10);
        let base = catalog_of(&[a.clone(), b.clone()]);

        let orders: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let mut merged = Vec::new();
        for order in orders {
            let mut results: Vec<Option<ImageResult>> =
                sample_results(&a, &b, &thumb).into_iter().map(Some).collect();
            let permuted: Vec<ImageResult> =
                order.iter().filter_map(|&i| results[i].take()).collect();
            let mut catalog = base.clone();
            merge(&mut catalog, permuted);
            merged.push(catalog);
        }
        assert!(merged.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn failed_results_are_counted_and_partial_output_kept() {
        let tmp = TempDir::new().unwrap();
        let b = catalog_record(tmp.path(), "b.jpg", 20, 20);
        let thumb = catalog_record(tmp.path(), "b-thumb-10x10.jpg", 10, 10);
        let mut catalog = catalog_of(std::slice::from_ref(&b));

        let mut result = thumb_result(&b, &thumb);
        result
            .errors
            .push(ImageError::UnsupportedFormat("tiff".into()));
        let summary = merge(&mut catalog, vec![result]);
        assert_eq!(summary.failed_images, 1);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn update_for_unknown_path_is_dropped() {
        let mut catalog = Catalog::default();
        let mut result = ImageResult::new("/missing.jpg");
        result.update = Some(RecordUpdate {
            width: 1,
            height: 1,
            file_size: 1,
            content_hash: "00".into(),
        });
        let summary = merge(&mut catalog, vec![result]);
        assert!(catalog.is_empty());
        assert_eq!(summary.updated, 0);
    }
}
