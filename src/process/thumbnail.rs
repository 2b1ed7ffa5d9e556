//! Smart-cropped thumbnails.
//!
//! Every configured `[width, height]` produces `{stem}-thumb-{W}x{H}{ext}`
//! next to the source, in the source's own codec. The crop is cover-scaled
//! and placed around the configured barycenter (see
//! [`calculations`](crate::imaging::calculations)). Thumbnails are added to
//! the catalog as records of their own so the responsive and frozen stages
//! process them too.

use super::{
    Artifact, EntrySession, Generator, ImageError, ImageResult, Operation, SourceImage,
    VariantInfo, VariantKey, encode_options, write_output,
};
use crate::cache::CacheHandle;
use crate::catalog::{ImageRecord, Origin};
use crate::config::{EncodingConfig, ThumbnailsConfig};
use crate::imaging;
use crate::naming::thumbnail_filename;
use std::collections::BTreeMap;

pub struct ThumbnailGenerator {
    sizes: Vec<(u32, u32)>,
    barycenter: f64,
    encoding: EncodingConfig,
}

impl ThumbnailGenerator {
    pub fn new(config: &ThumbnailsConfig, encoding: &EncodingConfig) -> Self {
        Self {
            sizes: config.sizes.iter().map(|[w, h]| (*w, *h)).collect(),
            barycenter: config.barycenter,
            encoding: encoding.clone(),
        }
    }

    fn thumbnail(
        &self,
        record: &ImageRecord,
        (width, height): (u32, u32),
        source: &mut SourceImage<'_>,
        session: &mut EntrySession,
        cache: &mut CacheHandle,
        result: &mut ImageResult,
    ) -> Result<(String, String), ImageError> {
        let key = VariantKey {
            operation: Operation::Thumbnail,
            width,
            height,
            format: record.codec,
        };
        let tag = key.secondary_key();
        let options = encode_options(&self.encoding, record.codec, record.lossless);

        let (bytes, status) = session.get_or_generate(&key, cache.stats_mut(), || {
            let image = source.decoded()?;
            let cropped = imaging::smart_crop(image, width, height, self.barycenter);
            Ok(imaging::encode(&cropped, options)?)
        })?;

        let filename = thumbnail_filename(&record.stem, width, height, &record.extension);
        let derived = record.derive(
            &filename,
            record.codec,
            &bytes,
            Origin::Thumbnail {
                of: record.web_path.clone(),
            },
        )?;
        write_output(&derived.disk_path, &bytes)?;

        result.variants.push(VariantInfo {
            label: format!("thumb {tag}"),
            status,
        });
        let web_path = derived.web_path.clone();
        result.derived.push(derived);
        Ok((tag, web_path))
    }
}

impl Generator for ThumbnailGenerator {
    fn name(&self) -> &'static str {
        "thumbnails"
    }

    fn wants(&self, record: &ImageRecord) -> bool {
        record.is_source()
    }

    fn outputs(&self, record: &ImageRecord) -> Vec<String> {
        self.sizes
            .iter()
            .map(|&(width, height)| {
                let filename = thumbnail_filename(&record.stem, width, height, &record.extension);
                format!("{}{filename}", record.web_dir)
            })
            .collect()
    }

    fn process(&self, record: &ImageRecord, cache: &mut CacheHandle) -> ImageResult {
        let mut result = ImageResult::new(&record.web_path);
        let mut session = EntrySession::open(cache, record, true);
        let mut source = SourceImage::new(record, session.raw());
        let mut thumbs = BTreeMap::new();

        for &size in &self.sizes {
            match self.thumbnail(record, size, &mut source, &mut session, cache, &mut result) {
                Ok((tag, web_path)) => {
                    thumbs.insert(tag, web_path);
                }
                Err(e) => result.errors.push(e),
            }
        }

        session.keep_raw(source.loaded_raw());
        session.finish(cache, record);
        if !thumbs.is_empty() {
            result.artifact = Some(Artifact::Thumbnails(thumbs));
        }
        result
    }
}
