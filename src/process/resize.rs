//! In-place downsizing of oversized sources.
//!
//! A source wider than `max_width` is re-encoded at exactly `max_width` and
//! written over the original file. The catalog record then reflects the new
//! file (width, height, size and hash), so every later stage works from the
//! downsized image. On the next build the file is already narrow enough and
//! the generator skips it.

use super::{
    EntrySession, Generator, ImageError, ImageResult, Operation, RecordUpdate, SourceImage,
    VariantInfo, VariantKey, VariantStatus, encode_options, write_output,
};
use crate::cache::CacheHandle;
use crate::catalog::{ImageRecord, hash_bytes};
use crate::config::{EncodingConfig, ResizeConfig};
use crate::imaging::{self, calculations::scaled_height};

pub struct ResizeGenerator {
    max_width: u32,
    encoding: EncodingConfig,
}

impl ResizeGenerator {
    pub fn new(config: &ResizeConfig, encoding: &EncodingConfig) -> Self {
        Self {
            max_width: config.max_width,
            encoding: encoding.clone(),
        }
    }

    fn resize(
        &self,
        record: &ImageRecord,
        session: &mut EntrySession,
        cache: &mut CacheHandle,
        result: &mut ImageResult,
    ) -> Result<(), ImageError> {
        let key = VariantKey {
            operation: Operation::Resize,
            width: self.max_width,
            height: scaled_height(record.width, record.height, self.max_width),
            format: record.codec,
        };
        let mut source = SourceImage::new(record, session.raw());
        let options = encode_options(&self.encoding, record.codec, record.lossless);

        let (bytes, status) = session.get_or_generate(&key, cache.stats_mut(), || {
            let image = source.decoded()?;
            // The header width decided the skip; trust the pixels here
            let resized = imaging::resize_to_width(image, self.max_width)
                .unwrap_or_else(|| image.clone());
            Ok(imaging::encode(&resized, options)?)
        })?;
        session.keep_raw(source.loaded_raw());

        write_output(&record.disk_path, &bytes)?;
        let (width, height) = imaging::read_dimensions(&bytes, record.codec)?;
        result.update = Some(RecordUpdate {
            width,
            height,
            file_size: bytes.len() as u64,
            content_hash: hash_bytes(&bytes),
        });
        result.variants.push(VariantInfo {
            label: format!("{}px", self.max_width),
            status,
        });
        Ok(())
    }
}

impl Generator for ResizeGenerator {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn wants(&self, record: &ImageRecord) -> bool {
        record.is_source()
    }

    fn process(&self, record: &ImageRecord, cache: &mut CacheHandle) -> ImageResult {
        let mut result = ImageResult::new(&record.web_path);

        if record.width <= self.max_width {
            cache.stats_mut().record(VariantStatus::Skip);
            result.variants.push(VariantInfo {
                label: format!("{}px", self.max_width),
                status: VariantStatus::Skip,
            });
            return result;
        }

        let mut session = EntrySession::open(cache, record, true);
        if let Err(e) = self.resize(record, &mut session, cache, &mut result) {
            result.errors.push(e);
        }
        session.finish(cache, record);
        result
    }
}
