//! Blurred low-resolution placeholders.
//!
//! Each image gets a tiny (default 42 px wide) blurred copy in its own codec,
//! written as `{stem}.frozen{ext}` and also inlined as a base64 data URI so a
//! page can show it before the real image loads.

use super::{
    Artifact, EntrySession, Generator, ImageError, ImageResult, Operation, SourceImage,
    VariantInfo, VariantKey, encode_options, write_output,
};
use crate::cache::CacheHandle;
use crate::catalog::{FrozenImage, ImageRecord};
use crate::config::{EncodingConfig, FrozenConfig};
use crate::imaging::{self, BlurParams, calculations::scaled_height};
use crate::naming::frozen_filename;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

pub struct FrozenGenerator {
    blur: BlurParams,
    encoding: EncodingConfig,
}

impl FrozenGenerator {
    pub fn new(config: &FrozenConfig, encoding: &EncodingConfig) -> Self {
        Self {
            blur: BlurParams {
                width: config.width,
                radius: config.blur_radius,
            },
            encoding: encoding.clone(),
        }
    }

    fn freeze(
        &self,
        record: &ImageRecord,
        session: &mut EntrySession,
        cache: &mut CacheHandle,
        result: &mut ImageResult,
    ) -> Result<FrozenImage, ImageError> {
        let BlurParams { width, radius } = self.blur;
        let key = VariantKey {
            operation: Operation::Frozen,
            width,
            height: scaled_height(record.width, record.height, width),
            format: record.codec,
        };
        let mut source = SourceImage::new(record, session.raw());
        let options = encode_options(&self.encoding, record.codec, record.lossless);

        let (bytes, status) = session.get_or_generate(&key, cache.stats_mut(), || {
            let image = source.decoded()?;
            let placeholder = imaging::blur_placeholder(image, width, radius);
            Ok(imaging::encode(&placeholder, options)?)
        })?;

        let filename = frozen_filename(&record.stem, &record.extension);
        write_output(&record.disk_dir.join(&filename), &bytes)?;

        result.variants.push(VariantInfo {
            label: format!("frozen {width}px"),
            status,
        });
        Ok(FrozenImage {
            url: format!("{}{}", record.web_dir, filename),
            base64: data_uri(record.codec.mime_type(), &bytes),
        })
    }
}

/// `data:image/jpeg;base64,...`
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

impl Generator for FrozenGenerator {
    fn name(&self) -> &'static str {
        "frozen"
    }

    fn wants(&self, record: &ImageRecord) -> bool {
        record.is_source() || record.is_thumbnail()
    }

    fn outputs(&self, record: &ImageRecord) -> Vec<String> {
        vec![format!(
            "{}{}",
            record.web_dir,
            frozen_filename(&record.stem, &record.extension)
        )]
    }

    fn process(&self, record: &ImageRecord, cache: &mut CacheHandle) -> ImageResult {
        let mut result = ImageResult::new(&record.web_path);
        let mut session = EntrySession::open(cache, record, true);
        match self.freeze(record, &mut session, cache, &mut result) {
            Ok(frozen) => result.artifact = Some(Artifact::Frozen(frozen)),
            Err(e) => result.errors.push(e),
        }
        session.finish(cache, record);
        result
    }
}
