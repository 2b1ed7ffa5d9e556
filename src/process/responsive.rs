//! Responsive width/format sets.
//!
//! For every configured width not larger than the image, one file per
//! format is written as `{stem}.{width}{ext}`. The image's own format is
//! always among the formats; `additional_formats` adds more (typically WebP).
//!
//! The result is summarised as a [`ResponsiveSet`]:
//!
//! ```text
//! srcsets["original"] = "/img/photo.jpg 1200w, /img/photo.320.jpg 320w, /img/photo.640.jpg 640w"
//! srcsets["webp"]     = "/img/photo.320.webp 320w, /img/photo.640.webp 640w"
//! media = sizes       = "(max-width: 1200px)"
//! allsizes            = {320: {original, webp}, 640: {original, webp}, 1200: {original}}
//! last                = "/img/photo.640.jpg"
//! ```
//!
//! Images narrower than `cache_min_image_width` are too cheap to be worth
//! caching: they are generated without looking at the cache.

use super::{
    Artifact, EntrySession, Generator, ImageError, ImageResult, Operation, SourceImage,
    VariantInfo, VariantKey, encode_options, write_output,
};
use crate::cache::CacheHandle;
use crate::catalog::{ImageRecord, Origin, ResponsiveSet, SrcSet};
use crate::config::{EncodingConfig, ResponsiveConfig};
use crate::imaging::{self, Codec, calculations};
use crate::naming::responsive_filename;
use std::collections::BTreeMap;

/// Format key used for the image's own codec in [`ResponsiveSet`] maps.
pub const ORIGINAL_FORMAT: &str = "original";

pub struct ResponsiveGenerator {
    widths: Vec<u32>,
    additional_formats: Vec<Codec>,
    cache_min_image_width: u32,
    encoding: EncodingConfig,
}

impl ResponsiveGenerator {
    /// Unknown entries in `additional_formats` are ignored; config validation
    /// rejects them before a build starts.
    pub fn new(config: &ResponsiveConfig, encoding: &EncodingConfig) -> Self {
        let mut widths = config.widths.clone();
        widths.sort_unstable();
        widths.dedup();

        let mut additional_formats = Vec::new();
        for codec in config
            .additional_formats
            .iter()
            .filter_map(|f| Codec::from_extension(f))
        {
            if !additional_formats.contains(&codec) {
                additional_formats.push(codec);
            }
        }

        Self {
            widths,
            additional_formats,
            cache_min_image_width: config.cache_min_image_width,
            encoding: encoding.clone(),
        }
    }

    /// The image's own codec first, then the additional ones.
    fn formats_for(&self, record: &ImageRecord) -> Vec<Codec> {
        let mut formats = vec![record.codec];
        formats.extend(self.additional_formats.iter().filter(|c| **c != record.codec));
        formats
    }

    /// `{stem}.{width}{ext}`, keeping the source's own extension spelling.
    fn output_filename(&self, record: &ImageRecord, width: u32, codec: Codec) -> String {
        let extension = if codec == record.codec {
            record.extension.as_str()
        } else {
            codec.default_extension()
        };
        responsive_filename(&record.stem, width, extension)
    }

    #[allow(clippy::too_many_arguments)]
    fn variant(
        &self,
        record: &ImageRecord,
        width: u32,
        codec: Codec,
        source: &mut SourceImage<'_>,
        session: &mut EntrySession,
        cache: &mut CacheHandle,
        result: &mut ImageResult,
    ) -> Result<String, ImageError> {
        let key = VariantKey {
            operation: Operation::Responsive,
            width,
            height: calculations::scaled_height(record.width, record.height, width),
            format: codec,
        };
        let options = encode_options(&self.encoding, codec, record.lossless);

        let (bytes, status) = session.get_or_generate(&key, cache.stats_mut(), || {
            let image = source.decoded()?;
            let scaled = imaging::scale_to_width(image, width);
            Ok(imaging::encode(&scaled, options)?)
        })?;

        let filename = self.output_filename(record, width, codec);
        let derived = record.derive(
            &filename,
            codec,
            &bytes,
            Origin::Responsive {
                of: record.web_path.clone(),
            },
        )?;
        write_output(&derived.disk_path, &bytes)?;

        result.variants.push(VariantInfo {
            label: format!("{width}px {codec}"),
            status,
        });
        let web_path = derived.web_path.clone();
        result.derived.push(derived);
        Ok(web_path)
    }
}

impl Generator for ResponsiveGenerator {
    fn name(&self) -> &'static str {
        "responsive"
    }

    fn wants(&self, record: &ImageRecord) -> bool {
        record.is_source() || record.is_thumbnail()
    }

    fn outputs(&self, record: &ImageRecord) -> Vec<String> {
        let formats = self.formats_for(record);
        calculations::responsive_widths(record.width, &self.widths)
            .into_iter()
            .flat_map(|width| {
                formats.iter().map(move |&codec| {
                    format!(
                        "{}{}",
                        record.web_dir,
                        self.output_filename(record, width, codec)
                    )
                })
            })
            .collect()
    }

    fn process(&self, record: &ImageRecord, cache: &mut CacheHandle) -> ImageResult {
        let mut result = ImageResult::new(&record.web_path);
        let caching = record.width >= self.cache_min_image_width;
        let mut session = EntrySession::open(cache, record, caching);
        let mut source = SourceImage::new(record, session.raw());

        let mut set = SetBuilder::new(record);
        for width in calculations::responsive_widths(record.width, &self.widths) {
            for codec in self.formats_for(record) {
                match self.variant(
                    record,
                    width,
                    codec,
                    &mut source,
                    &mut session,
                    cache,
                    &mut result,
                ) {
                    Ok(web_path) => set.push(codec, width, web_path),
                    Err(e) => result.errors.push(e),
                }
            }
        }

        session.finish(cache, record);
        result.artifact = Some(Artifact::Responsive(set.build()));
        result
    }
}

/// Accumulates srcset entries in generation order.
struct SetBuilder {
    own_codec: Codec,
    entries: BTreeMap<String, (String, Vec<String>)>,
    allsizes: BTreeMap<u32, BTreeMap<String, String>>,
    last: String,
    width: u32,
    hash: String,
}

impl SetBuilder {
    /// Start with the image itself at its own width.
    fn new(record: &ImageRecord) -> Self {
        let mut builder = Self {
            own_codec: record.codec,
            entries: BTreeMap::new(),
            allsizes: BTreeMap::new(),
            last: String::new(),
            width: record.width,
            hash: record.content_hash.clone(),
        };
        builder.push(record.codec, record.width, record.web_path.clone());
        builder
    }

    fn format_key(&self, codec: Codec) -> String {
        if codec == self.own_codec {
            ORIGINAL_FORMAT.to_string()
        } else {
            codec.name().to_string()
        }
    }

    fn push(&mut self, codec: Codec, width: u32, web_path: String) {
        let key = self.format_key(codec);
        if key == ORIGINAL_FORMAT {
            self.last = web_path.clone();
        }
        self.entries
            .entry(key.clone())
            .or_insert_with(|| (codec.mime_type().to_string(), Vec::new()))
            .1
            .push(format!("{web_path} {width}w"));
        self.allsizes.entry(width).or_default().insert(key, web_path);
    }

    fn build(self) -> ResponsiveSet {
        let srcsets = self
            .entries
            .into_iter()
            .map(|(key, (format, items))| {
                (
                    key,
                    SrcSet {
                        srcset: items.join(", "),
                        format,
                    },
                )
            })
            .collect();
        let media = format!("(max-width: {}px)", self.width);
        ResponsiveSet {
            srcsets,
            sizes: media.clone(),
            media,
            hash: self.hash,
            allsizes: self.allsizes,
            last: self.last,
        }
    }
}
