//! Derivative filename conventions.
//!
//! Every generated file lives next to its source and is named after the
//! source stem. Rendering consumers rely on these names, so they are built in
//! one place:
//!
//! | Derivative | Pattern | Example |
//! |---|---|---|
//! | Thumbnail | `{stem}-thumb-{W}x{H}{ext}` | `photo-thumb-300x300.jpg` |
//! | Responsive | `{stem}.{width}{ext}` | `photo.640.webp` |
//! | Frozen | `{stem}.frozen{ext}` | `photo.frozen.jpg` |
//!
//! `ext` carries its leading dot. The in-place resize keeps the source name.
//!
//! The scan uses [`parse_derived_stem`] to recognise these names on later
//! builds so previous outputs are not picked up as new sources. A name only
//! counts as an output when the image it names as its base sits in the same
//! directory; `vacation.2019.jpg` on its own is a source.

/// Which derivative a stem was produced by, with the stem it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedName {
    Thumbnail {
        base: String,
        width: u32,
        height: u32,
    },
    Responsive {
        base: String,
        width: u32,
    },
    Frozen {
        base: String,
    },
}

impl DerivedName {
    /// Stem of the image this name would have been derived from.
    pub fn base(&self) -> &str {
        match self {
            Self::Thumbnail { base, .. } | Self::Responsive { base, .. } | Self::Frozen { base } => {
                base
            }
        }
    }
}

pub fn thumbnail_filename(stem: &str, width: u32, height: u32, extension: &str) -> String {
    format!("{stem}-thumb-{width}x{height}{extension}")
}

pub fn responsive_filename(stem: &str, width: u32, extension: &str) -> String {
    format!("{stem}.{width}{extension}")
}

pub fn frozen_filename(stem: &str, extension: &str) -> String {
    format!("{stem}.frozen{extension}")
}

/// Recognise a stem produced by one of the filename builders above.
///
/// - `"photo.frozen"` → Frozen { base: "photo" }
/// - `"photo.640"` → Responsive { base: "photo", width: 640 }
/// - `"photo-thumb-300x200"` → Thumbnail { base: "photo", 300, 200 }
/// - `"photo-thumb-300x200.640"` → Responsive { base: "photo-thumb-300x200", 640 }
/// - `"photo"`, `"thumb-party"` → None
pub fn parse_derived_stem(stem: &str) -> Option<DerivedName> {
    if let Some(base) = stem.strip_suffix(".frozen")
        && !base.is_empty()
    {
        return Some(DerivedName::Frozen {
            base: base.to_string(),
        });
    }

    if let Some(dot_pos) = stem.rfind('.') {
        let suffix = &stem[dot_pos + 1..];
        if dot_pos > 0
            && is_all_digits(suffix)
            && let Ok(width) = suffix.parse::<u32>()
        {
            return Some(DerivedName::Responsive {
                base: stem[..dot_pos].to_string(),
                width,
            });
        }
    }

    if let Some(marker) = stem.rfind("-thumb-") {
        let dims = &stem[marker + "-thumb-".len()..];
        if marker > 0
            && let Some((w, h)) = dims.split_once('x')
            && is_all_digits(w)
            && is_all_digits(h)
            && let (Ok(width), Ok(height)) = (w.parse::<u32>(), h.parse::<u32>())
        {
            return Some(DerivedName::Thumbnail {
                base: stem[..marker].to_string(),
                width,
                height,
            });
        }
    }

    None
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
