//! # Metadata Module
//!
//! Derives capture time, location, dimensions and document-likeness for one
//! file.
//!
//! ## Extracted Fields
//! - Date taken (EXIF `DateTimeOriginal`, falling back to the file mtime)
//! - GPS location as signed decimal degrees
//! - Image dimensions (decoded pixels first, EXIF tags second)
//! - `is_document`, decided by a pluggable [`DocumentClassifier`]
//!
//! Missing or unparsable EXIF is expected for screenshots, downloads and
//! edited files. It is never an error: the result records where the capture
//! time came from in [`DateSource`].
//!
//! Extraction reads only the bytes it is given, so re-running it on the same
//! bytes and mtime always yields the same output.

mod document;

pub use document::{DocumentClassifier, DocumentScore, HeuristicDocumentClassifier};

use crate::core::scanner::FileDescriptor;
use crate::error::ExtractError;
use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Reader, Tag, Value};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Where `date_taken` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    /// Embedded capture metadata
    Embedded,
    /// Filesystem modification time
    FileModified,
}

impl DateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DateSource::Embedded => "embedded",
            DateSource::FileModified => "file_modified",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "embedded" => Some(DateSource::Embedded),
            "file_modified" => Some(DateSource::FileModified),
            _ => None,
        }
    }
}

/// A geocoordinate in decimal degrees (south and west negative)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Output of [`MetadataExtractor::extract`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub date_taken: DateTime<Utc>,
    pub date_source: DateSource,
    pub location: Option<GeoLocation>,
    pub is_document: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// What the EXIF block offered
#[derive(Debug, Default)]
struct EmbeddedMetadata {
    date_taken: Option<DateTime<Utc>>,
    location: Option<GeoLocation>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Extracts [`ExtractedMetadata`] from file bytes and decoded pixels
pub struct MetadataExtractor {
    classifier: Box<dyn DocumentClassifier>,
}

impl MetadataExtractor {
    /// Extractor using the built-in document heuristic
    pub fn new() -> Self {
        Self::with_classifier(Box::new(HeuristicDocumentClassifier::default()))
    }

    pub fn with_classifier(classifier: Box<dyn DocumentClassifier>) -> Self {
        Self { classifier }
    }

    /// Extract metadata for `file`.
    ///
    /// `image` is `None` when the file could not be decoded; the document
    /// flag is then false and dimensions come from EXIF alone.
    pub fn extract(
        &self,
        file: &FileDescriptor,
        bytes: &[u8],
        image: Option<&DynamicImage>,
    ) -> ExtractedMetadata {
        let embedded = match read_exif(bytes) {
            Ok(exif) => embedded_fields(&exif),
            Err(e) => {
                tracing::debug!(path = %file.path.display(), reason = %e, "no embedded metadata");
                EmbeddedMetadata::default()
            }
        };

        let (date_taken, date_source) = match embedded.date_taken {
            Some(date) => (date, DateSource::Embedded),
            None => (DateTime::<Utc>::from(file.mtime), DateSource::FileModified),
        };

        let (width, height) = match image {
            Some(img) => (Some(img.width()), Some(img.height())),
            None => (embedded.width, embedded.height),
        };

        ExtractedMetadata {
            date_taken,
            date_source,
            location: embedded.location,
            is_document: image.map(|img| self.classifier.is_document(img)).unwrap_or(false),
            width,
            height,
        }
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn read_exif(bytes: &[u8]) -> Result<Exif, ExtractError> {
    Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .map_err(|_| ExtractError::NoMetadata)
}

fn embedded_fields(exif: &Exif) -> EmbeddedMetadata {
    let mut meta = EmbeddedMetadata::default();

    if let Some(field) = exif.get_field(Tag::DateTimeOriginal, In::PRIMARY) {
        if let Some(text) = get_string_value(&field.value) {
            match parse_exif_datetime(&text) {
                Ok(date) => meta.date_taken = Some(date),
                Err(e) => tracing::debug!(reason = %e, "ignoring capture time"),
            }
        }
    }

    meta.location = gps_location(exif);

    // Prefer actual pixel dimensions over the nominal image size
    meta.width = exif
        .get_field(Tag::PixelXDimension, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::ImageWidth, In::PRIMARY))
        .and_then(|f| get_u32_value(&f.value));
    meta.height = exif
        .get_field(Tag::PixelYDimension, In::PRIMARY)
        .or_else(|| exif.get_field(Tag::ImageLength, In::PRIMARY))
        .and_then(|f| get_u32_value(&f.value));

    meta
}

/// Parse an EXIF timestamp ("YYYY:MM:DD HH:MM:SS")
fn parse_exif_datetime(text: &str) -> Result<DateTime<Utc>, ExtractError> {
    NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S")
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .map_err(|_| ExtractError::BadTimestamp {
            value: text.to_string(),
        })
}

fn gps_location(exif: &Exif) -> Option<GeoLocation> {
    let coordinate = |value_tag: Tag, ref_tag: Tag, negative: &str| -> Option<f64> {
        let field = exif.get_field(value_tag, In::PRIMARY)?;
        let dms = match &field.value {
            Value::Rational(parts) if parts.len() >= 3 => {
                [parts[0].to_f64(), parts[1].to_f64(), parts[2].to_f64()]
            }
            _ => return None,
        };
        let reference = exif
            .get_field(ref_tag, In::PRIMARY)
            .and_then(|f| get_string_value(&f.value))
            .unwrap_or_default();
        Some(dms_to_decimal(dms, reference.eq_ignore_ascii_case(negative)))
    };

    let latitude = coordinate(Tag::GPSLatitude, Tag::GPSLatitudeRef, "S")?;
    let longitude = coordinate(Tag::GPSLongitude, Tag::GPSLongitudeRef, "W")?;

    let valid = latitude.is_finite()
        && longitude.is_finite()
        && latitude.abs() <= 90.0
        && longitude.abs() <= 180.0;
    valid.then_some(GeoLocation {
        latitude,
        longitude,
    })
}

/// Degrees/minutes/seconds to signed decimal degrees
fn dms_to_decimal(dms: [f64; 3], negative: bool) -> f64 {
    let value = dms[0] + dms[1] / 60.0 + dms[2] / 3600.0;
    if negative {
        -value
    } else {
        value
    }
}

/// Helper to extract u32 from various EXIF value types
fn get_u32_value(value: &Value) -> Option<u32> {
    match value {
        Value::Long(vec) => vec.first().copied(),
        Value::Short(vec) => vec.first().map(|v| *v as u32),
        _ => None,
    }
}

/// Helper to extract string from EXIF ASCII value
fn get_string_value(value: &Value) -> Option<String> {
    if let Value::Ascii(ref vec) = value {
        if let Some(bytes) = vec.first() {
            if let Ok(s) = std::str::from_utf8(bytes) {
                let trimmed = s.trim_end_matches('\0').trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::from_unix_nanos;
    use image::{ImageBuffer, Rgb};
    use std::path::PathBuf;

    fn descriptor() -> FileDescriptor {
        FileDescriptor {
            path: PathBuf::from("/photos/download.png"),
            size: 10,
            mtime: from_unix_nanos(1_600_000_000_000_000_000),
        }
    }

    #[test]
    fn exif_timestamp_parses() {
        let date = parse_exif_datetime("2021:07:04 18:30:05").unwrap();
        assert_eq!(date.to_rfc3339(), "2021-07-04T18:30:05+00:00");
    }

    #[test]
    fn bad_timestamp_is_an_extract_error() {
        assert!(matches!(
            parse_exif_datetime("0000:00:00 00:00:00"),
            Err(ExtractError::BadTimestamp { .. })
        ));
    }

    #[test]
    fn southern_and_western_coordinates_are_negative() {
        let lat = dms_to_decimal([33.0, 51.0, 54.0], true);
        let lon = dms_to_decimal([151.0, 12.0, 36.0], false);
        assert!((lat + 33.865).abs() < 1e-9);
        assert!((lon - 151.21).abs() < 1e-9);
    }

    #[test]
    fn missing_exif_falls_back_to_mtime() {
        let file = descriptor();
        let meta = MetadataExtractor::new().extract(&file, b"not an image", None);

        assert_eq!(meta.date_source, DateSource::FileModified);
        assert_eq!(meta.date_taken, DateTime::<Utc>::from(file.mtime));
        assert!(meta.location.is_none());
        assert!(!meta.is_document);
    }

    #[test]
    fn dimensions_come_from_decoded_pixels() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 30, Rgb([10, 200, 30])));
        let meta = MetadataExtractor::new().extract(&descriptor(), b"", Some(&image));

        assert_eq!((meta.width, meta.height), (Some(40), Some(30)));
    }

    #[test]
    fn extraction_is_idempotent() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(8, 8, Rgb([1, 2, 3])));
        let extractor = MetadataExtractor::new();
        let first = extractor.extract(&descriptor(), b"bytes", Some(&image));
        let second = extractor.extract(&descriptor(), b"bytes", Some(&image));
        assert_eq!(first, second);
    }

    #[test]
    fn date_source_round_trips_through_text() {
        for source in [DateSource::Embedded, DateSource::FileModified] {
            assert_eq!(DateSource::parse(source.as_str()), Some(source));
        }
    }
}
