//! Normalizes uploads to the canonical encoding.
//!
//! Images are decoded, turned upright according to their EXIF orientation and
//! re-encoded as lossless WebP. A thumbnail is derived from the upright image and
//! the capture metadata embedded in the original is extracted into a scalar map.
//! Anything that is not an image passes through untouched.

use crate::config::MediaConfig;
use crate::error::{MediaError, Result};
use crate::models::{Scalar, ScalarMap};
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Tag, Value};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageResult};
use std::io::Cursor;
use std::time::Instant;
use tracing::{debug, warn};

/// Content type of every transcoded image
pub const CANONICAL_CONTENT_TYPE: &str = "image/webp";

/// Accepted layouts for capture timestamps, tried in order
const CAPTURE_TIME_FORMATS: &[&str] = &["%Y:%m:%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Result of transcoding one upload
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub canonical: Bytes,
    pub content_type: String,
    pub thumbnail: Option<Bytes>,
    pub metadata: ScalarMap,
    pub capture_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MediaTranscoder {
    thumbnail_size: u32,
}

impl MediaTranscoder {
    pub fn new(config: &MediaConfig) -> Self {
        Self::with_thumbnail_size(config.thumbnail_size)
    }

    pub fn with_thumbnail_size(thumbnail_size: u32) -> Self {
        Self {
            thumbnail_size: thumbnail_size.max(1),
        }
    }

    /// Transcode on the blocking pool
    pub async fn transcode(&self, data: Bytes, content_type: &str) -> Result<TranscodeOutput> {
        let transcoder = self.clone();
        let content_type = content_type.to_string();
        let started = Instant::now();

        let output = tokio::task::spawn_blocking(move || {
            transcoder.transcode_blocking(&data, &content_type)
        })
        .await
        .map_err(|e| MediaError::UnsupportedMedia(format!("Transcoding aborted: {}", e)))??;

        metrics::histogram!("media.transcode.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(output)
    }

    pub fn transcode_blocking(&self, data: &[u8], content_type: &str) -> Result<TranscodeOutput> {
        let exif = read_exif(data);
        let metadata = exif.as_ref().map(extract_metadata).unwrap_or_default();
        let capture_time = metadata
            .get("DateTimeOriginal")
            .and_then(Scalar::as_text)
            .and_then(parse_capture_time);

        if !is_image(content_type) {
            debug!(content_type = %content_type, "Passing non-image content through");
            return Ok(TranscodeOutput {
                canonical: Bytes::copy_from_slice(data),
                content_type: content_type.to_string(),
                thumbnail: None,
                metadata,
                capture_time,
            });
        }

        let decoded = image::load_from_memory(data)
            .map_err(|e| MediaError::UnsupportedMedia(format!("Failed to decode image: {}", e)))?;

        let orientation = exif
            .as_ref()
            .and_then(|e| e.get_field(Tag::Orientation, In::PRIMARY))
            .and_then(|f| f.value.get_uint(0))
            .unwrap_or(1);
        let upright = apply_orientation(decoded, orientation);

        let canonical = encode_webp(&upright).map_err(|e| {
            MediaError::UnsupportedMedia(format!("Failed to encode canonical image: {}", e))
        })?;

        let thumbnail = match encode_webp(&self.thumbnail(&upright)) {
            Ok(buf) => Some(Bytes::from(buf)),
            Err(e) => {
                warn!(error = %e, "Thumbnail generation failed");
                None
            }
        };

        Ok(TranscodeOutput {
            canonical: Bytes::from(canonical),
            content_type: CANONICAL_CONTENT_TYPE.to_string(),
            thumbnail,
            metadata,
            capture_time,
        })
    }

    /// Fit into the thumbnail box. Smaller images are not upscaled.
    fn thumbnail(&self, img: &DynamicImage) -> DynamicImage {
        if img.width() <= self.thumbnail_size && img.height() <= self.thumbnail_size {
            img.clone()
        } else {
            img.resize(self.thumbnail_size, self.thumbnail_size, FilterType::Lanczos3)
        }
    }
}

impl Default for MediaTranscoder {
    fn default() -> Self {
        Self::new(&MediaConfig::default())
    }
}

fn is_image(content_type: &str) -> bool {
    content_type
        .get(..6)
        .map(|prefix| prefix.eq_ignore_ascii_case("image/"))
        .unwrap_or(false)
}

fn encode_webp(img: &DynamicImage) -> ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = WebPEncoder::new_lossless(&mut buf);

    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        encoder.encode(rgba.as_raw(), rgba.width(), rgba.height(), ExtendedColorType::Rgba8)?;
    } else {
        let rgb = img.to_rgb8();
        encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)?;
    }

    Ok(buf)
}

/// Map EXIF orientation 1..=8 onto pixel operations
fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

fn read_exif(data: &[u8]) -> Option<Exif> {
    let mut cursor = Cursor::new(data);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => Some(exif),
        Err(e) => {
            debug!(error = %e, "No readable EXIF data");
            None
        }
    }
}

fn extract_metadata(exif: &Exif) -> ScalarMap {
    let mut map = ScalarMap::new();

    let text_tags = [
        ("Make", Tag::Make),
        ("Model", Tag::Model),
        ("LensModel", Tag::LensModel),
        ("DateTimeOriginal", Tag::DateTimeOriginal),
        ("Software", Tag::Software),
        ("Artist", Tag::Artist),
        ("Copyright", Tag::Copyright),
    ];
    for (key, tag) in text_tags {
        if let Some(text) = field_text(exif, tag) {
            map.insert(key.to_string(), Scalar::Text(text));
        }
    }

    let rational_tags = [
        ("FocalLength", Tag::FocalLength),
        ("FNumber", Tag::FNumber),
        ("ExposureTime", Tag::ExposureTime),
    ];
    for (key, tag) in rational_tags {
        if let Some(value) = field_rational(exif, tag) {
            map.insert(key.to_string(), Scalar::Float(value));
        }
    }

    let integer_tags = [
        ("ISO", &[Tag::PhotographicSensitivity][..]),
        ("ImageWidth", &[Tag::PixelXDimension, Tag::ImageWidth][..]),
        ("ImageHeight", &[Tag::PixelYDimension, Tag::ImageLength][..]),
        ("Orientation", &[Tag::Orientation][..]),
        ("ExposureProgram", &[Tag::ExposureProgram][..]),
        ("MeteringMode", &[Tag::MeteringMode][..]),
        ("Flash", &[Tag::Flash][..]),
        ("WhiteBalance", &[Tag::WhiteBalance][..]),
    ];
    for (key, tags) in integer_tags {
        if let Some(value) = tags.iter().find_map(|tag| field_uint(exif, *tag)) {
            map.insert(key.to_string(), Scalar::Integer(value as i64));
        }
    }

    if let Some(lat) = gps_coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, b'S') {
        map.insert("Latitude".to_string(), Scalar::Float(lat));
    }
    if let Some(lon) = gps_coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, b'W') {
        map.insert("Longitude".to_string(), Scalar::Float(lon));
    }

    map
}

fn field_text(exif: &Exif, tag: Tag) -> Option<String> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Ascii(parts) => {
            let text = String::from_utf8_lossy(parts.first()?);
            let text = text.trim_end_matches('\0').trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        _ => None,
    }
}

fn field_rational(exif: &Exif, tag: Tag) -> Option<f64> {
    match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) => values
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.to_f64()),
        _ => None,
    }
}

fn field_uint(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)?.value.get_uint(0)
}

/// Degrees/minutes/seconds to signed decimal degrees
fn gps_coordinate(exif: &Exif, tag: Tag, ref_tag: Tag, negative_ref: u8) -> Option<f64> {
    let dms = match &exif.get_field(tag, In::PRIMARY)?.value {
        Value::Rational(values) if values.len() >= 3 && values.iter().all(|r| r.denom != 0) => {
            values[0].to_f64() + values[1].to_f64() / 60.0 + values[2].to_f64() / 3600.0
        }
        _ => return None,
    };

    let negative = match exif.get_field(ref_tag, In::PRIMARY).map(|f| &f.value) {
        Some(Value::Ascii(parts)) => parts
            .first()
            .and_then(|p| p.first())
            .map(|c| c.to_ascii_uppercase() == negative_ref)
            .unwrap_or(false),
        _ => false,
    };

    Some(if negative { -dms } else { dms })
}

/// Parse a capture timestamp; naive values are taken as UTC
pub fn parse_capture_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, CAPTURE_TIME_FORMATS[0]) {
        return Some(naive.and_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    CAPTURE_TIME_FORMATS[1..]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}
