//! Image Renditions (C8): metadata extraction at upload time and WebP
//! rendition generation, on-demand or in the background.

use std::io::Cursor;

use chrono::{DateTime, TimeZone, Utc};
use image::ImageFormat;
use spacenote_common::{AppError, AppResult, BlobStore};
use spacenote_db::entities::{AttachmentMeta, ImageMeta};

/// Mime types PIL/`image` can decode and that carry EXIF, per §4.7.
const SUPPORTED_IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/tiff",
    "image/heic",
    "image/heif",
];

#[must_use]
pub fn is_supported_image(mime_type: &str) -> bool {
    SUPPORTED_IMAGE_MIME_TYPES.contains(&mime_type)
}

/// Extract image dimensions/format and EXIF data from `bytes`. Returns an
/// empty `AttachmentMeta` for unsupported mime types. A supported image
/// that fails to decode sets `error` rather than failing the upload.
#[must_use]
pub fn extract_metadata(bytes: &[u8], mime_type: &str) -> AttachmentMeta {
    if !is_supported_image(mime_type) {
        return AttachmentMeta::default();
    }

    match decode_image_meta(bytes) {
        Ok(mut meta) => {
            meta.exif_created_at = extract_exif_created_at(bytes);
            AttachmentMeta {
                image: Some(meta),
                exif: None,
                error: None,
            }
        }
        Err(e) => AttachmentMeta {
            image: None,
            exif: None,
            error: Some(e),
        },
    }
}

fn decode_image_meta(bytes: &[u8]) -> Result<ImageMeta, String> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    let format = reader.format();
    let decoded = reader.decode().map_err(|e| e.to_string())?;
    Ok(ImageMeta {
        width: decoded.width(),
        height: decoded.height(),
        format: format.map_or_else(|| "unknown".to_string(), format_name),
        exif_created_at: None,
    })
}

fn format_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Png => "PNG",
        ImageFormat::WebP => "WEBP",
        ImageFormat::Tiff => "TIFF",
        _ => "OTHER",
    }
    .to_string()
}

fn extract_exif_created_at(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let exif_reader = exif::Reader::new();
    let exif = exif_reader.read_from_container(&mut Cursor::new(bytes)).ok()?;
    let field = exif
        .get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)
        .or_else(|| exif.get_field(exif::Tag::DateTime, exif::In::PRIMARY))?;
    let raw = field.display_value().to_string();
    parse_exif_datetime(&raw)
}

/// EXIF datetimes use `YYYY:MM:DD HH:MM:SS`.
fn parse_exif_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(raw, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Convert `source` bytes to WebP, converting RGBA/palette images to RGB
/// first and resizing (Lanczos3, aspect preserved) when wider than
/// `max_width`.
pub fn create_webp(source: &[u8], max_width: Option<u32>) -> AppResult<Vec<u8>> {
    let decoded = image::load_from_memory(source)
        .map_err(|e| AppError::ImageProcessing(format!("failed to decode source image: {e}")))?;

    let rgb = match &decoded {
        image::DynamicImage::ImageRgba8(_) | image::DynamicImage::ImageLumaA8(_) => {
            image::DynamicImage::ImageRgb8(decoded.to_rgb8())
        }
        other => other.clone(),
    };

    let resized = match max_width {
        Some(max_width) if rgb.width() > max_width => {
            let ratio = f64::from(max_width) / f64::from(rgb.width());
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let new_height = (f64::from(rgb.height()) * ratio).round() as u32;
            rgb.resize_exact(max_width, new_height, image::imageops::FilterType::Lanczos3)
        }
        _ => rgb,
    };

    let mut output = Cursor::new(Vec::new());
    resized
        .write_to(&mut output, ImageFormat::WebP)
        .map_err(|e| AppError::ImageProcessing(format!("failed to encode webp: {e}")))?;
    Ok(output.into_inner())
}

/// Generate and persist the WebP rendition of an already-bound attachment.
/// Failures are logged by the caller and never surface to the uploader;
/// rendition generation runs after the note/attachment response has
/// already been returned.
pub async fn generate_rendition(
    blobs: &BlobStore,
    space_slug: &str,
    note_number: i64,
    attachment_number: i64,
    max_width: Option<u32>,
) -> AppResult<()> {
    let source_path = blobs.note_attachment_path(space_slug, note_number, attachment_number)?;
    let source = blobs.read(&source_path).await?;
    let webp = create_webp(&source, max_width)?;
    let rendition_path = blobs.rendition_path(space_slug, note_number, attachment_number)?;
    blobs.write(&rendition_path, &webp).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_mime_yields_empty_metadata() {
        let meta = extract_metadata(b"not an image", "application/pdf");
        assert!(meta.image.is_none());
        assert!(meta.error.is_none());
    }

    #[test]
    fn corrupt_image_bytes_set_error_not_panic() {
        let meta = extract_metadata(b"\xff\xd8\xff\xe0garbage", "image/jpeg");
        assert!(meta.image.is_none());
        assert!(meta.error.is_some());
    }

    #[test]
    fn exif_datetime_format_parses() {
        let dt = parse_exif_datetime("2024:06:01 10:30:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-01T10:30:00+00:00");
    }
}
