//! Image encoding for the vision API.
//!
//! Two sources of images reach the model:
//!
//! * rasterised PDF pages (`DynamicImage`), encoded here to base64 in the
//!   configured format;
//! * `data:image/...;base64,...` URIs posted to the image entry point,
//!   parsed here into the same [`ImageData`] shape.
//!
//! `detail: "high"` asks GPT-4-class models for the full tile budget; small
//! labels in charts and tables are lost otherwise.

use crate::config::ImageFormat;
use crate::error::ConvertError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as base64 in `format`.
pub fn encode_page(img: &DynamicImage, format: ImageFormat) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    match format {
        ImageFormat::Png => img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?,
        // JPEG has no alpha channel.
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8())
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg)?,
    }

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, format.mime_type()).with_detail("high"))
}

/// Parse a `data:image/<type>;base64,<payload>` URI.
///
/// The payload must be non-empty valid base64.
pub fn parse_image_data_url(url: &str) -> Result<ImageData, ConvertError> {
    let invalid = |reason: &str| ConvertError::InvalidImage {
        reason: reason.to_string(),
    };

    let rest = url
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| invalid("expected a data: URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| invalid("data URI has no payload"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| invalid("only base64 data URIs are supported"))?;
    if !mime.starts_with("image/") {
        return Err(invalid("data URI is not an image"));
    }
    if payload.is_empty() {
        return Err(invalid("image payload is empty"));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| invalid(&format!("payload is not valid base64: {e}")))?;

    Ok(ImageData::new(payload.to_string(), mime.to_string()).with_detail("high"))
}

/// Build a data URI from raw image bytes, sniffing the format.
pub fn image_bytes_to_data_url(bytes: &[u8]) -> Result<String, ConvertError> {
    let format = image::guess_format(bytes).map_err(|e| ConvertError::InvalidImage {
        reason: format!("unrecognised image format: {e}"),
    })?;
    Ok(format!(
        "data:{};base64,{}",
        format.to_mime_type(),
        STANDARD.encode(bytes)
    ))
}

/// Approximate decoded size of a data URI in megabytes, rounded to 2 decimals.
pub fn approx_data_url_size_mb(url: &str) -> f64 {
    let bytes = url.len() as f64 * 3.0 / 4.0;
    round2(bytes / (1024.0 * 1024.0))
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
