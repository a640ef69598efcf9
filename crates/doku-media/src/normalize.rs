//! Orientation normalization.
//!
//! Phones often store portrait shots as landscape pixels plus an EXIF
//! orientation tag. Two uploads of the same scene then differ byte-for-byte
//! depending on how the device tagged them, which defeats content-hash
//! deduplication. Normalizing bakes the orientation into the pixels so the
//! stored bytes carry no orientation tag.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use tracing::debug;

use doku_core::defaults::JPEG_QUALITY;
use doku_core::{Error, Result};

use crate::orientation::Orientation;

/// Output of [`normalize_orientation`].
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    /// Upright bytes, or the input unchanged when no rotation was needed.
    pub bytes: Vec<u8>,
    /// Orientation found in the source.
    pub orientation: Orientation,
    /// True when `bytes` were re-encoded and must be written back.
    pub changed: bool,
}

/// Apply the EXIF orientation to the pixels.
///
/// Images without a tag, or tagged as already upright, pass through untouched.
/// Otherwise the image is decoded, transformed and re-encoded in its source
/// format; the encoder writes no EXIF block, so the result reads as upright.
pub fn normalize_orientation(bytes: Vec<u8>) -> Result<NormalizedImage> {
    let orientation = Orientation::from_bytes(&bytes).unwrap_or_default();
    if orientation.is_identity() {
        return Ok(NormalizedImage {
            bytes,
            orientation,
            changed: false,
        });
    }

    let format = image::guess_format(&bytes).map_err(|e| Error::Image(e.to_string()))?;
    let decoded = image::load_from_memory_with_format(&bytes, format)
        .map_err(|e| Error::Image(format!("decode failed: {}", e)))?;
    let upright = orientation.apply(decoded);
    let encoded = encode(&upright, format)?;

    debug!(
        subsystem = "media",
        component = "normalizer",
        orientation = orientation.tag_value(),
        format = ?format,
        byte_len = encoded.len(),
        "Re-rendered image upright"
    );

    Ok(NormalizedImage {
        bytes: encoded,
        orientation,
        changed: true,
    })
}

/// Encode `img` as `format`. JPEG output drops any alpha channel.
pub(crate) fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_to(
            &mut Cursor::new(&mut buf),
            ImageOutputFormat::Jpeg(JPEG_QUALITY),
        ),
        other => img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::from(other)),
    };
    result.map_err(|e| Error::Image(format!("encode failed: {}", e)))?;
    Ok(buf)
}
