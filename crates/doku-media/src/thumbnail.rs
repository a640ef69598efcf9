//! Thumbnail rendering for the finalize job.

use image::ImageFormat;

use doku_core::defaults::{THUMBNAIL_MAX_DIM, THUMBNAIL_PREFIX};
use doku_core::{Error, Result};

use crate::normalize::encode;

/// Storage key of the thumbnail for `object_key`.
pub fn thumbnail_key(object_key: &str) -> String {
    format!("{}{}.jpg", THUMBNAIL_PREFIX, object_key)
}

/// Render a JPEG thumbnail fitting inside a `THUMBNAIL_MAX_DIM` square.
///
/// Aspect ratio is preserved; images already within bounds keep their size.
pub fn render_thumbnail(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).map_err(|e| Error::Image(e.to_string()))?;
    let thumb = if img.width() > THUMBNAIL_MAX_DIM || img.height() > THUMBNAIL_MAX_DIM {
        img.thumbnail(THUMBNAIL_MAX_DIM, THUMBNAIL_MAX_DIM)
    } else {
        img
    };
    encode(&thumb, ImageFormat::Jpeg)
}
