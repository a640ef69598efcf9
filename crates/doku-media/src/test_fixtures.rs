//! Synthetic images for tests in this and downstream crates.

use std::io::Cursor;

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

/// A `width`x`height` image with a smooth two-axis gradient.
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    }))
}

const PATTERN_LEVELS: [[u8; 5]; 3] = [
    [200, 40, 150, 90, 230],
    [60, 180, 20, 250, 110],
    [140, 10, 220, 70, 170],
];

/// A 5x3 grid of flat cells with unrelated grey levels. Its low-frequency
/// spectrum is dense, which keeps perceptual hashes stable across rescaling.
pub fn pattern_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let col = (x * 5 / width.max(1)) as usize;
        let row = (y * 3 / height.max(1)) as usize;
        let level = PATTERN_LEVELS[row][col];
        Rgb([level, level, level])
    }))
}

/// Encode as JPEG at quality 90.
pub fn encode_jpeg(img: &DynamicImage) -> Vec<u8> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90))
        .expect("Failed to encode test JPEG");
    buf
}

pub fn gradient_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode_jpeg(&gradient_image(width, height))
}

pub fn pattern_jpeg(width: u32, height: u32) -> Vec<u8> {
    encode_jpeg(&pattern_image(width, height))
}

/// Insert an EXIF APP1 segment carrying only an orientation tag right after
/// the JPEG SOI marker.
pub fn with_orientation_tag(jpeg: &[u8], orientation: u16) -> Vec<u8> {
    assert!(jpeg.starts_with(&[0xFF, 0xD8]), "not a JPEG");

    // Big-endian TIFF header, one IFD entry: 0x0112 SHORT count 1.
    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"MM\x00\x2A\x00\x00\x00\x08");
    tiff.extend_from_slice(&1u16.to_be_bytes());
    tiff.extend_from_slice(&0x0112u16.to_be_bytes());
    tiff.extend_from_slice(&3u16.to_be_bytes());
    tiff.extend_from_slice(&1u32.to_be_bytes());
    tiff.extend_from_slice(&orientation.to_be_bytes());
    tiff.extend_from_slice(&[0, 0]);
    tiff.extend_from_slice(&0u32.to_be_bytes());

    let mut payload = b"Exif\x00\x00".to_vec();
    payload.extend_from_slice(&tiff);
    let segment_len = (payload.len() + 2) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Store `upright` the way a phone does for a portrait shot: pixels rotated a
/// quarter turn counter-clockwise, tagged with orientation 6.
pub fn tagged_portrait_jpeg(upright: &DynamicImage) -> Vec<u8> {
    with_orientation_tag(&encode_jpeg(&upright.rotate270()), 6)
}
