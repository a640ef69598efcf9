//! Content and perceptual fingerprints.

use std::fmt;
use std::str::FromStr;

use image::imageops::FilterType;
use sha2::{Digest, Sha256};

use doku_core::{Error, Result};

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

const DCT_INPUT: usize = 32;
const DCT_KEEP: usize = 8;

/// 64-bit DCT perceptual hash.
///
/// Visually similar images (re-encoded, resized, slightly recompressed) land
/// within a small Hamming distance of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Compute the hash of an encoded image.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(bytes).map_err(|e| Error::Image(e.to_string()))?;
        let gray = img
            .resize_exact(DCT_INPUT as u32, DCT_INPUT as u32, FilterType::Lanczos3)
            .to_luma8();

        let mut pixels = [[0.0f64; DCT_INPUT]; DCT_INPUT];
        for (x, y, p) in gray.enumerate_pixels() {
            pixels[y as usize][x as usize] = f64::from(p[0]);
        }

        let coeffs = low_frequency_dct(&pixels);
        let mut sorted = coeffs;
        sorted.sort_by(f64::total_cmp);
        let median = (sorted[31] + sorted[32]) / 2.0;

        let bits = coeffs
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > median)
            .fold(0u64, |acc, (i, _)| acc | (1u64 << (63 - i)));
        Ok(Self(bits))
    }

    pub fn distance(&self, other: &Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 16 {
            return Err(Error::InvalidInput(format!("perceptual hash: {}", s)));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| Error::InvalidInput(format!("perceptual hash: {}", s)))
    }
}

/// Best-effort perceptual hash as 16 hex chars; `None` if the image won't decode.
pub fn perceptual_hash(bytes: &[u8]) -> Option<String> {
    PerceptualHash::from_bytes(bytes).ok().map(|h| h.to_string())
}

/// Top-left 8x8 block of the 2D DCT-II, row-major.
fn low_frequency_dct(pixels: &[[f64; DCT_INPUT]; DCT_INPUT]) -> [f64; DCT_KEEP * DCT_KEEP] {
    let n = DCT_INPUT as f64;
    let mut basis = [[0.0f64; DCT_INPUT]; DCT_KEEP];
    for (u, row) in basis.iter_mut().enumerate() {
        for (x, b) in row.iter_mut().enumerate() {
            *b = ((2 * x + 1) as f64 * u as f64 * std::f64::consts::PI / (2.0 * n)).cos();
        }
    }

    // Separable: transform rows first, then columns.
    let mut rows = [[0.0f64; DCT_KEEP]; DCT_INPUT];
    for (y, line) in pixels.iter().enumerate() {
        for v in 0..DCT_KEEP {
            rows[y][v] = line.iter().zip(basis[v].iter()).map(|(p, b)| p * b).sum();
        }
    }

    let mut out = [0.0f64; DCT_KEEP * DCT_KEEP];
    for u in 0..DCT_KEEP {
        for v in 0..DCT_KEEP {
            out[u * DCT_KEEP + v] = (0..DCT_INPUT).map(|y| rows[y][v] * basis[u][y]).sum();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{gradient_jpeg, pattern_jpeg};

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_perceptual_hash_format() {
        let hash = perceptual_hash(&gradient_jpeg(64, 48)).unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash.parse::<PerceptualHash>().unwrap().to_string(), hash);
    }

    #[test]
    fn test_perceptual_hash_survives_resize() {
        let big = PerceptualHash::from_bytes(&pattern_jpeg(320, 192)).unwrap();
        let small = PerceptualHash::from_bytes(&pattern_jpeg(80, 48)).unwrap();
        assert!(big.distance(&small) <= 8, "distance {}", big.distance(&small));
    }

    #[test]
    fn test_same_bytes_same_hash() {
        let jpeg = pattern_jpeg(64, 64);
        assert_eq!(perceptual_hash(&jpeg), perceptual_hash(&jpeg));
    }

    #[test]
    fn test_undecodable_bytes_have_no_perceptual_hash() {
        assert_eq!(perceptual_hash(b"definitely not an image"), None);
    }

    #[test]
    fn test_bad_hex_rejected() {
        assert!("xyz".parse::<PerceptualHash>().is_err());
        assert!("zzzzzzzzzzzzzzzz".parse::<PerceptualHash>().is_err());
    }
}
