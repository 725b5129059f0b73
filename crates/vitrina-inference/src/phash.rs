//! Legacy perceptual hash (dHash).
//!
//! The fingerprint is the row-wise gradient sign of a 9×8 grayscale
//! thumbnail: 64 bits, most significant first, rendered as 16 lowercase hex
//! characters. Kept for items indexed before embeddings existed.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};

use vitrina_core::defaults::HASH_SIZE;
use vitrina_core::{Error, Result};

use crate::normalize::flatten_on_white;

/// Hash encoded image bytes. Undecodable input is `Unprocessable`.
pub fn dhash(bytes: &[u8]) -> Result<String> {
    let image = image::load_from_memory(bytes).map_err(|e| Error::Unprocessable(e.to_string()))?;
    Ok(dhash_image(&image))
}

/// Hash a decoded image with the default 8×8 grid.
pub fn dhash_image(image: &DynamicImage) -> String {
    dhash_with_size(image, HASH_SIZE)
}

pub fn dhash_with_size(image: &DynamicImage, hash_size: u32) -> String {
    let gray = to_luma(image);
    let small = imageops::resize(&gray, hash_size + 1, hash_size, FilterType::Lanczos3);

    let mut bits = Vec::with_capacity((hash_size * hash_size) as usize);
    for y in 0..hash_size {
        for x in 0..hash_size {
            let left = small.get_pixel(x, y).0[0];
            let right = small.get_pixel(x + 1, y).0[0];
            bits.push(right > left);
        }
    }

    let bytes: Vec<u8> = bits
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0u8, |acc, &bit| (acc << 1) | u8::from(bit))
        })
        .collect();
    hex::encode(bytes)
}

/// ITU-R 601-2 luma, integer arithmetic, alpha flattened over white.
fn to_luma(image: &DynamicImage) -> GrayImage {
    let rgb = flatten_on_white(image);
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
        image::Luma([l as u8])
    })
}

/// Hamming distance between two hex fingerprints.
///
/// `None` when either is malformed or their widths differ.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    let a = hex::decode(a.trim()).ok()?;
    let b = hex::decode(b.trim()).ok()?;
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(&b).map(|(x, y)| (x ^ y).count_ones()).sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage, RgbImage};
    use std::io::Cursor;

    fn png(img: DynamicImage) -> Vec<u8> {
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_hash_is_sixteen_hex_chars() {
        let img = RgbImage::from_fn(50, 40, |x, y| image::Rgb([(x * 5) as u8, (y * 6) as u8, 0]));
        let hash = dhash(&png(DynamicImage::ImageRgb8(img))).unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_left_to_right_ramp_sets_every_bit() {
        let img = RgbImage::from_fn(90, 80, |x, _| {
            let v = (x * 255 / 89) as u8;
            image::Rgb([v, v, v])
        });
        assert_eq!(dhash_image(&DynamicImage::ImageRgb8(img)), "ffffffffffffffff");
    }

    #[test]
    fn test_flat_image_hashes_to_zero() {
        let img = RgbImage::from_pixel(32, 32, image::Rgb([120, 120, 120]));
        assert_eq!(dhash_image(&DynamicImage::ImageRgb8(img)), "0000000000000000");
    }

    #[test]
    fn test_transparent_image_matches_white() {
        let clear = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0]));
        let white = RgbImage::from_pixel(16, 16, image::Rgb([255, 255, 255]));
        assert_eq!(
            dhash_image(&DynamicImage::ImageRgba8(clear)),
            dhash_image(&DynamicImage::ImageRgb8(white))
        );
    }

    #[test]
    fn test_undecodable_bytes_are_unprocessable() {
        assert!(matches!(dhash(b"nope"), Err(Error::Unprocessable(_))));
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance("ff00", "ff00"), Some(0));
        assert_eq!(hamming_distance("ff00", "0f00"), Some(4));
        assert_eq!(
            hamming_distance("ffffffffffffffff", "0000000000000000"),
            Some(64)
        );
    }

    #[test]
    fn test_hamming_distance_rejects_malformed() {
        assert_eq!(hamming_distance("zz", "00"), None);
        assert_eq!(hamming_distance("ff", "ffff"), None);
        assert_eq!(hamming_distance("", ""), None);
        assert_eq!(hamming_distance("abc", "abc"), None);
    }
}
