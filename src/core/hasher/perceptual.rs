//! Difference Hash (dHash) implementation.
//!
//! dHash works by:
//! 1. Resizing the image to 9x8 luminance samples
//! 2. Comparing each sample to the one on its right
//! 3. Setting the bit when the left sample is brighter
//!
//! The result is 64 bits, most significant bit first. It survives
//! recompression and resizing but not rotation.

use super::fast_resize::resize_to_grayscale;
use crate::error::DecodeError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of every perceptual hash in bits
pub const HASH_BITS: u32 = 64;

/// Number of 16-bit bands a hash is split into for neighbourhood lookups
pub const BAND_COUNT: usize = 4;

/// A 64-bit perceptual fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Number of differing bits
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Bit pattern as a signed integer, for SQLite storage
    pub fn to_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    /// The hash split into four 16-bit bands, most significant first
    pub fn bands(&self) -> [u16; BAND_COUNT] {
        let mut bands = [0u16; BAND_COUNT];
        for (i, band) in bands.iter_mut().enumerate() {
            *band = (self.0 >> (48 - 16 * i)) as u16;
        }
        bands
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes [`PerceptualHash`]es from decoded pixels
#[derive(Debug, Default, Clone, Copy)]
pub struct DifferenceHasher;

impl DifferenceHasher {
    pub fn new() -> Self {
        Self
    }

    pub fn hash_image(&self, image: &DynamicImage) -> Result<PerceptualHash, DecodeError> {
        // One extra column to compute differences
        let gray = resize_to_grayscale(image, 9, 8)?;

        let mut bits: u64 = 0;
        for y in 0..8 {
            for x in 0..8 {
                bits <<= 1;
                if gray.get_pixel(x, y)[0] > gray.get_pixel(x + 1, y)[0] {
                    bits |= 1;
                }
            }
        }
        Ok(PerceptualHash(bits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};

    fn gradient(width: u32, height: u32, rising: bool) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, _| {
            let v = (x * 255 / (width - 1)) as u8;
            let v = if rising { v } else { 255 - v };
            Rgb([v, v, v])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn rising_gradient_sets_no_bits() {
        let hash = DifferenceHasher::new().hash_image(&gradient(100, 100, true)).unwrap();
        assert_eq!(hash, PerceptualHash(0));
    }

    #[test]
    fn falling_gradient_sets_every_bit() {
        let hash = DifferenceHasher::new().hash_image(&gradient(100, 100, false)).unwrap();
        assert_eq!(hash, PerceptualHash(u64::MAX));
    }

    #[test]
    fn resizing_keeps_hash_close() {
        let hasher = DifferenceHasher::new();
        let large = hasher.hash_image(&gradient(400, 300, true)).unwrap();
        let small = hasher.hash_image(&gradient(90, 60, true)).unwrap();
        assert!(large.distance(&small) <= 8);
    }

    #[test]
    fn same_pixels_same_hash() {
        let image = DynamicImage::ImageLuma8(ImageBuffer::from_fn(64, 48, |x, y| {
            Luma([((x * 7 + y * 13) % 256) as u8])
        }));
        let hasher = DifferenceHasher::new();
        assert_eq!(hasher.hash_image(&image).unwrap(), hasher.hash_image(&image).unwrap());
    }

    #[test]
    fn distance_counts_differing_bits() {
        assert_eq!(PerceptualHash(0b1011).distance(&PerceptualHash(0b0001)), 2);
        assert_eq!(PerceptualHash(0).distance(&PerceptualHash(u64::MAX)), 64);
    }

    #[test]
    fn storage_form_keeps_every_bit() {
        let hash = PerceptualHash(0xF000_0000_0000_0001);
        assert!(hash.to_i64() < 0);
        assert_eq!(PerceptualHash::from_i64(hash.to_i64()), hash);
    }

    #[test]
    fn bands_split_most_significant_first() {
        let hash = PerceptualHash(0x1111_2222_3333_4444);
        assert_eq!(hash.bands(), [0x1111, 0x2222, 0x3333, 0x4444]);
        assert_eq!(hash.to_string(), "1111222233334444");
    }
}
