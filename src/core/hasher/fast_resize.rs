//! Fast SIMD-accelerated image resizing.
//!
//! Uses fast_image_resize, which picks AVX2/NEON kernels when available.
//! Errors carry an empty path; callers attach the file with
//! [`DecodeError::at`].

use crate::error::DecodeError;
use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::path::PathBuf;

/// Fast image resizer using SIMD acceleration
pub struct FastResizer {
    resizer: Resizer,
}

impl FastResizer {
    pub fn new() -> Self {
        Self {
            resizer: Resizer::new(),
        }
    }

    /// Convert to luminance, then resize to `width` x `height`.
    pub fn resize_to_grayscale(
        &mut self,
        image: &DynamicImage,
        width: u32,
        height: u32,
    ) -> Result<GrayImage, DecodeError> {
        // Grayscale first: one channel to resize instead of three
        let gray = image.to_luma8();
        let (src_width, src_height) = gray.dimensions();

        if src_width == 0 || src_height == 0 || width == 0 || height == 0 {
            return Err(DecodeError::EmptyImage {
                path: PathBuf::new(),
            });
        }

        let src_image = Image::from_vec_u8(src_width, src_height, gray.into_raw(), PixelType::U8)
            .map_err(|e| corrupt(format!("Failed to create source image: {}", e)))?;
        let mut dst_image = Image::new(width, height, PixelType::U8);

        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        self.resizer
            .resize(&src_image, &mut dst_image, &options)
            .map_err(|e| corrupt(format!("Resize failed: {}", e)))?;

        let result: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_raw(width, height, dst_image.into_vec())
                .ok_or_else(|| corrupt("Failed to create result buffer".to_string()))?;
        Ok(result)
    }
}

impl Default for FastResizer {
    fn default() -> Self {
        Self::new()
    }
}

fn corrupt(reason: String) -> DecodeError {
    DecodeError::Corrupt {
        path: PathBuf::new(),
        reason,
    }
}

/// Convenience function for one-off resizing
pub fn resize_to_grayscale(
    image: &DynamicImage,
    width: u32,
    height: u32,
) -> Result<GrayImage, DecodeError> {
    FastResizer::new().resize_to_grayscale(image, width, height)
}
