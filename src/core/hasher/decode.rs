//! Image decoding collaborator.
//!
//! Uses zune-jpeg for JPEG files and falls back to the image crate for
//! everything else. Decoding works on bytes already in memory so the
//! content hash, EXIF and pixels all come from one read of the file.

use crate::error::DecodeError;
use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};
use std::path::Path;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_jpeg::JpegDecoder;

/// `decode(path) -> pixels | DecodeError`
pub trait ImageDecoder: Send + Sync {
    /// Decode `bytes`, which were read from `path`
    fn decode(&self, path: &Path, bytes: &[u8]) -> Result<DynamicImage, DecodeError>;
}

/// Image formats the decoder distinguishes by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Heic,
    Other,
}

impl ImageFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("jpg" | "jpeg") => Self::Jpeg,
            Some("png") => Self::Png,
            Some("webp") => Self::WebP,
            Some("heic" | "heif") => Self::Heic,
            _ => Self::Other,
        }
    }
}

/// Decoder that picks the fastest available path per format
#[derive(Debug, Default, Clone, Copy)]
pub struct FastDecoder;

impl ImageDecoder for FastDecoder {
    fn decode(&self, path: &Path, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::EmptyImage {
                path: path.to_path_buf(),
            });
        }

        let image = match ImageFormat::from_path(path) {
            ImageFormat::Jpeg => {
                Self::decode_jpeg(path, bytes).or_else(|_| Self::decode_fallback(path, bytes))
            }
            // No HEIF codec in the image crate
            ImageFormat::Heic => Err(DecodeError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
            _ => Self::decode_fallback(path, bytes),
        }?;

        if image.width() == 0 || image.height() == 0 {
            return Err(DecodeError::EmptyImage {
                path: path.to_path_buf(),
            });
        }
        Ok(image)
    }
}

impl FastDecoder {
    fn decode_jpeg(path: &Path, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        let corrupt = |reason: String| DecodeError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        let options = DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGB);
        let mut decoder = JpegDecoder::new_with_options(bytes, options);

        let pixels = decoder
            .decode()
            .map_err(|e| corrupt(format!("zune-jpeg decode failed: {:?}", e)))?;
        let info = decoder
            .info()
            .ok_or_else(|| corrupt("Failed to get image info".to_string()))?;
        let (width, height) = (info.width as u32, info.height as u32);

        match decoder.get_output_colorspace().unwrap_or(ColorSpace::RGB) {
            ColorSpace::RGB => ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| corrupt("Failed to create RGB buffer".to_string())),
            ColorSpace::RGBA => ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageRgba8)
                .ok_or_else(|| corrupt("Failed to create RGBA buffer".to_string())),
            ColorSpace::Luma => ImageBuffer::<Luma<u8>, _>::from_raw(width, height, pixels)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| corrupt("Failed to create Luma buffer".to_string())),
            _ => Self::decode_fallback(path, bytes),
        }
    }

    fn decode_fallback(path: &Path, bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        image::load_from_memory(bytes).map_err(|e| match e {
            image::ImageError::Unsupported(_) => DecodeError::UnsupportedFormat {
                path: path.to_path_buf(),
            },
            other => DecodeError::Corrupt {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })
    }
}
