//! # Hasher Module
//!
//! Content and perceptual hashing for one file.
//!
//! ## Hashes
//! - **Content hash**: XXH3-128 over every byte. Identifies byte-identical
//!   files and confirms changes flagged by a size/mtime delta.
//! - **Perceptual hash**: 64-bit dHash over a 9x8 luminance grid. Tolerates
//!   recompression and resizing; compared by Hamming distance.
//!
//! Both are pure functions of the file bytes, which is what lets a rescan
//! skip files whose `(path, size, mtime)` did not change.
//!
//! ## Performance
//! - `zune-jpeg` for JPEG decoding
//! - `fast_image_resize` for SIMD downsampling
//! - memory-mapped reads for files of 1MB and above
//!
//! ## Example
//! ```rust,ignore
//! let engine = HashEngine::new();
//! let hashed = engine.hash_file(&path)?;
//! println!("{} {:?}", hashed.content_hash, hashed.perceptual_hash());
//! ```

pub mod content;
mod decode;
pub mod fast_resize;
mod perceptual;

pub use content::{hash_bytes, hash_file, read_file_bytes, FileBytes, CONTENT_HASH_LEN};
pub use decode::{FastDecoder, ImageDecoder, ImageFormat};
pub use perceptual::{DifferenceHasher, PerceptualHash, BAND_COUNT, HASH_BITS};

use crate::error::DecodeError;
use image::DynamicImage;
use std::path::Path;
use std::sync::Arc;

/// Everything the engine derives from one read of a file
pub struct HashedFile {
    pub content_hash: String,
    /// Decoded pixels and their fingerprint, or why decoding failed
    pub decoded: Result<(DynamicImage, PerceptualHash), DecodeError>,
}

impl HashedFile {
    pub fn perceptual_hash(&self) -> Option<PerceptualHash> {
        self.decoded.as_ref().ok().map(|(_, hash)| *hash)
    }
}

/// Computes both hashes with a pluggable decoder
#[derive(Clone)]
pub struct HashEngine {
    decoder: Arc<dyn ImageDecoder>,
    hasher: DifferenceHasher,
}

impl HashEngine {
    /// Engine using [`FastDecoder`]
    pub fn new() -> Self {
        Self::with_decoder(Arc::new(FastDecoder))
    }

    pub fn with_decoder(decoder: Arc<dyn ImageDecoder>) -> Self {
        Self {
            decoder,
            hasher: DifferenceHasher::new(),
        }
    }

    /// Hash bytes already read from `path`.
    ///
    /// The content hash always succeeds; a decode failure only affects the
    /// perceptual half.
    pub fn hash_bytes(&self, path: &Path, bytes: &[u8]) -> HashedFile {
        HashedFile {
            content_hash: hash_bytes(bytes),
            decoded: self.fingerprint(path, bytes),
        }
    }

    /// Decode bytes read from `path` and compute the perceptual hash only
    pub fn fingerprint(
        &self,
        path: &Path,
        bytes: &[u8],
    ) -> Result<(DynamicImage, PerceptualHash), DecodeError> {
        let image = self.decoder.decode(path, bytes)?;
        let hash = self.hasher.hash_image(&image).map_err(|e| e.at(path))?;
        Ok((image, hash))
    }

    /// Read and hash a file
    pub fn hash_file(&self, path: &Path) -> Result<HashedFile, DecodeError> {
        let bytes = read_file_bytes(path).map_err(|source| DecodeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.hash_bytes(path, &bytes))
    }

    /// Perceptual hash of already decoded pixels
    pub fn perceptual_hash(&self, image: &DynamicImage) -> Result<PerceptualHash, DecodeError> {
        self.hasher.hash_image(image)
    }
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn write_png(path: &Path, rising: bool) {
        let img = ImageBuffer::from_fn(64, 48, |x, _| {
            let v = (x * 4) as u8;
            let v = if rising { v } else { 255 - v };
            Rgb([v, v, v])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        std::fs::write(path, out.into_inner()).unwrap();
    }

    #[test]
    fn hashes_a_real_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path, true);

        let hashed = HashEngine::new().hash_file(&path).unwrap();

        assert_eq!(hashed.content_hash, hash_file(&path).unwrap());
        assert_eq!(hashed.perceptual_hash(), Some(PerceptualHash(0)));
    }

    #[test]
    fn decode_failure_keeps_content_hash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"\x89PNG but truncated").unwrap();

        let hashed = HashEngine::new().hash_file(&path).unwrap();

        assert_eq!(hashed.content_hash, hash_bytes(b"\x89PNG but truncated"));
        assert!(hashed.decoded.is_err());
        assert!(hashed.perceptual_hash().is_none());
    }

    #[test]
    fn unreadable_file_is_io_error() {
        assert!(matches!(
            HashEngine::new().hash_file(Path::new("/nonexistent/a.png")),
            Err(DecodeError::Io { .. })
        ));
    }

    #[test]
    fn custom_decoder_is_used() {
        struct Solid;
        impl ImageDecoder for Solid {
            fn decode(&self, _: &Path, _: &[u8]) -> Result<DynamicImage, DecodeError> {
                Ok(DynamicImage::new_rgb8(16, 16))
            }
        }

        let engine = HashEngine::with_decoder(Arc::new(Solid));
        let hashed = engine.hash_bytes(Path::new("/x.raw"), b"raw sensor dump");
        assert_eq!(hashed.perceptual_hash(), Some(PerceptualHash(0)));
    }
}
