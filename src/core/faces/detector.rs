//! Face detection collaborator.

use crate::error::FaceError;
use image::DynamicImage;
use std::path::Path;

/// Finds faces on a decoded image and returns one embedding per face.
///
/// Embeddings from one detector must all have the same length.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, path: &Path, image: &DynamicImage) -> Result<Vec<Vec<f32>>, FaceError>;

    /// Name shown in logs
    fn name(&self) -> &'static str {
        "detector"
    }
}

/// Detector used when no model is configured; never finds a face
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaceDetector;

impl FaceDetector for NoFaceDetector {
    fn detect(&self, _path: &Path, _image: &DynamicImage) -> Result<Vec<Vec<f32>>, FaceError> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
