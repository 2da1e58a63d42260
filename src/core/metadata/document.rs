//! Document-likeness heuristic.
//!
//! Scans, receipts and screenshots of text share three traits: a paper-like
//! aspect ratio or a bright background, little colour, and a moderate
//! density of sharp edges. A photo of a scene usually fails at least one.

use image::{DynamicImage, GrayImage, RgbImage};

/// Decides whether decoded pixels look like a document
pub trait DocumentClassifier: Send + Sync {
    fn is_document(&self, image: &DynamicImage) -> bool;
}

/// Measurements the heuristic is based on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentScore {
    /// Long side over short side
    pub aspect_ratio: f64,
    /// Fraction of pixels on a strong luminance edge
    pub edge_density: f64,
    /// Mean per-pixel chroma (max channel minus min channel), 0-255
    pub color_variance: f64,
    /// Mean luminance, 0-255
    pub brightness: f64,
}

/// Threshold-based classifier over [`DocumentScore`]
#[derive(Debug, Clone)]
pub struct HeuristicDocumentClassifier {
    /// Images larger than this on either side are shrunk before measuring
    pub analysis_size: u32,
    /// Gradient magnitude that counts as an edge
    pub edge_threshold: u16,
    pub min_edge_density: f64,
    pub max_edge_density: f64,
    pub max_color_variance: f64,
    pub min_brightness: f64,
}

impl Default for HeuristicDocumentClassifier {
    fn default() -> Self {
        Self {
            analysis_size: 512,
            edge_threshold: 48,
            min_edge_density: 0.02,
            max_edge_density: 0.35,
            max_color_variance: 24.0,
            min_brightness: 150.0,
        }
    }
}

/// Common paper ratios: A-series and US letter
const PAPER_RATIOS: &[f64] = &[1.414, 1.294];

impl HeuristicDocumentClassifier {
    /// Measure an image
    pub fn score(&self, image: &DynamicImage) -> DocumentScore {
        let (w, h) = (image.width(), image.height());
        let resized;
        let image = if w > self.analysis_size || h > self.analysis_size {
            resized = image.resize(
                self.analysis_size,
                self.analysis_size,
                image::imageops::FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let long = w.max(h) as f64;
        let short = w.min(h).max(1) as f64;
        let gray = image.to_luma8();

        DocumentScore {
            aspect_ratio: long / short,
            edge_density: self.edge_density(&gray),
            color_variance: color_variance(&image.to_rgb8()),
            brightness: mean_luma(&gray),
        }
    }

    fn edge_density(&self, gray: &GrayImage) -> f64 {
        let (width, height) = gray.dimensions();
        if width < 2 || height < 2 {
            return 0.0;
        }

        let mut edges = 0usize;
        for y in 0..height - 1 {
            for x in 0..width - 1 {
                let p = gray.get_pixel(x, y)[0] as i16;
                let dx = (gray.get_pixel(x + 1, y)[0] as i16 - p).unsigned_abs();
                let dy = (gray.get_pixel(x, y + 1)[0] as i16 - p).unsigned_abs();
                if dx + dy > self.edge_threshold {
                    edges += 1;
                }
            }
        }
        edges as f64 / ((width - 1) as f64 * (height - 1) as f64)
    }
}

impl DocumentClassifier for HeuristicDocumentClassifier {
    fn is_document(&self, image: &DynamicImage) -> bool {
        let score = self.score(image);

        let paper_shaped = PAPER_RATIOS
            .iter()
            .any(|r| (score.aspect_ratio - r).abs() < 0.05);
        let texty = score.edge_density >= self.min_edge_density
            && score.edge_density <= self.max_edge_density;
        let monochrome = score.color_variance <= self.max_color_variance;

        texty && monochrome && (paper_shaped || score.brightness >= self.min_brightness)
    }
}

fn color_variance(rgb: &RgbImage) -> f64 {
    let n = rgb.pixels().len();
    if n == 0 {
        return 0.0;
    }
    let total: u64 = rgb
        .pixels()
        .map(|p| {
            let max = p[0].max(p[1]).max(p[2]);
            let min = p[0].min(p[1]).min(p[2]);
            (max - min) as u64
        })
        .sum();
    total as f64 / n as f64
}

fn mean_luma(gray: &GrayImage) -> f64 {
    let n = gray.pixels().len();
    if n == 0 {
        return 0.0;
    }
    gray.pixels().map(|p| p[0] as u64).sum::<u64>() as f64 / n as f64
}
