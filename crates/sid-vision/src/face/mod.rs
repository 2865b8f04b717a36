//! Face location, embedding and whitelist matching.

mod dataset;
mod embedder;
mod locator;
mod matcher;

pub use dataset::{enroll_dataset, load_dataset, DatasetIdentity, SUPPORTED_EXTENSIONS};
pub use embedder::{ArcFaceEmbedder, ArcFaceEmbedderConfig};
pub use locator::{UltraFaceLocator, UltraFaceLocatorConfig};
pub use matcher::{is_reserved_identity, EnrollReport, FaceMatcher, DEFAULT_MATCH_THRESHOLD};

use image::RgbImage;
use sid_models::BoundingBox;

use crate::error::VisionResult;

/// Finds faces inside a person crop.
///
/// Boxes are in the pixel coordinates of `crop`.
pub trait FaceLocator: Send + Sync {
    fn locate(&self, crop: &RgbImage) -> VisionResult<Vec<BoundingBox>>;
}

/// Turns a face crop into a fixed-length embedding.
///
/// The returned vector need not be normalized.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, face: &RgbImage) -> VisionResult<Vec<f32>>;
}

/// Scale `v` to unit length in place. Zero vectors are left as is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Dot product of L2-normalized vectors equals cosine similarity.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
