//! Person detection capability.

mod yolo;

pub use yolo::{YoloPersonDetector, YoloPersonDetectorConfig};

use image::RgbImage;
use sid_models::PersonDetection;

use crate::error::VisionResult;

/// Finds people in a frame.
///
/// Implementations never return detections whose confidence is below
/// `threshold`. Boxes are in the pixel coordinates of `frame`.
pub trait PersonDetector: Send + Sync {
    fn detect(&self, frame: &RgbImage, threshold: f32) -> VisionResult<Vec<PersonDetection>>;
}

/// Greedy non-maximum suppression, highest confidence first.
pub fn non_maximum_suppression(
    mut detections: Vec<PersonDetection>,
    iou_threshold: f32,
) -> Vec<PersonDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<PersonDetection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep
            .iter()
            .all(|kept| kept.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}
