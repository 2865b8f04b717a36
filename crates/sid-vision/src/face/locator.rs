//! Face location with the Ultra-Light-Fast (RFB-320) ONNX face detector.

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ort::session::Session;
use sid_models::{BoundingBox, PersonDetection};
use tracing::info;

use super::FaceLocator;
use crate::detection::non_maximum_suppression;
use crate::error::{VisionError, VisionResult};
use crate::onnx::{create_session, nchw_tensor, run_many};

const NORM_MEAN: f32 = 127.0;
const NORM_STD: f32 = 128.0;

/// Configuration for the face locator.
#[derive(Debug, Clone)]
pub struct UltraFaceLocatorConfig {
    pub model_path: String,
    pub input_width: u32,
    pub input_height: u32,
    /// Minimum face score
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
}

impl Default for UltraFaceLocatorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/version-RFB-320.onnx".to_string(),
            input_width: 320,
            input_height: 240,
            confidence_threshold: 0.7,
            nms_threshold: 0.3,
        }
    }
}

/// ONNX face locator producing boxes in crop pixels.
pub struct UltraFaceLocator {
    session: Mutex<Session>,
    config: UltraFaceLocatorConfig,
}

impl UltraFaceLocator {
    pub fn new(config: UltraFaceLocatorConfig) -> VisionResult<Self> {
        let session = Mutex::new(create_session(Path::new(&config.model_path), "face location")?);
        info!(model_path = %config.model_path, "Face locator initialized");
        Ok(Self { session, config })
    }
}

impl FaceLocator for UltraFaceLocator {
    fn locate(&self, crop: &RgbImage) -> VisionResult<Vec<BoundingBox>> {
        let input = nchw_tensor(
            crop,
            self.config.input_width,
            self.config.input_height,
            NORM_MEAN,
            NORM_STD,
        )?;
        let mut outputs = run_many(&self.session, input, &[Some("scores"), Some("boxes")])?;
        let boxes = outputs.pop().unwrap_or_default();
        let scores = outputs.pop().unwrap_or_default();

        decode_faces(
            &scores,
            &boxes,
            crop.width(),
            crop.height(),
            self.config.confidence_threshold,
            self.config.nms_threshold,
        )
    }
}

/// Decode `scores [1, N, 2]` and normalized corner `boxes [1, N, 4]`.
fn decode_faces(
    scores: &[f32],
    boxes: &[f32],
    width: u32,
    height: u32,
    threshold: f32,
    nms_threshold: f32,
) -> VisionResult<Vec<BoundingBox>> {
    if scores.len() % 2 != 0 || boxes.len() % 4 != 0 || scores.len() / 2 != boxes.len() / 4 {
        return Err(VisionError::inference(format!(
            "Mismatched face outputs: {} scores, {} box values",
            scores.len(),
            boxes.len()
        )));
    }

    let (w, h) = (width as f32, height as f32);
    let candidates: Vec<PersonDetection> = scores
        .chunks_exact(2)
        .zip(boxes.chunks_exact(4))
        .filter(|(s, _)| s[1] >= threshold)
        .map(|(s, b)| {
            let bbox = BoundingBox::new(b[0] * w, b[1] * h, b[2] * w, b[3] * h).clamp(width, height);
            PersonDetection::new(bbox, s[1])
        })
        .filter(|d| d.bbox.is_valid())
        .collect();

    Ok(non_maximum_suppression(candidates, nms_threshold)
        .into_iter()
        .map(|d| d.bbox)
        .collect())
}
