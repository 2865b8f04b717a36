//! Person detection using a YOLOv8 ONNX model.
//!
//! Provides person-only detection with GPU acceleration support:
//! - CUDA on Linux with NVIDIA GPU
//! - CoreML on macOS with Apple Silicon
//! - CPU fallback on all platforms

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array;
use ort::session::Session;
use sid_models::{BoundingBox, PersonDetection};
use tracing::{debug, info};

use super::{non_maximum_suppression, PersonDetector};
use crate::error::{VisionError, VisionResult};
use crate::onnx::{create_session, nchw_tensor, run_single};

/// COCO class id for "person".
const PERSON_CLASS: usize = 0;
const NUM_CLASSES: usize = 80;
const NUM_FEATURES: usize = 4 + NUM_CLASSES;

/// Configuration for the YOLOv8 person detector.
#[derive(Debug, Clone)]
pub struct YoloPersonDetectorConfig {
    /// Path to ONNX model file
    pub model_path: String,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
    /// Name of the output tensor
    pub output_name: String,
}

impl Default for YoloPersonDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            nms_threshold: 0.45,
            input_size: 640,
            output_name: "output0".to_string(),
        }
    }
}

/// Person detector using a YOLOv8 ONNX model.
pub struct YoloPersonDetector {
    session: Mutex<Session>,
    config: YoloPersonDetectorConfig,
}

impl YoloPersonDetector {
    /// Load the model named in `config`.
    ///
    /// Returns error if the model file doesn't exist or cannot be loaded.
    pub fn new(config: YoloPersonDetectorConfig) -> VisionResult<Self> {
        let session = Mutex::new(create_session(Path::new(&config.model_path), "person detection")?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            "Person detector initialized"
        );
        Ok(Self { session, config })
    }

    pub fn config(&self) -> &YoloPersonDetectorConfig {
        &self.config
    }
}

impl PersonDetector for YoloPersonDetector {
    fn detect(&self, frame: &RgbImage, threshold: f32) -> VisionResult<Vec<PersonDetection>> {
        let size = self.config.input_size;
        let input = nchw_tensor(frame, size, size, 0.0, 255.0)?;
        let raw = run_single(&self.session, input, Some(&self.config.output_name))?;

        let detections = decode_output(
            &raw,
            size,
            frame.width(),
            frame.height(),
            threshold,
            self.config.nms_threshold,
        )?;

        debug!(count = detections.len(), "Person detection completed");
        Ok(detections)
    }
}

/// Decode a YOLOv8 `[1, 84, N]` output into person boxes in frame pixels.
///
/// - 84 = 4 (bbox: cx, cy, w, h in model input pixels) + 80 class scores
/// - only the person class is considered
fn decode_output(
    outputs: &[f32],
    input_size: u32,
    frame_width: u32,
    frame_height: u32,
    threshold: f32,
    nms_threshold: f32,
) -> VisionResult<Vec<PersonDetection>> {
    if outputs.is_empty() || outputs.len() % NUM_FEATURES != 0 {
        return Err(VisionError::inference(format!(
            "Unexpected output size {} (not a multiple of {})",
            outputs.len(),
            NUM_FEATURES
        )));
    }
    let num_boxes = outputs.len() / NUM_FEATURES;

    // [84, N] -> view as [N, 84]
    let output_array = Array::from_shape_vec((NUM_FEATURES, num_boxes), outputs.to_vec())
        .map_err(|e| VisionError::inference(format!("Failed to reshape output: {}", e)))?;
    let transposed = output_array.t();

    let scale_w = frame_width as f32 / input_size as f32;
    let scale_h = frame_height as f32 / input_size as f32;

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let score = transposed[[i, 4 + PERSON_CLASS]];
        if score.is_nan() || score < threshold {
            continue;
        }

        let cx = transposed[[i, 0]];
        let cy = transposed[[i, 1]];
        let w = transposed[[i, 2]];
        let h = transposed[[i, 3]];

        let bbox = BoundingBox::new(
            (cx - w / 2.0) * scale_w,
            (cy - h / 2.0) * scale_h,
            (cx + w / 2.0) * scale_w,
            (cy + h / 2.0) * scale_h,
        )
        .clamp(frame_width, frame_height);

        candidates.push(PersonDetection::new(bbox, score.clamp(0.0, 1.0)));
    }

    Ok(non_maximum_suppression(candidates, nms_threshold))
}
