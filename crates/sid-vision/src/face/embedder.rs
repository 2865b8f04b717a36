//! ArcFace embedding using ONNX Runtime.

use std::path::Path;
use std::sync::Mutex;

use image::RgbImage;
use ort::session::Session;
use tracing::info;

use super::FaceEmbedder;
use crate::error::VisionResult;
use crate::onnx::{create_session, nchw_tensor, run_single};

const INPUT_SIZE: u32 = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

/// Configuration for the face embedder.
#[derive(Debug, Clone)]
pub struct ArcFaceEmbedderConfig {
    pub model_path: String,
}

impl Default for ArcFaceEmbedderConfig {
    fn default() -> Self {
        Self {
            model_path: "models/arcface.onnx".to_string(),
        }
    }
}

/// 112x112 ArcFace-style embedder. Output is the model's first tensor.
pub struct ArcFaceEmbedder {
    session: Mutex<Session>,
}

impl ArcFaceEmbedder {
    pub fn new(config: ArcFaceEmbedderConfig) -> VisionResult<Self> {
        let session = Mutex::new(create_session(Path::new(&config.model_path), "face embedding")?);
        info!(model_path = %config.model_path, "Face embedder initialized");
        Ok(Self { session })
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn embed(&self, face: &RgbImage) -> VisionResult<Vec<f32>> {
        let input = nchw_tensor(face, INPUT_SIZE, INPUT_SIZE, NORM_MEAN, NORM_STD)?;
        run_single(&self.session, input, None)
    }
}
