//! ONNX Runtime session setup and tensor helpers shared by the model adapters.

use std::path::Path;

use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::error::{VisionError, VisionResult};

/// Create an ONNX Runtime session with automatic execution provider selection.
///
/// Returns [`VisionError::ModelNotFound`] when the file is missing.
pub fn create_session(model_path: &Path, purpose: &str) -> VisionResult<Session> {
    if !model_path.exists() {
        return Err(VisionError::model_not_found(model_path.display().to_string()));
    }

    let model_bytes = std::fs::read(model_path)?;

    let mut builder = Session::builder()
        .map_err(|e| VisionError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(mut cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!(purpose, "Using CUDA execution provider");
                return Ok(session);
            }
        }
        debug!(purpose, "CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(mut coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!(purpose, "Using CoreML execution provider");
                return Ok(session);
            }
        }
        debug!(purpose, "CoreML execution provider not available, using CPU");
    }

    info!(purpose, model_path = %model_path.display(), "Using CPU execution provider");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| VisionError::internal(format!("Failed to load ONNX model: {}", e)))
}

/// Resize to `width` x `height` and lay out as NCHW `[1, 3, H, W]` with
/// `(px - mean) / std` normalization.
pub fn nchw_tensor(
    img: &RgbImage,
    width: u32,
    height: u32,
    mean: f32,
    std: f32,
) -> VisionResult<Value> {
    let data = nchw_data(img, width, height, mean, std);
    let shape = vec![1usize, 3, height as usize, width as usize];
    Tensor::from_array((shape, data.into_boxed_slice()))
        .map(Value::from)
        .map_err(|e| VisionError::internal(format!("Failed to create tensor: {}", e)))
}

pub(crate) fn nchw_data(img: &RgbImage, width: u32, height: u32, mean: f32, std: f32) -> Vec<f32> {
    let resized = if img.dimensions() == (width, height) {
        img.clone()
    } else {
        image::imageops::resize(img, width, height, image::imageops::FilterType::Triangle)
    };

    let (w, h) = (width as usize, height as usize);
    let mut chw: Vec<f32> = Vec::with_capacity(3 * h * w);
    for c in 0..3 {
        for y in 0..h {
            for x in 0..w {
                let pixel = resized.get_pixel(x as u32, y as u32);
                chw.push((pixel[c] as f32 - mean) / std);
            }
        }
    }
    chw
}

/// Run a session and copy out a named f32 output tensor.
///
/// When `output` is `None` the session's first output is used.
pub fn run_single(
    session: &std::sync::Mutex<Session>,
    input: Value,
    output: Option<&str>,
) -> VisionResult<Vec<f32>> {
    let outputs = run_many(session, input, &[output])?;
    outputs
        .into_iter()
        .next()
        .ok_or_else(|| VisionError::inference("model produced no outputs"))
}

/// Run a session and copy out several f32 outputs by name, in order.
///
/// A `None` entry selects the output at the same position.
pub fn run_many(
    session: &std::sync::Mutex<Session>,
    input: Value,
    names: &[Option<&str>],
) -> VisionResult<Vec<Vec<f32>>> {
    let mut session = session
        .lock()
        .map_err(|_| VisionError::internal("Session lock poisoned"))?;

    let resolved: Vec<String> = names
        .iter()
        .enumerate()
        .map(|(i, name)| match name {
            Some(n) => Ok(n.to_string()),
            None => session
                .outputs()
                .get(i)
                .map(|o| o.name().to_string())
                .ok_or_else(|| VisionError::inference(format!("model has no output #{}", i))),
        })
        .collect::<VisionResult<_>>()?;

    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| VisionError::inference(format!("ONNX inference failed: {}", e)))?;

    resolved
        .iter()
        .map(|name| {
            let value = outputs
                .get(name.as_str())
                .ok_or_else(|| VisionError::inference(format!("Missing {} tensor", name)))?;
            let tensor = value
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::inference(format!("Failed to extract tensor: {}", e)))?;
            Ok(tensor.1.to_vec())
        })
        .collect()
}
