//! Frame analysis for intrusion detection.
//!
//! This crate provides:
//! - Frame decode/encode helpers with size capping
//! - Low-light preprocessing (luminance CLAHE, gamma, denoise)
//! - Person detection and face location/embedding capabilities (ONNX Runtime)
//! - Whitelist face matching and enrollment
//! - The detection pipeline that ties them together and annotates frames

pub mod annotate;
pub mod config;
pub mod detection;
pub mod error;
pub mod face;
pub mod frame;
pub mod metrics;
pub mod onnx;
pub mod pipeline;
pub mod preprocess;

pub use annotate::annotate;
pub use config::{MatcherFailurePolicy, VisionConfig};
pub use detection::{PersonDetector, YoloPersonDetector};
pub use error::{VisionError, VisionResult};
pub use face::{is_reserved_identity, FaceEmbedder, FaceLocator, FaceMatcher};
pub use frame::{decode_frame, encode_evidence, encode_jpeg};
pub use pipeline::{DetectionPipeline, PipelineError, PipelineOutput, PipelineResult, PipelineSettings};
pub use preprocess::{FramePreprocessor, PreprocessConfig};
