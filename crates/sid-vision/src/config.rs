//! Vision configuration.

use std::fmt;
use std::str::FromStr;

use crate::face::DEFAULT_MATCH_THRESHOLD;
use crate::preprocess::PreprocessConfig;

/// Default person confidence threshold.
pub const DEFAULT_PERSON_CONFIDENCE: f32 = 0.5;

/// What to do when face matching fails for one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatcherFailurePolicy {
    /// Log, treat the person as unknown (alert) and keep going
    #[default]
    Degrade,
    /// Fail the whole request
    Abort,
}

impl MatcherFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatcherFailurePolicy::Degrade => "degrade",
            MatcherFailurePolicy::Abort => "abort",
        }
    }
}

impl fmt::Display for MatcherFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatcherFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degrade" => Ok(MatcherFailurePolicy::Degrade),
            "abort" => Ok(MatcherFailurePolicy::Abort),
            other => Err(format!("unknown matcher failure policy '{}'", other)),
        }
    }
}

/// Model paths, thresholds and preprocessing settings.
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// YOLOv8 person detection model
    pub person_model_path: String,
    /// Face locator model
    pub face_detector_model_path: String,
    /// Face embedding model
    pub face_embedder_model_path: String,
    /// Minimum person confidence
    pub person_confidence_threshold: f32,
    /// Minimum similarity for a known face
    pub face_match_threshold: f32,
    pub matcher_failure_policy: MatcherFailurePolicy,
    /// Directory of `<identity>/<sample>.jpg` used to seed the whitelist
    pub whitelist_dataset_dir: Option<String>,
    pub preprocess: PreprocessConfig,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            person_model_path: "models/yolov8n.onnx".to_string(),
            face_detector_model_path: "models/version-RFB-320.onnx".to_string(),
            face_embedder_model_path: "models/arcface.onnx".to_string(),
            person_confidence_threshold: DEFAULT_PERSON_CONFIDENCE,
            face_match_threshold: DEFAULT_MATCH_THRESHOLD,
            matcher_failure_policy: MatcherFailurePolicy::Degrade,
            whitelist_dataset_dir: None,
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl VisionConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            person_model_path: std::env::var("PERSON_MODEL_PATH")
                .unwrap_or(defaults.person_model_path),
            face_detector_model_path: std::env::var("FACE_DETECTOR_MODEL_PATH")
                .unwrap_or(defaults.face_detector_model_path),
            face_embedder_model_path: std::env::var("FACE_EMBEDDER_MODEL_PATH")
                .unwrap_or(defaults.face_embedder_model_path),
            person_confidence_threshold: std::env::var("PERSON_CONFIDENCE_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PERSON_CONFIDENCE),
            face_match_threshold: std::env::var("FACE_MATCH_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            matcher_failure_policy: std::env::var("MATCHER_FAILURE_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            whitelist_dataset_dir: std::env::var("WHITELIST_DATASET_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            preprocess: PreprocessConfig {
                max_dimension: std::env::var("FRAME_MAX_DIMENSION")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.preprocess.max_dimension),
                low_light_threshold: std::env::var("LOW_LIGHT_THRESHOLD")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.preprocess.low_light_threshold),
                ..defaults.preprocess
            },
        }
    }
}
