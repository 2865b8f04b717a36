//! Per-person detection and face match types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;

/// Label attached to every detection record.
pub const PERSON_LABEL: &str = "person";

/// Identity reported when a face was found but matched nobody, or when
/// recognition could not run.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Identity reported when no face was found in the person crop.
pub const NO_FACE: &str = "no_face";

/// A person found by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PersonDetection {
    pub bbox: BoundingBox,
    /// Detector confidence in `[0, 1]`
    pub confidence: f32,
}

impl PersonDetection {
    pub fn new(bbox: BoundingBox, confidence: f32) -> Self {
        Self { bbox, confidence }
    }
}

/// Outcome of matching one face against the whitelist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MatchResult {
    pub identity: String,
    pub is_known: bool,
    /// Cosine similarity of the best candidate in `[-1, 1]`
    pub similarity: f32,
}

impl MatchResult {
    pub fn known(identity: impl Into<String>, similarity: f32) -> Self {
        Self {
            identity: identity.into(),
            is_known: true,
            similarity,
        }
    }

    pub fn unknown(similarity: f32) -> Self {
        Self {
            identity: UNKNOWN_IDENTITY.to_string(),
            is_known: false,
            similarity,
        }
    }

    pub fn no_face() -> Self {
        Self {
            identity: NO_FACE.to_string(),
            is_known: false,
            similarity: 0.0,
        }
    }
}

/// One row of a detection response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionRecord {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub face_id: String,
    pub alert: bool,
}

impl DetectionRecord {
    /// Build a record from a detection and its match. The record alerts
    /// whenever the face is not a known identity.
    pub fn from_match(detection: &PersonDetection, matched: &MatchResult) -> Self {
        Self {
            label: PERSON_LABEL.to_string(),
            confidence: detection.confidence,
            bbox: detection.bbox,
            face_id: matched.identity.clone(),
            alert: !matched.is_known,
        }
    }

    /// Record for a person that could not be recognized at all.
    pub fn unrecognized(detection: &PersonDetection) -> Self {
        Self::from_match(detection, &MatchResult::unknown(0.0))
    }

    /// Text drawn next to the box on annotated frames.
    pub fn annotation_label(&self) -> String {
        format!("{} ({:.2})", self.face_id, self.confidence)
    }
}
