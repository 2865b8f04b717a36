//! Detection pipeline orchestration.
//!
//! One frame goes through: decode, enhance, detect, per-person face match,
//! alert decision and annotation of the original frame. Everything here is
//! synchronous and CPU-bound; async callers should run it on a blocking pool.
//!
//! Failure isolation:
//! - an undecodable frame or a missing person detector aborts the request
//! - a degenerate box is skipped
//! - a matcher failure only affects its own detection (unless the
//!   [`MatcherFailurePolicy::Abort`] policy is configured)

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;
use sid_models::{DetectionEvent, DetectionRecord, PersonDetection, RegionOfInterest};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::annotate::annotate;
use crate::config::{MatcherFailurePolicy, VisionConfig, DEFAULT_PERSON_CONFIDENCE};
use crate::detection::{PersonDetector, YoloPersonDetector, YoloPersonDetectorConfig};
use crate::error::VisionError;
use crate::face::{
    ArcFaceEmbedder, ArcFaceEmbedderConfig, FaceMatcher, UltraFaceLocator, UltraFaceLocatorConfig,
};
use crate::frame::{crop_box, decode_frame};
use crate::metrics;
use crate::preprocess::FramePreprocessor;

/// Result type for pipeline runs.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that abort a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Person detection failed: {0}")]
    Detector(#[source] VisionError),

    #[error("Face matching failed: {0}")]
    Matcher(#[source] VisionError),
}

/// Runtime knobs for the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub confidence_threshold: f32,
    pub matcher_failure_policy: MatcherFailurePolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_PERSON_CONFIDENCE,
            matcher_failure_policy: MatcherFailurePolicy::Degrade,
        }
    }
}

/// Wall-clock time spent per stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageTimings {
    pub decode_ms: f64,
    pub enhance_ms: f64,
    pub detect_ms: f64,
    pub match_ms: f64,
    pub annotate_ms: f64,
    pub total_ms: f64,
}

/// What one successful run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub event: DetectionEvent,
    /// Copy of the original frame with boxes and labels drawn
    pub annotated: RgbImage,
    pub timings: StageTimings,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Sequences preprocessing, detection, matching and annotation.
///
/// The person detector and face matcher are optional capabilities injected at
/// construction; both absent branches are handled explicitly.
pub struct DetectionPipeline {
    preprocessor: FramePreprocessor,
    detector: Option<Arc<dyn PersonDetector>>,
    matcher: Option<Arc<FaceMatcher>>,
    settings: PipelineSettings,
}

impl DetectionPipeline {
    pub fn new(
        preprocessor: FramePreprocessor,
        detector: Option<Arc<dyn PersonDetector>>,
        matcher: Option<Arc<FaceMatcher>>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            preprocessor,
            detector,
            matcher,
            settings,
        }
    }

    /// Load whichever models exist on disk. Missing or broken models leave
    /// their capability absent.
    pub fn from_config(config: &VisionConfig) -> Self {
        let detector: Option<Arc<dyn PersonDetector>> =
            match YoloPersonDetector::new(YoloPersonDetectorConfig {
                model_path: config.person_model_path.clone(),
                ..Default::default()
            }) {
                Ok(d) => Some(Arc::new(d)),
                Err(e) => {
                    warn!(error = %e, "Person detector unavailable, /detect will answer 503");
                    None
                }
            };

        let locator = UltraFaceLocator::new(UltraFaceLocatorConfig {
            model_path: config.face_detector_model_path.clone(),
            ..Default::default()
        });
        let embedder = ArcFaceEmbedder::new(ArcFaceEmbedderConfig {
            model_path: config.face_embedder_model_path.clone(),
        });
        let matcher = match (locator, embedder) {
            (Ok(l), Ok(e)) => Some(Arc::new(FaceMatcher::new(
                Arc::new(l),
                Arc::new(e),
                config.face_match_threshold,
            ))),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Face matcher unavailable, every person will be treated as unknown");
                None
            }
        };

        Self::new(
            FramePreprocessor::new(config.preprocess.clone()),
            detector,
            matcher,
            PipelineSettings {
                confidence_threshold: config.person_confidence_threshold,
                matcher_failure_policy: config.matcher_failure_policy,
            },
        )
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    pub fn matcher(&self) -> Option<&Arc<FaceMatcher>> {
        self.matcher.as_ref()
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings
    }

    /// Decode raw upload bytes and process them.
    pub fn process_bytes(
        &self,
        bytes: &[u8],
        user_id: &str,
        roi: Option<&RegionOfInterest>,
    ) -> PipelineResult<PipelineOutput> {
        let start = Instant::now();
        let frame = decode_frame(bytes).map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        let decode_ms = elapsed_ms(start);

        let mut output = self.process_at(&frame, user_id, roi, Utc::now())?;
        output.timings.decode_ms = decode_ms;
        output.timings.total_ms += decode_ms;
        Ok(output)
    }

    /// Process an already decoded frame, stamping the event with the current time.
    pub fn process(
        &self,
        frame: &RgbImage,
        user_id: &str,
        roi: Option<&RegionOfInterest>,
    ) -> PipelineResult<PipelineOutput> {
        self.process_at(frame, user_id, roi, Utc::now())
    }

    /// Process a decoded frame with an explicit event timestamp.
    pub fn process_at(
        &self,
        frame: &RgbImage,
        user_id: &str,
        roi: Option<&RegionOfInterest>,
        timestamp: DateTime<Utc>,
    ) -> PipelineResult<PipelineOutput> {
        let total = Instant::now();
        let mut timings = StageTimings::default();

        if frame.width() == 0 || frame.height() == 0 {
            metrics::record_frame("invalid", 0, 0);
            return Err(PipelineError::InvalidInput("image has zero area".to_string()));
        }

        let Some(detector) = self.detector.as_ref() else {
            metrics::record_frame("unavailable", 0, 0);
            return Err(PipelineError::ServiceUnavailable(
                "person detector not loaded".to_string(),
            ));
        };

        let stage = Instant::now();
        let enhanced = self.preprocessor.enhance(frame);
        timings.enhance_ms = elapsed_ms(stage);
        metrics::record_stage("enhance", timings.enhance_ms);

        let stage = Instant::now();
        let detections = detector
            .detect(&enhanced.image, self.settings.confidence_threshold)
            .map_err(|e| {
                metrics::record_frame("failed", 0, 0);
                PipelineError::Detector(e)
            })?;
        timings.detect_ms = elapsed_ms(stage);
        metrics::record_stage("detect", timings.detect_ms);

        let stage = Instant::now();
        let (orig_w, orig_h) = frame.dimensions();
        let (enh_w, enh_h) = enhanced.image.dimensions();
        let to_original = enhanced.to_original();

        let mut records = Vec::with_capacity(detections.len());
        for detection in &detections {
            if !detection.bbox.is_valid() {
                warn!(bbox = ?detection.bbox, "Skipping degenerate detection box");
                continue;
            }
            let working_box = detection.bbox.clamp(enh_w, enh_h);
            if !working_box.is_valid() {
                warn!(bbox = ?detection.bbox, "Skipping detection outside the frame");
                continue;
            }

            let original_box = working_box.scale(to_original).clamp(orig_w, orig_h);
            if !original_box.is_valid() {
                continue;
            }

            if let Some(roi) = roi {
                let (cx, cy) = original_box.center();
                if !roi.contains_point(cx, cy) {
                    debug!(roi = %roi.name, cx, cy, "Detection outside region of interest");
                    continue;
                }
            }

            let reported = PersonDetection::new(original_box, detection.confidence);
            let record = match self.matcher.as_ref() {
                None => DetectionRecord::unrecognized(&reported),
                Some(matcher) => match crop_box(&enhanced.image, &working_box) {
                    None => DetectionRecord::unrecognized(&reported),
                    Some(crop) => match matcher.match_crop(&crop) {
                        Ok(result) => DetectionRecord::from_match(&reported, &result),
                        Err(e) => match self.settings.matcher_failure_policy {
                            MatcherFailurePolicy::Degrade => {
                                warn!(error = %e, "Face matching failed, treating person as unknown");
                                metrics::record_degraded();
                                DetectionRecord::unrecognized(&reported)
                            }
                            MatcherFailurePolicy::Abort => {
                                metrics::record_frame("failed", 0, 0);
                                return Err(PipelineError::Matcher(e));
                            }
                        },
                    },
                },
            };
            records.push(record);
        }
        timings.match_ms = elapsed_ms(stage);
        metrics::record_stage("match", timings.match_ms);

        let event = DetectionEvent::new(user_id, timestamp, records);

        let stage = Instant::now();
        let annotated = annotate(frame, &event.detections);
        timings.annotate_ms = elapsed_ms(stage);
        metrics::record_stage("annotate", timings.annotate_ms);

        timings.total_ms = elapsed_ms(total);

        let alerts = event.detections.iter().filter(|d| d.alert).count();
        metrics::record_frame("ok", event.detections.len(), alerts);

        info!(
            user_id,
            persons = event.detections.len(),
            alerts,
            alert = event.alert,
            low_light = enhanced.enhanced,
            enhance_ms = timings.enhance_ms,
            detect_ms = timings.detect_ms,
            match_ms = timings.match_ms,
            annotate_ms = timings.annotate_ms,
            total_ms = timings.total_ms,
            "Frame processed"
        );

        Ok(PipelineOutput {
            event,
            annotated,
            timings,
        })
    }
}
