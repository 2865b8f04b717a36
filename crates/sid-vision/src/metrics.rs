//! Pipeline metrics.
//!
//! Provides standardized metrics for monitoring frame processing:
//! - Frames processed by outcome
//! - Persons detected and alerts raised
//! - Per-stage latency histograms
//! - Degraded (matcher failure) detections

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Frames processed by outcome.
    pub const FRAMES_TOTAL: &str = "pipeline_frames_total";

    /// Persons detected across all frames.
    pub const PERSONS_TOTAL: &str = "pipeline_persons_total";

    /// Detections that raised an alert.
    pub const ALERTS_TOTAL: &str = "pipeline_alerts_total";

    /// Detections downgraded to unknown after a matcher failure.
    pub const DEGRADED_TOTAL: &str = "pipeline_degraded_matches_total";

    /// Stage latency in seconds by stage.
    pub const STAGE_SECONDS: &str = "pipeline_stage_seconds";
}

/// Record a finished frame.
pub fn record_frame(outcome: &'static str, persons: usize, alerts: usize) {
    counter!(names::FRAMES_TOTAL, "outcome" => outcome).increment(1);
    counter!(names::PERSONS_TOTAL).increment(persons as u64);
    counter!(names::ALERTS_TOTAL).increment(alerts as u64);
}

/// Record the latency of one pipeline stage.
pub fn record_stage(stage: &'static str, duration_ms: f64) {
    histogram!(names::STAGE_SECONDS, "stage" => stage).record(duration_ms / 1000.0);
}

/// Record a matcher failure that was absorbed.
pub fn record_degraded() {
    counter!(names::DEGRADED_TOTAL).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::FRAMES_TOTAL.starts_with("pipeline_"));
        assert!(names::STAGE_SECONDS.contains("seconds"));
    }
}
