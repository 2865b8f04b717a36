//! Frame detection handler.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use sid_models::{placeholder_image_url, DetectionRecord, RegionOfInterest};
use tracing::info;

use super::{require_records, validate_id};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

/// Multipart field carrying the frame.
const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct DetectParams {
    /// Restrict detections to a stored region
    pub roi_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub detections: Vec<DetectionRecord>,
    /// Placeholder until the background commit confirms an upload
    pub image_url: String,
    pub timestamp: String,
    pub alert: bool,
}

/// Read the `file` field of a multipart body.
async fn read_frame(multipart: &mut Multipart) -> ApiResult<Vec<u8>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() == Some(FILE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
            if bytes.is_empty() {
                return Err(ApiError::bad_request("Uploaded file is empty"));
            }
            return Ok(bytes.to_vec());
        }
    }
    Err(ApiError::bad_request("Missing 'file' field"))
}

async fn load_roi(state: &AppState, user_id: &str, roi_id: &str) -> ApiResult<RegionOfInterest> {
    let roi_id = validate_id(roi_id, "ROI")?;
    let records = require_records(state)?;
    records
        .get_roi(user_id, roi_id)
        .await?
        .map(|stored| stored.roi)
        .ok_or_else(|| ApiError::not_found("ROI not found"))
}

/// POST /api/detect
///
/// Runs the pipeline on the uploaded frame and answers immediately. Evidence
/// upload and the event record are committed in the background, and the
/// event is announced to real-time subscribers without delaying the response.
pub async fn detect(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<DetectParams>,
    mut multipart: Multipart,
) -> ApiResult<Json<DetectResponse>> {
    let bytes = read_frame(&mut multipart).await?;

    let roi = match params.roi_id.as_deref() {
        Some(roi_id) => Some(load_roi(&state, &user.uid, roi_id).await?),
        None => None,
    };

    let pipeline = state.pipeline.clone();
    let user_id = user.uid.clone();
    let result =
        tokio::task::spawn_blocking(move || pipeline.process_bytes(&bytes, &user_id, roi.as_ref()))
            .await?;

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            let err = ApiError::from(e);
            metrics::record_detect_request(match err {
                ApiError::BadRequest(_) => "invalid",
                ApiError::ServiceUnavailable(_) => "unavailable",
                _ => "error",
            });
            return Err(err);
        }
    };

    let event = output.event;
    let alerts = event.detections.iter().filter(|d| d.alert).count();
    metrics::record_detect_request("ok");
    metrics::record_detections(event.detections.len(), alerts, output.timings.total_ms / 1000.0);
    info!(
        user_id = %event.user_id,
        detections = event.detections.len(),
        alerts,
        alert = event.alert,
        duration_ms = output.timings.total_ms,
        "Frame processed"
    );

    let placeholder = placeholder_image_url(&state.config.placeholder_base_url, &event.timestamp);
    let response = DetectResponse {
        detections: event.detections.clone(),
        image_url: placeholder.clone(),
        timestamp: event.timestamp_string(),
        alert: event.alert,
    };

    if event.has_detections() {
        state.persistence.submit(event.clone(), output.annotated);
        state.announcer.submit(event.with_image_url(placeholder));
    }

    Ok(Json(response))
}
