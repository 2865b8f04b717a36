//! Region of interest handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use sid_models::{RegionOfInterest, StoredRoi};
use tracing::info;
use validator::Validate;

use super::{require_records, validate_id};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DeleteRoiResponse {
    pub status: &'static str,
    pub roi_id: String,
}

/// POST /api/roi
pub async fn create_roi(
    State(state): State<AppState>,
    user: AuthUser,
    Json(roi): Json<RegionOfInterest>,
) -> ApiResult<Json<StoredRoi>> {
    roi.validate()?;
    let records = require_records(&state)?;
    let stored = records.put_roi(&user.uid, &roi).await?;
    info!(user_id = %user.uid, roi_id = %stored.roi_id, name = %roi.name, "ROI created");
    Ok(Json(stored))
}

/// GET /api/roi
pub async fn list_rois(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Vec<StoredRoi>>> {
    let records = require_records(&state)?;
    Ok(Json(records.list_rois(&user.uid).await?))
}

/// DELETE /api/roi/:roi_id
pub async fn delete_roi(
    State(state): State<AppState>,
    user: AuthUser,
    Path(roi_id): Path<String>,
) -> ApiResult<Json<DeleteRoiResponse>> {
    validate_id(&roi_id, "ROI")?;
    let records = require_records(&state)?;
    if !records.delete_roi(&user.uid, &roi_id).await? {
        return Err(ApiError::not_found("ROI not found"));
    }
    info!(user_id = %user.uid, roi_id = %roi_id, "ROI deleted");
    Ok(Json(DeleteRoiResponse {
        status: "success",
        roi_id,
    }))
}
