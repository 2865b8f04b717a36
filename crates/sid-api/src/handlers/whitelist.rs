//! Whitelist enrollment handlers.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use sid_vision::{decode_frame, FaceMatcher};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::security::sanitize_identity;
use crate::services::enroll_identity;
use crate::state::AppState;

/// Multipart field naming the identity; every other field with content is a sample.
const IDENTITY_FIELD: &str = "identity";

/// Upper bound on samples per enrollment.
pub const MAX_ENROLL_SAMPLES: usize = 20;

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub identity: String,
    pub samples_used: usize,
    pub samples_skipped: usize,
    pub persisted: bool,
}

#[derive(Debug, Serialize)]
pub struct WhitelistResponse {
    pub identities: Vec<String>,
}

fn require_matcher(state: &AppState) -> ApiResult<Arc<FaceMatcher>> {
    state
        .pipeline
        .matcher()
        .cloned()
        .ok_or_else(|| ApiError::service_unavailable("Face matcher not loaded"))
}

/// POST /api/whitelist
pub async fn enroll(
    State(state): State<AppState>,
    _user: AuthUser,
    mut multipart: Multipart,
) -> ApiResult<Json<EnrollResponse>> {
    let matcher = require_matcher(&state)?;

    let mut identity = None;
    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let is_identity = field.name() == Some(IDENTITY_FIELD);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read field: {}", e)))?;

        if is_identity {
            let raw = String::from_utf8_lossy(&bytes);
            identity = Some(
                sanitize_identity(&raw).ok_or_else(|| ApiError::bad_request("Invalid identity"))?,
            );
        } else if !bytes.is_empty() {
            if uploads.len() == MAX_ENROLL_SAMPLES {
                return Err(ApiError::bad_request(format!(
                    "At most {} samples per enrollment",
                    MAX_ENROLL_SAMPLES
                )));
            }
            uploads.push(bytes);
        }
    }

    let identity = identity.ok_or_else(|| ApiError::bad_request("Missing 'identity' field"))?;
    if uploads.is_empty() {
        return Err(ApiError::bad_request("At least one sample image is required"));
    }

    let samples = tokio::task::spawn_blocking(move || {
        uploads
            .iter()
            .enumerate()
            .map(|(i, bytes)| {
                decode_frame(bytes)
                    .map_err(|e| ApiError::bad_request(format!("Sample {} is not an image: {}", i, e)))
            })
            .collect::<ApiResult<Vec<_>>>()
    })
    .await??;

    let outcome = enroll_identity(matcher, state.records.clone(), identity, samples).await?;
    Ok(Json(EnrollResponse {
        identity: outcome.report.identity,
        samples_used: outcome.report.samples_used,
        samples_skipped: outcome.report.samples_skipped,
        persisted: outcome.persisted,
    }))
}

/// GET /api/whitelist
pub async fn list_whitelist(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<WhitelistResponse>> {
    let matcher = require_matcher(&state)?;
    Ok(Json(WhitelistResponse {
        identities: matcher.identities(),
    }))
}
