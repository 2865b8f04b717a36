//! Health check handlers.

use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Service status returned at `/`.
#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub models: ModelStatus,
}

/// Which optional capabilities are loaded.
#[derive(Serialize)]
pub struct ModelStatus {
    pub detector: bool,
    pub matcher: bool,
    /// Evidence upload plus event records
    pub storage: bool,
}

pub async fn root_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "online",
        service: "Smart Intrusion Detection Backend",
        version: env!("CARGO_PKG_VERSION"),
        models: ModelStatus {
            detector: state.pipeline.has_detector(),
            matcher: state.pipeline.matcher().is_some(),
            storage: state.persistence.is_enabled(),
        },
    })
}

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub detector: CheckStatus,
    pub record_store: CheckStatus,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl CheckStatus {
    fn ok(latency_ms: Option<u64>) -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
            latency_ms,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
            latency_ms: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Readiness check endpoint (readiness probe).
/// Requires a loaded person detector and a reachable record store.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let detector = if state.pipeline.has_detector() {
        CheckStatus::ok(None)
    } else {
        CheckStatus::error("person detector not loaded")
    };

    let record_store = match state.records.as_ref() {
        Some(records) => {
            let start = Instant::now();
            match records.check().await {
                Ok(()) => CheckStatus::ok(Some(start.elapsed().as_millis() as u64)),
                Err(e) => CheckStatus::error(e.to_string()),
            }
        }
        None => CheckStatus::error("not configured"),
    };

    let all_ok = detector.is_ok() && record_store.is_ok();
    let response = ReadinessResponse {
        status: if all_ok { "ready" } else { "degraded" }.to_string(),
        checks: ReadinessChecks {
            detector,
            record_store,
        },
    };

    if all_ok {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
