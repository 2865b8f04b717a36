//! Event history handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use sid_firestore::EventQuery;
use sid_models::StoredEvent;

use super::{require_records, validate_id};
use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const MAX_EVENTS_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub limit: Option<i64>,
    pub alert_only: Option<bool>,
}

impl EventsParams {
    fn into_query(self) -> ApiResult<EventQuery> {
        let defaults = EventQuery::default();
        let limit = match self.limit {
            None => defaults.limit,
            Some(n) if (1..=MAX_EVENTS_LIMIT).contains(&n) => n as u32,
            Some(_) => {
                return Err(ApiError::bad_request(format!(
                    "limit must be between 1 and {}",
                    MAX_EVENTS_LIMIT
                )))
            }
        };
        Ok(EventQuery {
            limit,
            alert_only: self.alert_only.unwrap_or(defaults.alert_only),
        })
    }
}

/// GET /api/events
pub async fn list_events(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<EventsParams>,
) -> ApiResult<Json<Vec<StoredEvent>>> {
    let query = params.into_query()?;
    let records = require_records(&state)?;
    Ok(Json(records.query_events(&user.uid, query).await?))
}

/// GET /api/events/:event_id
pub async fn get_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> ApiResult<Json<StoredEvent>> {
    let event_id = validate_id(&event_id, "event")?;
    let records = require_records(&state)?;
    records
        .get_event(&user.uid, event_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Event not found"))
}
