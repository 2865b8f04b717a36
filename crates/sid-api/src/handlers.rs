//! Request handlers.

pub mod detect;
pub mod events;
pub mod health;
pub mod roi;
pub mod whitelist;

pub use detect::*;
pub use events::*;
pub use health::*;
pub use roi::*;
pub use whitelist::*;

use std::sync::Arc;

use sid_firestore::RecordStore;

use crate::error::{ApiError, ApiResult};
use crate::security::is_valid_id;
use crate::state::AppState;

/// The configured record store, or 503.
fn require_records(state: &AppState) -> ApiResult<Arc<dyn RecordStore>> {
    state
        .records
        .clone()
        .ok_or_else(|| ApiError::service_unavailable("Record store not configured"))
}

fn validate_id<'a>(id: &'a str, kind: &str) -> ApiResult<&'a str> {
    if is_valid_id(id) {
        Ok(id)
    } else {
        Err(ApiError::bad_request(format!("Invalid {} id", kind)))
    }
}
