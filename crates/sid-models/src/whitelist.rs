//! Whitelist entries.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A known identity and its reference embedding (unit length).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WhitelistEntry {
    pub identity: String,
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WhitelistEntry {
    pub fn new(identity: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            identity: identity.into(),
            embedding,
            created_at: None,
        }
    }
}
