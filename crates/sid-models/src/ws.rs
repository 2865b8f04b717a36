//! WebSocket message types.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::event::DetectionEvent;

/// Envelope pushed to real-time subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    /// A processed frame with at least one detection
    Detection(DetectionEvent),
}

impl WsMessage {
    pub fn detection(event: DetectionEvent) -> Self {
        WsMessage::Detection(event)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
