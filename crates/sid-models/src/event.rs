//! Detection events.

use chrono::{DateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::DetectionRecord;

/// Base used for image URLs handed out before storage has confirmed an upload.
pub const DEFAULT_PLACEHOLDER_BASE_URL: &str = "https://placeholder.example.com";

/// ISO-8601 rendering used everywhere an event timestamp becomes text
/// (JSON, blob keys, placeholder URLs).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Deterministic stand-in URL for an event's annotated frame.
///
/// This is a sentinel meaning "not yet confirmed", never proof of storage.
pub fn placeholder_image_url(base: &str, timestamp: &DateTime<Utc>) -> String {
    format!(
        "{}/detection_{}.jpg",
        base.trim_end_matches('/'),
        format_timestamp(timestamp)
    )
}

mod iso_timestamp {
    use super::format_timestamp;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// The outcome of processing one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionEvent {
    pub user_id: String,
    /// Generated once per request
    #[serde(with = "iso_timestamp")]
    #[schemars(with = "String")]
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<DetectionRecord>,
    /// `None` until persistence has produced a durable URL
    pub image_url: Option<String>,
    pub alert: bool,
}

impl DetectionEvent {
    /// Build an event; `alert` is derived from the records.
    pub fn new(
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        detections: Vec<DetectionRecord>,
    ) -> Self {
        let alert = detections.iter().any(|d| d.alert);
        Self {
            user_id: user_id.into(),
            timestamp,
            detections,
            image_url: None,
            alert,
        }
    }

    pub fn has_detections(&self) -> bool {
        !self.detections.is_empty()
    }

    pub fn timestamp_string(&self) -> String {
        format_timestamp(&self.timestamp)
    }

    /// Blob key for the annotated frame.
    pub fn image_key(&self) -> String {
        format!("detections/{}/{}.jpg", self.user_id, self.timestamp_string())
    }

    pub fn with_image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

/// An event as read back from the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoredEvent {
    pub event_id: String,
    pub user_id: String,
    pub timestamp: String,
    pub detections: Vec<DetectionRecord>,
    pub image_url: Option<String>,
    pub alert: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}
