//! Shared data models for the intrusion detection backend.
//!
//! This crate provides Serde-serializable types for:
//! - Bounding boxes and person detections
//! - Face match results and whitelist entries
//! - Detection records and events
//! - Regions of interest
//! - WebSocket message schemas

pub mod detection;
pub mod event;
pub mod geometry;
pub mod roi;
pub mod whitelist;
pub mod ws;

// Re-export common types
pub use detection::{DetectionRecord, MatchResult, PersonDetection, NO_FACE, PERSON_LABEL, UNKNOWN_IDENTITY};
pub use event::{
    format_timestamp, placeholder_image_url, DetectionEvent, StoredEvent,
    DEFAULT_PLACEHOLDER_BASE_URL,
};
pub use geometry::BoundingBox;
pub use roi::{RegionOfInterest, StoredRoi};
pub use whitelist::WhitelistEntry;
pub use ws::WsMessage;
