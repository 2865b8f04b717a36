//! Repository for persisted detection events (`events` collection).

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use sid_models::{BoundingBox, DetectionEvent, DetectionRecord, StoredEvent};

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_parse_failure;
use crate::types::{Document, FromFirestoreValue, StructuredQuery, ToFirestoreValue, Value};

pub const EVENTS_COLLECTION: &str = "events";

/// Filters for listing a user's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    pub limit: u32,
    pub alert_only: bool,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            alert_only: false,
        }
    }
}

#[derive(Clone)]
pub struct EventRepository {
    client: FirestoreClient,
}

impl EventRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Store an event under a fresh id and return the id.
    pub async fn create(&self, event: &DetectionEvent) -> FirestoreResult<String> {
        let event_id = Uuid::new_v4().simple().to_string();
        self.client
            .create_document(EVENTS_COLLECTION, &event_id, event_to_fields(event))
            .await?;
        info!(
            event_id = %event_id,
            user_id = %event.user_id,
            detections = event.detections.len(),
            alert = event.alert,
            "Stored detection event"
        );
        Ok(event_id)
    }

    /// Newest-first events owned by `user_id`.
    pub async fn list(&self, user_id: &str, query: EventQuery) -> FirestoreResult<Vec<StoredEvent>> {
        let mut structured = StructuredQuery::collection(EVENTS_COLLECTION)
            .where_eq("user_id", user_id.to_firestore_value());
        if query.alert_only {
            structured = structured.where_eq("alert", true.to_firestore_value());
        }
        let structured = structured.order_by_desc("created_at").limit(query.limit);

        let docs = self
            .client
            .with_retry("list_events", || self.client.run_query(structured.clone()))
            .await?;

        Ok(docs
            .iter()
            .filter_map(|doc| match document_to_event(doc) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(doc = ?doc.name, error = %e, "Skipping unreadable event document");
                    record_parse_failure(EVENTS_COLLECTION);
                    None
                }
            })
            .collect())
    }

    /// Fetch one event; `None` when missing or owned by someone else.
    pub async fn get(&self, user_id: &str, event_id: &str) -> FirestoreResult<Option<StoredEvent>> {
        let doc = self
            .client
            .with_retry("get_event", || self.client.get_document(EVENTS_COLLECTION, event_id))
            .await?;
        match doc {
            Some(doc) => {
                let event = document_to_event(&doc)?;
                Ok((event.user_id == user_id).then_some(event))
            }
            None => Ok(None),
        }
    }
}

fn event_to_fields(event: &DetectionEvent) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), event.user_id.to_firestore_value());
    fields.insert("timestamp".to_string(), event.timestamp_string().to_firestore_value());
    let detections: Vec<Value> = event.detections.iter().map(record_to_value).collect();
    fields.insert("detections".to_string(), detections.to_firestore_value());
    fields.insert("image_url".to_string(), event.image_url.to_firestore_value());
    fields.insert("alert".to_string(), event.alert.to_firestore_value());
    fields.insert("created_at".to_string(), Utc::now().to_firestore_value());
    fields
}

fn record_to_value(record: &DetectionRecord) -> Value {
    let mut fields = HashMap::new();
    fields.insert("label".to_string(), record.label.to_firestore_value());
    fields.insert("confidence".to_string(), record.confidence.to_firestore_value());
    fields.insert("bbox".to_string(), record.bbox.to_array().to_firestore_value());
    fields.insert("face_id".to_string(), record.face_id.to_firestore_value());
    fields.insert("alert".to_string(), record.alert.to_firestore_value());
    Value::map(fields)
}

fn value_to_record(value: &Value) -> Option<DetectionRecord> {
    let fields = value.as_map()?;
    let get = |name: &str| fields.get(name);

    let bbox = Vec::<f32>::from_firestore_value(get("bbox")?)?;
    let [x1, y1, x2, y2] = <[f32; 4]>::try_from(bbox).ok()?;

    Some(DetectionRecord {
        label: String::from_firestore_value(get("label")?)?,
        confidence: f32::from_firestore_value(get("confidence")?)?,
        bbox: BoundingBox::new(x1, y1, x2, y2),
        face_id: String::from_firestore_value(get("face_id")?)?,
        alert: bool::from_firestore_value(get("alert")?)?,
    })
}

pub(crate) fn document_to_event(doc: &Document) -> FirestoreResult<StoredEvent> {
    let event_id = doc
        .id()
        .ok_or_else(|| FirestoreError::invalid_document("event document has no name"))?
        .to_string();
    let missing = |field: &str| FirestoreError::invalid_document(format!("event {event_id}: missing {field}"));

    let detections = doc
        .raw("detections")
        .and_then(Value::as_array)
        .unwrap_or(&[])
        .iter()
        .map(|v| value_to_record(v).ok_or_else(|| missing("detection fields")))
        .collect::<FirestoreResult<Vec<_>>>()?;

    Ok(StoredEvent {
        user_id: doc.get("user_id").ok_or_else(|| missing("user_id"))?,
        timestamp: doc.get("timestamp").ok_or_else(|| missing("timestamp"))?,
        alert: doc.get("alert").ok_or_else(|| missing("alert"))?,
        image_url: doc.get("image_url"),
        created_at: doc.get("created_at"),
        detections,
        event_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sid_models::{MatchResult, PersonDetection};

    fn sample_event() -> DetectionEvent {
        let person = PersonDetection::new(BoundingBox::new(10.0, 20.0, 110.0, 220.0), 0.9);
        DetectionEvent::new(
            "user-1",
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            vec![
                DetectionRecord::from_match(&person, &MatchResult::known("alice", 0.8)),
                DetectionRecord::from_match(&person, &MatchResult::unknown(0.2)),
            ],
        )
        .with_image_url("https://cdn.example.com/a.jpg")
    }

    #[test]
    fn test_event_fields_read_back() {
        let event = sample_event();
        let doc = Document {
            name: Some("projects/p/databases/d/documents/events/ev1".to_string()),
            ..Document::new(event_to_fields(&event))
        };

        let stored = document_to_event(&doc).unwrap();
        assert_eq!(stored.event_id, "ev1");
        assert_eq!(stored.user_id, "user-1");
        assert_eq!(stored.timestamp, event.timestamp_string());
        assert_eq!(stored.detections, event.detections);
        assert_eq!(stored.image_url.as_deref(), Some("https://cdn.example.com/a.jpg"));
        assert!(stored.alert);
        assert!(stored.created_at.is_some());
    }

    #[test]
    fn test_null_image_url_reads_as_none() {
        let mut event = sample_event();
        event.image_url = None;
        let doc = Document {
            name: Some("x/events/ev2".to_string()),
            ..Document::new(event_to_fields(&event))
        };
        assert!(document_to_event(&doc).unwrap().image_url.is_none());
    }

    #[test]
    fn test_malformed_bbox_is_rejected() {
        let event = sample_event();
        let mut fields = event_to_fields(&event);
        let mut record = HashMap::new();
        record.insert("label".to_string(), "person".to_firestore_value());
        record.insert("confidence".to_string(), 0.5f32.to_firestore_value());
        record.insert("bbox".to_string(), vec![1.0f32, 2.0].to_firestore_value());
        record.insert("face_id".to_string(), "unknown".to_firestore_value());
        record.insert("alert".to_string(), true.to_firestore_value());
        fields.insert("detections".to_string(), vec![Value::map(record)].to_firestore_value());

        let doc = Document {
            name: Some("x/events/bad".to_string()),
            ..Document::new(fields)
        };
        assert!(matches!(document_to_event(&doc), Err(FirestoreError::InvalidDocument(_))));
    }
}
