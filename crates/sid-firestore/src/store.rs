//! The record-store seam the API depends on.

use async_trait::async_trait;

use sid_models::{DetectionEvent, RegionOfInterest, StoredEvent, StoredRoi, WhitelistEntry};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::event_repo::{EventQuery, EventRepository, EVENTS_COLLECTION};
use crate::roi_repo::RoiRepository;
use crate::whitelist_repo::WhitelistRepository;

/// Durable storage for events, ROIs and whitelist entries.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist an event and return its id.
    async fn put_event(&self, event: &DetectionEvent) -> FirestoreResult<String>;

    async fn query_events(&self, user_id: &str, query: EventQuery) -> FirestoreResult<Vec<StoredEvent>>;

    /// `None` when missing or not owned by `user_id`.
    async fn get_event(&self, user_id: &str, event_id: &str) -> FirestoreResult<Option<StoredEvent>>;

    async fn put_roi(&self, user_id: &str, roi: &RegionOfInterest) -> FirestoreResult<StoredRoi>;

    async fn list_rois(&self, user_id: &str) -> FirestoreResult<Vec<StoredRoi>>;

    /// `None` when missing or not owned by `user_id`.
    async fn get_roi(&self, user_id: &str, roi_id: &str) -> FirestoreResult<Option<StoredRoi>>;

    /// `false` when there was nothing owned by `user_id` to delete.
    async fn delete_roi(&self, user_id: &str, roi_id: &str) -> FirestoreResult<bool>;

    async fn put_whitelist(&self, entry: &WhitelistEntry) -> FirestoreResult<()>;

    async fn list_whitelist(&self) -> FirestoreResult<Vec<WhitelistEntry>>;

    /// Cheap reachability probe for readiness checks.
    async fn check(&self) -> FirestoreResult<()>;
}

/// [`RecordStore`] backed by Firestore collections.
#[derive(Clone)]
pub struct FirestoreRecordStore {
    client: FirestoreClient,
    events: EventRepository,
    rois: RoiRepository,
    whitelist: WhitelistRepository,
}

impl FirestoreRecordStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            events: EventRepository::new(client.clone()),
            rois: RoiRepository::new(client.clone()),
            whitelist: WhitelistRepository::new(client.clone()),
            client,
        }
    }

    pub async fn from_env() -> FirestoreResult<Self> {
        Ok(Self::new(FirestoreClient::from_env().await?))
    }
}

#[async_trait]
impl RecordStore for FirestoreRecordStore {
    async fn put_event(&self, event: &DetectionEvent) -> FirestoreResult<String> {
        self.events.create(event).await
    }

    async fn query_events(&self, user_id: &str, query: EventQuery) -> FirestoreResult<Vec<StoredEvent>> {
        self.events.list(user_id, query).await
    }

    async fn get_event(&self, user_id: &str, event_id: &str) -> FirestoreResult<Option<StoredEvent>> {
        self.events.get(user_id, event_id).await
    }

    async fn put_roi(&self, user_id: &str, roi: &RegionOfInterest) -> FirestoreResult<StoredRoi> {
        self.rois.create(user_id, roi).await
    }

    async fn list_rois(&self, user_id: &str) -> FirestoreResult<Vec<StoredRoi>> {
        self.rois.list(user_id).await
    }

    async fn get_roi(&self, user_id: &str, roi_id: &str) -> FirestoreResult<Option<StoredRoi>> {
        self.rois.get(user_id, roi_id).await
    }

    async fn delete_roi(&self, user_id: &str, roi_id: &str) -> FirestoreResult<bool> {
        self.rois.delete(user_id, roi_id).await
    }

    async fn put_whitelist(&self, entry: &WhitelistEntry) -> FirestoreResult<()> {
        self.whitelist.upsert(entry).await
    }

    async fn list_whitelist(&self) -> FirestoreResult<Vec<WhitelistEntry>> {
        self.whitelist.list().await
    }

    async fn check(&self) -> FirestoreResult<()> {
        self.client
            .list_documents(EVENTS_COLLECTION, Some(1), None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FirestoreConfig;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS: &str = "/v1/projects/p/databases/db/documents";

    fn store(server: &MockServer) -> FirestoreRecordStore {
        let config = FirestoreConfig {
            project_id: "p".to_string(),
            database_id: "db".to_string(),
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            retry: RetryConfig {
                max_retries: 0,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            emulator_host: None,
        };
        FirestoreRecordStore::new(FirestoreClient::with_origin(config, &server.uri()).unwrap())
    }

    fn event_doc(id: &str, user: &str) -> serde_json::Value {
        json!({
            "name": format!("projects/p/databases/db/documents/events/{id}"),
            "fields": {
                "user_id": {"stringValue": user},
                "timestamp": {"stringValue": "2024-05-01T08:00:00.000000Z"},
                "alert": {"booleanValue": true},
                "image_url": {"nullValue": null},
                "detections": {"arrayValue": {}}
            }
        })
    }

    #[tokio::test]
    async fn test_get_event_enforces_ownership() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{DOCS}/events/ev1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_doc("ev1", "owner")))
            .mount(&server)
            .await;

        let store = store(&server);
        let own = store.get_event("owner", "ev1").await.unwrap().unwrap();
        assert_eq!(own.event_id, "ev1");
        assert!(own.detections.is_empty());
        assert!(store.get_event("intruder", "ev1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_events_filters_alerts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{DOCS}:runQuery")))
            .and(body_partial_json(json!({
                "structuredQuery": {
                    "where": {"compositeFilter": {"op": "AND"}},
                    "limit": 10
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": event_doc("a", "u1")},
                {"document": {"name": "x/events/broken", "fields": {}}}
            ])))
            .mount(&server)
            .await;

        let events = store(&server)
            .query_events(
                "u1",
                EventQuery {
                    limit: 10,
                    alert_only: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "a");
    }

    #[tokio::test]
    async fn test_delete_roi_of_other_user_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{DOCS}/rois/r1")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "x/rois/r1",
                "fields": {
                    "user_id": {"stringValue": "someone-else"},
                    "roi": {"mapValue": {"fields": {
                        "x": {"integerValue": "0"},
                        "y": {"integerValue": "0"},
                        "width": {"integerValue": "10"},
                        "height": {"integerValue": "10"}
                    }}}
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        assert!(!store(&server).delete_roi("me", "r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_reports_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{DOCS}/events")))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(store(&server).check().await.is_err());
    }
}
