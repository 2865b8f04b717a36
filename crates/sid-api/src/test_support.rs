//! In-memory record and blob stores for tests.
//!
//! Compiled for this crate's unit tests and, through the `test-support`
//! feature, for the integration suite.

use std::sync::Mutex;

use async_trait::async_trait;
use sid_firestore::{EventQuery, FirestoreError, FirestoreResult, RecordStore};
use sid_models::{DetectionEvent, RegionOfInterest, StoredEvent, StoredRoi, WhitelistEntry};
use sid_storage::{BlobStore, StorageError, StorageResult};

#[derive(Default)]
pub struct MemoryRecordStore {
    pub events: Mutex<Vec<StoredEvent>>,
    pub rois: Mutex<Vec<StoredRoi>>,
    pub whitelist: Mutex<Vec<WhitelistEntry>>,
    pub fail_writes: bool,
}

impl MemoryRecordStore {
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    /// Add an event under a fixed id, bypassing `fail_writes`.
    pub fn seed_event(&self, event_id: &str, user_id: &str, alert: bool) {
        self.events.lock().unwrap().push(StoredEvent {
            event_id: event_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: "2024-03-09T14:05:07.000000Z".to_string(),
            detections: Vec::new(),
            image_url: None,
            alert,
            created_at: None,
        });
    }

    fn check_writable(&self) -> FirestoreResult<()> {
        if self.fail_writes {
            Err(FirestoreError::request_failed("quota exceeded"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put_event(&self, event: &DetectionEvent) -> FirestoreResult<String> {
        self.check_writable()?;
        let mut events = self.events.lock().unwrap();
        let event_id = format!("evt{}", events.len() + 1);
        events.push(StoredEvent {
            event_id: event_id.clone(),
            user_id: event.user_id.clone(),
            timestamp: event.timestamp_string(),
            detections: event.detections.clone(),
            image_url: event.image_url.clone(),
            alert: event.alert,
            created_at: None,
        });
        Ok(event_id)
    }

    async fn query_events(&self, user_id: &str, query: EventQuery) -> FirestoreResult<Vec<StoredEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id && (!query.alert_only || e.alert))
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn get_event(&self, user_id: &str, event_id: &str) -> FirestoreResult<Option<StoredEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.event_id == event_id && e.user_id == user_id)
            .cloned())
    }

    async fn put_roi(&self, user_id: &str, roi: &RegionOfInterest) -> FirestoreResult<StoredRoi> {
        self.check_writable()?;
        let mut rois = self.rois.lock().unwrap();
        let stored = StoredRoi {
            roi_id: format!("roi{}", rois.len() + 1),
            user_id: user_id.to_string(),
            roi: roi.clone(),
            active: true,
        };
        rois.push(stored.clone());
        Ok(stored)
    }

    async fn list_rois(&self, user_id: &str) -> FirestoreResult<Vec<StoredRoi>> {
        Ok(self
            .rois
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_roi(&self, user_id: &str, roi_id: &str) -> FirestoreResult<Option<StoredRoi>> {
        Ok(self
            .rois
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.roi_id == roi_id && r.user_id == user_id)
            .cloned())
    }

    async fn delete_roi(&self, user_id: &str, roi_id: &str) -> FirestoreResult<bool> {
        let mut rois = self.rois.lock().unwrap();
        let before = rois.len();
        rois.retain(|r| !(r.roi_id == roi_id && r.user_id == user_id));
        Ok(rois.len() != before)
    }

    async fn put_whitelist(&self, entry: &WhitelistEntry) -> FirestoreResult<()> {
        self.check_writable()?;
        let mut whitelist = self.whitelist.lock().unwrap();
        whitelist.retain(|e| e.identity != entry.identity);
        whitelist.push(entry.clone());
        Ok(())
    }

    async fn list_whitelist(&self) -> FirestoreResult<Vec<WhitelistEntry>> {
        Ok(self.whitelist.lock().unwrap().clone())
    }

    async fn check(&self) -> FirestoreResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    pub objects: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: bool,
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>, key: &str, _content_type: &str) -> StorageResult<String> {
        if self.fail {
            return Err(StorageError::upload_failed("bucket unreachable"));
        }
        self.objects.lock().unwrap().push((key.to_string(), bytes));
        Ok(format!("https://cdn.test/{}", key))
    }
}
