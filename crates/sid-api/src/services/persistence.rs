//! Fire-and-forget persistence of detection events.
//!
//! Request handlers hand finished events to [`PersistenceDecoupler::submit`],
//! which never blocks: jobs go onto a bounded queue drained by a single
//! background worker, and a full queue drops the job. The worker encodes the
//! annotated frame, uploads it and then writes the event record with the
//! returned URL. Failures are logged and counted, never reported back to the
//! request that produced the event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbImage;
use sid_firestore::{FirestoreError, RecordStore};
use sid_models::DetectionEvent;
use sid_storage::{BlobStore, StorageError};
use sid_vision::{encode_evidence, VisionError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;

/// Content type of uploaded evidence frames.
const EVIDENCE_CONTENT_TYPE: &str = "image/jpeg";

/// One queued commit.
pub struct PersistJob {
    pub event: DetectionEvent,
    pub annotated: RgbImage,
}

/// What [`PersistenceDecoupler::submit`] did with a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    /// Nothing to persist, or persistence is not configured
    Skipped,
    /// Queue full or shutting down
    Dropped,
}

#[derive(Debug, Error)]
enum CommitError {
    #[error("evidence encoding failed: {0}")]
    Encode(#[from] VisionError),

    #[error("encoding task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("upload failed: {0}")]
    Upload(#[from] StorageError),

    #[error("record write failed: {0}")]
    Record(#[from] FirestoreError),
}

struct Inner {
    tx: Mutex<Option<mpsc::Sender<PersistJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded commit queue plus its worker task.
#[derive(Clone)]
pub struct PersistenceDecoupler {
    inner: Arc<Inner>,
}

impl PersistenceDecoupler {
    /// Start the worker. Must be called inside a Tokio runtime.
    pub fn spawn(
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(rx, blobs, records));
        info!(capacity, "Persistence worker started");

        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// A decoupler that skips every job.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender().is_some()
    }

    fn sender(&self) -> Option<mpsc::Sender<PersistJob>> {
        self.inner.tx.lock().ok().and_then(|tx| tx.clone())
    }

    /// Schedule a commit without waiting for it.
    pub fn submit(&self, event: DetectionEvent, annotated: RgbImage) -> SubmitOutcome {
        if !event.has_detections() {
            return SubmitOutcome::Skipped;
        }
        let Some(tx) = self.sender() else {
            return SubmitOutcome::Skipped;
        };

        match tx.try_send(PersistJob { event, annotated }) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(job)) => {
                warn!(user_id = %job.event.user_id, "Persistence queue full, dropping event");
                metrics::record_persist_commit("dropped");
                SubmitOutcome::Dropped
            }
            Err(TrySendError::Closed(job)) => {
                warn!(user_id = %job.event.user_id, "Persistence queue closed, dropping event");
                metrics::record_persist_commit("dropped");
                SubmitOutcome::Dropped
            }
        }
    }

    /// Close the queue and wait up to `timeout` for queued jobs to finish.
    /// Whatever is still pending afterwards is abandoned.
    pub async fn shutdown(&self, timeout: Duration) {
        let tx = self.inner.tx.lock().ok().and_then(|mut tx| tx.take());
        let Some(tx) = tx else {
            return;
        };
        let pending = tx.max_capacity() - tx.capacity();
        drop(tx);

        let worker = self.inner.worker.lock().ok().and_then(|mut w| w.take());
        let Some(mut worker) = worker else {
            return;
        };

        info!(pending, timeout_secs = timeout.as_secs(), "Draining persistence queue");
        match tokio::time::timeout(timeout, &mut worker).await {
            Ok(_) => info!("Persistence queue drained"),
            Err(_) => {
                warn!("Persistence drain timed out, abandoning pending commits");
                worker.abort();
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<PersistJob>,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
) {
    while let Some(job) = rx.recv().await {
        let user_id = job.event.user_id.clone();
        match commit(blobs.as_ref(), records.as_ref(), job).await {
            Ok(event_id) => {
                debug!(user_id = %user_id, event_id = %event_id, "Event persisted");
                metrics::record_persist_commit("committed");
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Background commit failed");
                metrics::record_persist_commit("failed");
            }
        }
    }
    debug!("Persistence worker stopped");
}

async fn commit(
    blobs: &dyn BlobStore,
    records: &dyn RecordStore,
    job: PersistJob,
) -> Result<String, CommitError> {
    let PersistJob { event, annotated } = job;

    let bytes = tokio::task::spawn_blocking(move || encode_evidence(&annotated)).await??;
    let url = blobs
        .put(bytes, &event.image_key(), EVIDENCE_CONTENT_TYPE)
        .await?;

    let event = event.with_image_url(url);
    Ok(records.put_event(&event).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemoryBlobStore, MemoryRecordStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use image::Rgb;
    use sid_models::{BoundingBox, DetectionRecord, PersonDetection};
    use sid_storage::StorageResult;
    use tokio::sync::{oneshot, Notify};

    fn event(user: &str) -> DetectionEvent {
        let det = PersonDetection::new(BoundingBox::new(1.0, 1.0, 10.0, 20.0), 0.9);
        DetectionEvent::new(user, Utc::now(), vec![DetectionRecord::unrecognized(&det)])
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(32, 24, Rgb([40, 80, 120]))
    }

    #[tokio::test]
    async fn test_commit_uploads_then_records() {
        let blobs = Arc::new(MemoryBlobStore::default());
        let records = Arc::new(MemoryRecordStore::default());
        let decoupler = PersistenceDecoupler::spawn(blobs.clone(), records.clone(), 4);

        let event = event("user-1");
        let key = event.image_key();
        assert_eq!(decoupler.submit(event, frame()), SubmitOutcome::Queued);
        decoupler.shutdown(Duration::from_secs(5)).await;

        let objects = blobs.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].0, key);
        assert_eq!(&objects[0].1[..2], &[0xFF, 0xD8]);

        let stored = records.events.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(
            stored[0].image_url.as_deref(),
            Some(format!("https://cdn.test/{}", key).as_str())
        );
    }

    #[tokio::test]
    async fn test_upload_failure_writes_nothing() {
        let blobs = Arc::new(MemoryBlobStore {
            fail: true,
            ..Default::default()
        });
        let records = Arc::new(MemoryRecordStore::default());
        let decoupler = PersistenceDecoupler::spawn(blobs, records.clone(), 4);

        assert_eq!(decoupler.submit(event("user-1"), frame()), SubmitOutcome::Queued);
        decoupler.shutdown(Duration::from_secs(5)).await;
        assert!(records.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skips_empty_events_and_disabled() {
        let decoupler = PersistenceDecoupler::disabled();
        assert!(!decoupler.is_enabled());
        assert_eq!(decoupler.submit(event("u"), frame()), SubmitOutcome::Skipped);

        let enabled = PersistenceDecoupler::spawn(
            Arc::new(MemoryBlobStore::default()),
            Arc::new(MemoryRecordStore::default()),
            4,
        );
        let empty = DetectionEvent::new("u", Utc::now(), vec![]);
        assert_eq!(enabled.submit(empty, frame()), SubmitOutcome::Skipped);
        enabled.shutdown(Duration::from_secs(1)).await;
        assert_eq!(enabled.submit(event("u"), frame()), SubmitOutcome::Skipped);
    }

    /// Signals when the first upload starts, then blocks until released.
    struct GatedBlobStore {
        started: Mutex<Option<oneshot::Sender<()>>>,
        release: Notify,
    }

    #[async_trait]
    impl BlobStore for GatedBlobStore {
        async fn put(&self, _bytes: Vec<u8>, key: &str, _ct: &str) -> StorageResult<String> {
            if let Some(tx) = self.started.lock().unwrap().take() {
                let _ = tx.send(());
            }
            self.release.notified().await;
            Ok(format!("https://cdn.test/{}", key))
        }
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (started_tx, started_rx) = oneshot::channel();
        let blobs = Arc::new(GatedBlobStore {
            started: Mutex::new(Some(started_tx)),
            release: Notify::new(),
        });
        let records = Arc::new(MemoryRecordStore::default());
        let decoupler = PersistenceDecoupler::spawn(blobs.clone(), records.clone(), 1);

        assert_eq!(decoupler.submit(event("a"), frame()), SubmitOutcome::Queued);
        started_rx.await.unwrap();

        assert_eq!(decoupler.submit(event("b"), frame()), SubmitOutcome::Queued);
        assert_eq!(decoupler.submit(event("c"), frame()), SubmitOutcome::Dropped);

        // Wakes "a", then leaves a permit for "b".
        blobs.release.notify_one();
        blobs.release.notify_one();
        decoupler.shutdown(Duration::from_secs(5)).await;

        let users: Vec<String> = records
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.user_id.clone())
            .collect();
        assert_eq!(users, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_drain_timeout_abandons_work() {
        let (started_tx, started_rx) = oneshot::channel();
        let blobs = Arc::new(GatedBlobStore {
            started: Mutex::new(Some(started_tx)),
            release: Notify::new(),
        });
        let records = Arc::new(MemoryRecordStore::default());
        let decoupler = PersistenceDecoupler::spawn(blobs, records.clone(), 2);

        decoupler.submit(event("a"), frame());
        started_rx.await.unwrap();
        decoupler.shutdown(Duration::from_millis(50)).await;

        assert!(records.events.lock().unwrap().is_empty());
    }
}
