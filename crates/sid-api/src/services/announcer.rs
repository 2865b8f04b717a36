//! Bounded hand-off of detection events to real-time subscribers.
//!
//! Handlers call [`Announcer::submit`], which never blocks: events go onto a
//! bounded queue drained by one worker that publishes to the relay or, when
//! there is none, broadcasts to the local hub. A full queue drops the event.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sid_models::DetectionEvent;
use sid_relay::EventRelay;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::broadcast::BroadcastHub;
use super::persistence::SubmitOutcome;
use super::relay::announce;
use crate::metrics;

struct Inner {
    tx: Mutex<Option<mpsc::Sender<DetectionEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Announcement queue plus its worker task.
#[derive(Clone)]
pub struct Announcer {
    inner: Arc<Inner>,
}

impl Announcer {
    /// Start the worker. Must be called inside a Tokio runtime.
    pub fn spawn(hub: Arc<BroadcastHub>, relay: Option<Arc<EventRelay>>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(rx, hub, relay));
        debug!(capacity, "Announcement worker started");

        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// An announcer that skips every event.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                tx: Mutex::new(None),
                worker: Mutex::new(None),
            }),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<DetectionEvent>> {
        self.inner.tx.lock().ok().and_then(|tx| tx.clone())
    }

    /// Queue `event` for delivery without waiting for it.
    pub fn submit(&self, event: DetectionEvent) -> SubmitOutcome {
        if !event.has_detections() {
            return SubmitOutcome::Skipped;
        }
        let Some(tx) = self.sender() else {
            return SubmitOutcome::Skipped;
        };

        match tx.try_send(event) {
            Ok(()) => SubmitOutcome::Queued,
            Err(TrySendError::Full(event)) => {
                warn!(user_id = %event.user_id, "Announcement queue full, dropping event");
                metrics::record_announcement("dropped");
                SubmitOutcome::Dropped
            }
            Err(TrySendError::Closed(event)) => {
                warn!(user_id = %event.user_id, "Announcement queue closed, dropping event");
                metrics::record_announcement("dropped");
                SubmitOutcome::Dropped
            }
        }
    }

    /// Close the queue and give queued announcements up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        let tx = self.inner.tx.lock().ok().and_then(|mut tx| tx.take());
        let Some(tx) = tx else {
            return;
        };
        drop(tx);

        let worker = self.inner.worker.lock().ok().and_then(|mut w| w.take());
        let Some(mut worker) = worker else {
            return;
        };

        if tokio::time::timeout(timeout, &mut worker).await.is_err() {
            warn!("Announcement drain timed out, abandoning pending events");
            worker.abort();
        } else {
            info!("Announcement queue drained");
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<DetectionEvent>,
    hub: Arc<BroadcastHub>,
    relay: Option<Arc<EventRelay>>,
) {
    while let Some(event) = rx.recv().await {
        announce(&hub, relay.as_deref(), event).await;
        metrics::record_announcement("announced");
    }
    debug!("Announcement worker stopped");
}
