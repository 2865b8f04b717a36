//! Real-time fan-out of detection events.
//!
//! Subscribers live in a registry keyed by a monotonically increasing id.
//! A broadcast snapshots the registry, releases the lock, then attempts every
//! delivery concurrently. Each delivery has its own timeout; whichever
//! subscribers fail are removed afterwards and told so through
//! [`SubscriberSink::on_removed`]. There is no retry and no resume: a removed
//! subscriber has to register again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::future::join_all;
use sid_models::WsMessage;
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, error, warn};

use crate::metrics;

/// Why a delivery to one subscriber failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("subscriber transport closed")]
    Closed,

    #[error("send timed out")]
    Timeout,
}

/// Transport to one real-time subscriber.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    async fn send(&self, message: Arc<str>) -> Result<(), SinkError>;

    /// Called once when the hub drops this subscriber after a failed send.
    fn on_removed(&self) {}
}

/// Handle returned by [`BroadcastHub::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub removed: usize,
}

/// Registry of live subscribers.
pub struct BroadcastHub {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn SubscriberSink>>>,
    next_id: AtomicU64,
    send_timeout: Duration,
}

impl BroadcastHub {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            send_timeout,
        }
    }

    pub async fn register(&self, sink: Arc<dyn SubscriberSink>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, sink);
        debug!(subscriber = id.0, total = subscribers.len(), "Subscriber registered");
        id
    }

    /// Returns false when the subscriber was already gone.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber = id.0, total = subscribers.len(), "Subscriber unregistered");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }

    /// Serialize `message` once and deliver it to every current subscriber.
    pub async fn broadcast(&self, message: &WsMessage) -> BroadcastReport {
        match message.to_json() {
            Ok(json) => self.broadcast_raw(Arc::from(json)).await,
            Err(e) => {
                error!(error = %e, "Failed to serialize broadcast message");
                BroadcastReport::default()
            }
        }
    }

    /// Deliver an already serialized payload.
    pub async fn broadcast_raw(&self, payload: Arc<str>) -> BroadcastReport {
        let snapshot: Vec<(SubscriberId, Arc<dyn SubscriberSink>)> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .iter()
                .map(|(id, sink)| (*id, Arc::clone(sink)))
                .collect()
        };

        if snapshot.is_empty() {
            return BroadcastReport::default();
        }

        let send_timeout = self.send_timeout;
        let attempts = snapshot.into_iter().map(|(id, sink)| {
            let payload = Arc::clone(&payload);
            async move {
                let outcome = match tokio::time::timeout(send_timeout, sink.send(payload)).await {
                    Ok(result) => result,
                    Err(_) => Err(SinkError::Timeout),
                };
                (id, outcome)
            }
        });

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for (id, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(subscriber = id.0, error = %e, "Dropping subscriber after failed send");
                    failed.push(id);
                }
            }
        }

        let remaining = {
            let mut subscribers = self.subscribers.write().await;
            for id in &failed {
                if let Some(sink) = subscribers.remove(id) {
                    sink.on_removed();
                    report.removed += 1;
                }
            }
            subscribers.len()
        };

        metrics::record_broadcast(report.delivered, report.removed, remaining);
        report
    }
}

/// WebSocket adapter: pushes text frames into a connection's bounded
/// outbound queue, drained by that connection's writer task.
pub struct ChannelSink {
    tx: mpsc::Sender<Message>,
    removed: Arc<Notify>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            tx,
            removed: Arc::new(Notify::new()),
        }
    }

    /// Notified when the hub drops this sink. The permit is kept if nobody is
    /// waiting yet.
    pub fn removal(&self) -> Arc<Notify> {
        Arc::clone(&self.removed)
    }
}

#[async_trait]
impl SubscriberSink for ChannelSink {
    async fn send(&self, message: Arc<str>) -> Result<(), SinkError> {
        self.tx
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|_| SinkError::Closed)
    }

    fn on_removed(&self) {
        self.removed.notify_one();
    }
}
