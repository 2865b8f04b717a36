//! Cross-worker delivery of detection events over Redis Pub/Sub.
//!
//! Every API worker publishes completed events to one channel and
//! subscribes to it, so a WebSocket client sees events regardless of which
//! worker handled the upload. The publishing worker receives its own
//! messages through the subscription like any other.

pub mod error;

use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use redis::AsyncCommands;
use tracing::{debug, warn};

use sid_models::DetectionEvent;

pub use error::{RelayError, RelayResult};

/// Default Pub/Sub channel.
pub const DETECTIONS_CHANNEL: &str = "detections";

pub type EventStream = Pin<Box<dyn Stream<Item = DetectionEvent> + Send>>;

/// Publisher/subscriber for the detections channel.
#[derive(Clone)]
pub struct EventRelay {
    client: redis::Client,
    channel: String,
}

impl EventRelay {
    pub fn new(redis_url: &str) -> RelayResult<Self> {
        Self::with_channel(redis_url, DETECTIONS_CHANNEL)
    }

    pub fn with_channel(redis_url: &str, channel: impl Into<String>) -> RelayResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| RelayError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish an event. Returns how many subscribers Redis delivered it to.
    pub async fn publish(&self, event: &DetectionEvent) -> RelayResult<usize> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let receivers: usize = conn.publish(&self.channel, payload).await?;
        debug!(channel = %self.channel, receivers, user_id = %event.user_id, "Published detection event");
        Ok(receivers)
    }

    /// Subscribe to the channel. Undecodable payloads are logged and dropped.
    ///
    /// The stream ends when the Redis connection does; callers reconnect.
    pub async fn subscribe(&self) -> RelayResult<EventStream> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Dropping non-text relay message");
                    return None;
                }
            };
            decode_event(&payload)
        });
        Ok(Box::pin(stream))
    }
}

fn decode_event(payload: &str) -> Option<DetectionEvent> {
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Dropping malformed relay payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_decode_event() {
        let event = DetectionEvent::new("u1", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(), vec![]);
        let payload = serde_json::to_string(&event).unwrap();
        assert_eq!(decode_event(&payload), Some(event));
        assert_eq!(decode_event("{not json"), None);
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(EventRelay::new("not a url"), Err(RelayError::InvalidUrl(_))));
    }

    #[test]
    fn test_default_channel() {
        let relay = EventRelay::new("redis://127.0.0.1:6379").unwrap();
        assert_eq!(relay.channel(), DETECTIONS_CHANNEL);
    }

    #[test]
    fn test_publish_to_unreachable_server_fails() {
        let relay = EventRelay::new("redis://127.0.0.1:1/").unwrap();
        let event = DetectionEvent::new("u1", Utc::now(), vec![]);
        let result = tokio_test::block_on(relay.publish(&event));
        assert!(matches!(result, Err(RelayError::Redis(_))));
    }
}
