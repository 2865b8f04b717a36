//! Delivery of detection events to real-time subscribers.
//!
//! With a relay configured, events are published to Redis and every worker
//! (this one included) feeds what it receives into its local hub. Without
//! one, events go straight to the local hub.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use sid_models::{DetectionEvent, WsMessage};
use sid_relay::EventRelay;
use tracing::{debug, info, warn};

use super::broadcast::BroadcastHub;

const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Hand one event to subscribers. Only events with detections are announced.
pub async fn announce(hub: &BroadcastHub, relay: Option<&EventRelay>, event: DetectionEvent) {
    if !event.has_detections() {
        return;
    }

    if let Some(relay) = relay {
        match relay.publish(&event).await {
            Ok(receivers) => {
                debug!(receivers, "Event published to relay");
                return;
            }
            Err(e) => warn!(error = %e, "Relay publish failed, broadcasting locally"),
        }
    }

    let report = hub.broadcast(&WsMessage::detection(event)).await;
    debug!(delivered = report.delivered, removed = report.removed, "Event broadcast");
}

/// Forward relayed events into `hub` until the task is aborted.
/// Reconnects with capped exponential backoff.
pub async fn run_relay_forwarder(relay: Arc<EventRelay>, hub: Arc<BroadcastHub>) {
    let mut delay = RECONNECT_BASE_DELAY;
    loop {
        match relay.subscribe().await {
            Ok(mut stream) => {
                info!(channel = relay.channel(), "Relay subscription established");
                delay = RECONNECT_BASE_DELAY;
                while let Some(event) = stream.next().await {
                    hub.broadcast(&WsMessage::detection(event)).await;
                }
                warn!("Relay subscription ended");
            }
            Err(e) => warn!(error = %e, retry_in_secs = delay.as_secs(), "Relay subscribe failed"),
        }

        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(RECONNECT_MAX_DELAY);
    }
}
