//! Real-time detection stream over WebSocket.
//!
//! Each connection registers a [`ChannelSink`] with the broadcast hub. A
//! writer task drains the connection's bounded outbound queue into the
//! socket, so a slow client fills its own queue and eventually times out of
//! the hub instead of stalling other subscribers. A connection the hub drops
//! is closed. Inbound text is logged and otherwise ignored.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::interval;
use tracing::{debug, info};

use crate::metrics;
use crate::services::ChannelSink;
use crate::state::AppState;

/// Active WebSocket connection count.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Outbound frames buffered per connection.
const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long the writer gets to flush and send a close frame.
const WS_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest inbound message echoed into the log.
const MAX_LOGGED_MESSAGE: usize = 256;

/// GET /ws/detections
pub async fn ws_detections(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(count);
    metrics::record_ws_connection("detections");

    ws.on_upgrade(|socket| async move {
        handle_detection_socket(socket, state).await;
        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    })
}

async fn handle_detection_socket(socket: WebSocket, state: AppState) {
    let (ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let mut send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let sink = Arc::new(ChannelSink::new(tx.clone()));
    let removal = sink.removal();
    let id = state.hub.register(sink).await;
    info!("Client connected to detection stream");

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut last_activity = Instant::now();
    let mut writer_done = false;

    loop {
        tokio::select! {
            _ = &mut send_task => {
                debug!("WebSocket writer stopped");
                writer_done = true;
                break;
            }
            _ = removal.notified() => {
                info!("Subscriber dropped by broadcast hub, closing connection");
                break;
            }
            _ = heartbeat.tick() => {
                // A full queue already has traffic pending, skip the ping
                if last_activity.elapsed() >= WS_HEARTBEAT_INTERVAL / 2
                    && matches!(tx.try_send(Message::Ping(Vec::new())), Err(TrySendError::Closed(_)))
                {
                    break;
                }
            }
            client_msg = receiver.next() => {
                match client_msg {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        metrics::record_ws_message_received("detections");
                        info!(message = %truncate(&text, MAX_LOGGED_MESSAGE), "Received from client");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => last_activity = Instant::now(),
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister(id).await;
    drop(tx);
    // Closing every sender lets the writer flush, then send a close frame
    if !writer_done && tokio::time::timeout(WS_CLOSE_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
    info!("Client disconnected from detection stream");
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("ééé", 2), "éé");
    }
}
