//! WebSocket endpoint bridging a socket to the event hub.
//!
//! Each socket is registered as a [`ChannelObserver`]; hub messages are
//! forwarded as text frames and inbound text is handed back to the hub.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::adapters::ChannelObserver;
use crate::core::{EventHub, HubError, ObserverId};

use super::SharedState;

/// Close code sent when the hub is full ("try again later")
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    let hub = Arc::clone(state.orchestrator.hub());
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<EventHub>) {
    let (mut sender, receiver) = socket.split();
    let (observer, rx) = ChannelObserver::channel();

    let client_id = match hub.connect(Arc::new(observer)).await {
        Ok(id) => id,
        Err(HubError::CapacityReached { .. }) => {
            let frame = CloseFrame {
                code: CLOSE_TRY_AGAIN_LATER,
                reason: "Max connections reached".into(),
            };
            let _ = sender.send(Message::Close(Some(frame))).await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "WebSocket registration failed");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    run_socket_loop(sender, receiver, rx, &hub, client_id).await;
    hub.disconnect(client_id).await;
}

/// Forward hub payloads to the socket and inbound text to the hub until
/// either side goes away.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::Receiver<String>,
    hub: &EventHub,
    client_id: ObserverId,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // First tick completes immediately
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(%client_id, "WebSocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            payload = rx.recv() => {
                match payload {
                    Some(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Hub dropped this observer
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        hub.handle_inbound(text.as_str(), client_id).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%client_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
