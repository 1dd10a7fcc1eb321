use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tokio::sync::mpsc;

use crate::protocol::{InboundEvent, OutboundFrame};
use crate::server::BridgeState;
use crate::session::CallSession;

/// WebSocket upgrade for `{prefix}/{call_id}` — the platform addresses each
/// call by a path segment.
pub async fn handle_call_upgrade(
    ws: WebSocketUpgrade,
    Path(call_id): Path<String>,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_call(socket, state, call_id))
}

/// Upgrade for `{prefix}` with no call id in the path.
pub async fn handle_anonymous_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    let call_id = uuid::Uuid::new_v4().to_string();
    ws.on_upgrade(move |socket| handle_call(socket, state, call_id))
}

/// Drive one call connection.
///
/// The bridge speaks first: the capability handshake goes out before any
/// inbound frame is read. Heartbeats are echoed straight from the read
/// loop; everything state-bearing is queued to a per-call worker that owns
/// the session and processes events strictly in arrival order.
async fn handle_call(mut socket: WebSocket, state: Arc<BridgeState>, call_id: String) {
    tracing::info!(call_id = %call_id, "Call connected");

    if send_frame(&mut socket, &OutboundFrame::handshake()).await.is_err() {
        tracing::warn!(call_id = %call_id, "Connection dropped during handshake");
        return;
    }

    let (response_tx, mut response_rx) = mpsc::channel::<OutboundFrame>(64);
    let (event_tx, event_rx) = mpsc::channel::<InboundEvent>(64);
    tokio::spawn(run_turns(
        Arc::clone(&state),
        call_id.clone(),
        event_rx,
        response_tx,
    ));

    loop {
        tokio::select! {
            ws_msg = socket.recv() => {
                let text = match ws_msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::warn!(call_id = %call_id, "WebSocket error: {e}");
                        break;
                    }
                    _ => continue,
                };

                let event: InboundEvent = match serde_json::from_str(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(call_id = %call_id, "Dropping malformed frame: {e}");
                        continue;
                    }
                };

                match event {
                    // Echoed inline so a turn awaiting the backend can't
                    // starve the heartbeat.
                    InboundEvent::PingPong { timestamp } => {
                        if send_frame(&mut socket, &OutboundFrame::PingPong { timestamp })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    other => {
                        if event_tx.send(other).await.is_err() {
                            break;
                        }
                    }
                }
            }

            frame = response_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Dropping event_tx winds the worker down once any in-flight turn
    // finishes; the in-memory session goes with it. Durable state lives in
    // the session registry.
    tracing::info!(call_id = %call_id, "Call disconnected");
}

async fn run_turns(
    state: Arc<BridgeState>,
    call_id: String,
    mut events: mpsc::Receiver<InboundEvent>,
    tx: mpsc::Sender<OutboundFrame>,
) {
    let mut session = CallSession::new(call_id);
    while let Some(event) = events.recv().await {
        if let Some(frame) = state
            .translator
            .handle(&mut session, event, state.backend.as_ref())
            .await
        {
            if tx.send(frame).await.is_err() {
                break;
            }
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &OutboundFrame) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(frame) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize outbound frame: {e}");
            return Ok(());
        }
    };
    socket.send(Message::Text(json.into())).await
}
