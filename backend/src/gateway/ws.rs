//! WebSocket handler for device connections.
//!
//! Each accepted socket runs as its own task: a bounded wait for the single
//! handshake message, then a select loop pumping outbound frames and
//! forwarding inbound messages to the authenticated-message handler. The
//! connection joins the live table only after the handshake succeeds.

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};

use devgate_common::{Device, ErrorEnvelope};

use super::connections::{ConnectionTable, Outbound};
use super::hooks::{AuthOutcome, GatewayHooks};

/// Shared state for WebSocket connections.
pub(crate) struct WsState {
    pub table: Arc<ConnectionTable>,
    pub hooks: GatewayHooks,
    pub handshake_timeout: Duration,
}

/// WebSocket upgrade handler.
pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    tracing::info!("Device connection attempt from {}", addr);
    ws.on_upgrade(move |socket| handle_device(socket, state, addr))
}

/// Handle an individual device connection.
async fn handle_device(socket: WebSocket, state: Arc<WsState>, addr: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(device) = authenticate(&state, &mut ws_tx, &mut ws_rx, addr).await else {
        return;
    };

    let alive = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel::<Outbound>(32);

    // The frame pump runs as its own task so the liveness sweep can reap an
    // unresponsive peer by aborting it: such a peer leaves the pump parked
    // on a socket write with a backed-up outbound channel, so nothing routed
    // through either would ever be processed.
    let pump = tokio::spawn(pump_frames(
        state.clone(),
        ws_tx,
        ws_rx,
        rx,
        alive.clone(),
        device.clone(),
    ));
    let conn_id = state
        .table
        .insert(device.clone(), tx, alive, pump.abort_handle())
        .await;

    match pump.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {
            tracing::warn!("Terminated unresponsive device {}", device.uuid);
        }
        Err(e) => {
            tracing::error!("Frame pump for device {} failed: {}", device.uuid, e);
        }
    }

    if let Some(entry) = state.table.remove(conn_id).await {
        let connected_for = chrono::Utc::now() - entry.connected_at;
        tracing::info!(
            "Device {} disconnected after {}s",
            device.uuid,
            connected_for.num_seconds()
        );
        state.hooks.offline.device_offline(&device).await;
    }
}

/// Pump frames in both directions until the connection ends. Dropping the
/// socket halves on abort is what actually severs a reaped connection.
async fn pump_frames(
    state: Arc<WsState>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut rx: mpsc::Receiver<Outbound>,
    alive: Arc<AtomicBool>,
    device: Device,
) {
    loop {
        tokio::select! {
            // Outbound frames (from the gateway to the device)
            Some(out) = rx.recv() => match out {
                Outbound::Frame(text) => {
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        tracing::error!("Failed to send frame to {}: {}", device.uuid, e);
                        break;
                    }
                }
                Outbound::Ping => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            },

            // Inbound frames (from the device to the gateway)
            Some(frame) = ws_rx.next() => {
                match frame {
                    Ok(Message::Text(text)) => {
                        if !deliver(&state, &mut ws_tx, text.as_bytes(), &device).await {
                            break;
                        }
                    }
                    Ok(Message::Binary(bytes)) => {
                        if !deliver(&state, &mut ws_tx, &bytes, &device).await {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        alive.store(true, Ordering::SeqCst);
                    }
                    Ok(Message::Ping(data)) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("Device {} sent close frame", device.uuid);
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error from {}: {}", device.uuid, e);
                        break;
                    }
                }
            }

            else => break,
        }
    }
}

/// Run the one-shot handshake: the first inbound data frame is treated as
/// an authentication attempt. Control frames before it are keepalive noise
/// and are absorbed (pings still get pongs) without consuming the attempt.
/// On any failure the peer gets an error envelope and a normal-closure
/// close frame; retrying means reconnecting.
async fn authenticate<S>(
    state: &WsState,
    ws_tx: &mut S,
    ws_rx: &mut (impl Stream<Item = Result<Message, axum::Error>> + Unpin),
    addr: SocketAddr,
) -> Option<Device>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let deadline = Instant::now() + state.handshake_timeout;
    let parsed = loop {
        match timeout_at(deadline, ws_rx.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => break serde_json::from_str::<Value>(&text),
            Ok(Some(Ok(Message::Binary(bytes)))) => break serde_json::from_slice::<Value>(&bytes),
            Ok(Some(Ok(Message::Ping(data)))) => {
                if ws_tx.send(Message::Pong(data)).await.is_err() {
                    return None;
                }
            }
            Ok(Some(Ok(Message::Pong(_)))) => {}
            Ok(Some(Ok(Message::Close(_)))) => {
                tracing::info!("Connection closed before handshake from {}", addr);
                return None;
            }
            Ok(Some(Err(e))) => {
                tracing::warn!("WebSocket error during handshake from {}: {}", addr, e);
                return None;
            }
            Ok(None) => {
                tracing::info!("Connection closed before handshake from {}", addr);
                return None;
            }
            Err(_) => {
                tracing::warn!("Handshake timeout from {}", addr);
                reject(ws_tx, "handshake timeout").await;
                return None;
            }
        }
    };

    let handshake = match parsed {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Malformed handshake from {}: {}", addr, e);
            reject(ws_tx, &format!("malformed handshake: {e}")).await;
            return None;
        }
    };

    match state.hooks.resolver.resolve(handshake).await {
        Ok(AuthOutcome::Granted { device }) => {
            tracing::info!(
                "Device {} ({}) authenticated from {}",
                device.uuid,
                device.shortname,
                addr
            );
            Some(device)
        }
        Ok(AuthOutcome::Denied { reason }) => {
            tracing::warn!("Handshake denied from {}: {}", addr, reason);
            reject(ws_tx, &reason).await;
            None
        }
        Err(e) => {
            tracing::warn!("Handshake resolution failed from {}: {}", addr, e);
            reject(ws_tx, &e.to_string()).await;
            None
        }
    }
}

/// Forward one authenticated message to the handler. A handler failure is
/// reported to the peer as an error envelope and the connection stays open;
/// returns false only when the socket itself is no longer writable.
async fn deliver<S>(state: &WsState, ws_tx: &mut S, raw: &[u8], device: &Device) -> bool
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    match state.hooks.messages.on_message(raw, device).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Message from device {} failed: {}", device.uuid, e);
            send_error(ws_tx, &e.to_string()).await.is_ok()
        }
    }
}

/// Send an error envelope followed by a normal-closure close frame.
async fn reject<S>(ws_tx: &mut S, message: &str)
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let _ = send_error(ws_tx, message).await;
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Owned(message.to_string()),
        })))
        .await;
}

/// Send an `{"error": "<message>"}` envelope over the socket.
async fn send_error<S>(
    sink: &mut S,
    message: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let json = serde_json::to_string(&ErrorEnvelope::new(message))?;
    sink.send(Message::Text(json)).await?;
    Ok(())
}
