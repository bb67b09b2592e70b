//! Axum WebSocket transport for the device channel.
//!
//! Each device opens one WebSocket to the coordinator; `handle_socket`
//! owns that connection for its lifetime, binding it into the
//! `ConnectionRegistry` on `device:register` and unbinding (and
//! notifying the handler) on close or an explicit `disconnect` frame.

use crate::protocol::{InboundMessage, OutboundMessage};
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handles the device-facing side effects of channel events: registering
/// a device, recording a heartbeat, and noticing a disconnect. Kept as a
/// trait so the transport can be exercised without a real device
/// registry, in the style of the codebase's trait-based client seams.
#[async_trait]
pub trait DeviceEventHandler: Send + Sync {
    async fn on_register(
        &self,
        payload: crate::protocol::DeviceRegisterPayload,
    ) -> Result<OutboundMessage, String>;

    async fn on_ping(&self, logical_device_id: &str, available_capacity_bytes: i64) -> OutboundMessage;

    async fn on_storage_update(&self, logical_device_id: &str, available_capacity_bytes: i64);

    async fn on_disconnect(&self, logical_device_id: &str, reason: &str);
}

/// Shared state for the device channel routes.
#[derive(Clone)]
pub struct DeviceChannelState {
    pub registry: Arc<ConnectionRegistry>,
    pub handler: Arc<dyn DeviceEventHandler>,
    pub heartbeat_interval: Duration,
}

pub fn routes(state: DeviceChannelState) -> Router {
    Router::new()
        .route("/device/ws", get(ws_handler))
        .with_state(Arc::new(state))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<DeviceChannelState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<DeviceChannelState>) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundMessage>(64);

    let mut logical_device_id: Option<String> = None;

    let (hb_tx, mut hb_rx) = mpsc::channel::<()>(1);
    let heartbeat_interval = state.heartbeat_interval;
    let heartbeat_task = tokio::spawn(async move {
        loop {
            tokio::time::sleep(heartbeat_interval).await;
            if hb_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            maybe_msg = receiver.next() => {
                let Some(msg) = maybe_msg else { break };
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Err(disconnect_reason) =
                            handle_text(&text, &state, &out_tx, &mut logical_device_id).await
                        {
                            debug!(reason = %disconnect_reason, "device channel closing");
                            break;
                        }
                    }
                    Ok(Message::Ping(data)) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => {
                        debug!("device sent close frame");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "device channel read error");
                        break;
                    }
                    _ => {}
                }
            }

            Some(out) = out_rx.recv() => {
                match serde_json::to_string(&out) {
                    Ok(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize outbound device message"),
                }
            }

            _ = hb_rx.recv() => {
                // Keep-alive ping; devices reply with Pong automatically
                // at the protocol layer.
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    heartbeat_task.abort();

    if let Some(ref id) = logical_device_id {
        state.registry.unbind(id);
        state.handler.on_disconnect(id, "connection closed").await;
        info!(logical_device_id = %id, "device channel closed");
    }
}

/// Parse and dispatch one text frame. Returns `Err(reason)` when the
/// connection should end (an explicit `disconnect` message).
async fn handle_text(
    text: &str,
    state: &DeviceChannelState,
    out_tx: &mpsc::Sender<OutboundMessage>,
    logical_device_id: &mut Option<String>,
) -> Result<(), String> {
    let msg = match InboundMessage::parse(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "malformed device channel frame");
            return Ok(());
        }
    };

    match msg {
        InboundMessage::DeviceRegister(payload) => {
            let id = payload.logical_device_id.clone();
            match state.handler.on_register(payload).await {
                Ok(reply) => {
                    state.registry.bind(&id, out_tx.clone());
                    *logical_device_id = Some(id);
                    let _ = out_tx.send(reply).await;
                }
                Err(message) => {
                    let _ = out_tx
                        .send(OutboundMessage::DeviceRegistered {
                            success: false,
                            device: None,
                            message,
                        })
                        .await;
                }
            }
        }
        InboundMessage::DevicePing(payload) => {
            let reply = state
                .handler
                .on_ping(&payload.logical_device_id, payload.available_capacity_bytes)
                .await;
            let _ = out_tx.send(reply).await;
        }
        InboundMessage::DeviceStorageUpdate(payload) => {
            if let Some(ref id) = logical_device_id {
                state
                    .handler
                    .on_storage_update(id, payload.available_capacity_bytes)
                    .await;
            }
        }
        InboundMessage::ChunkConfirm(payload) => {
            if let Some(ref id) = logical_device_id {
                state
                    .registry
                    .complete_write(id, payload.chunk_id, payload.success, payload.error);
            }
        }
        InboundMessage::ChunkData { chunk_id, success, data_base64, error } => {
            if let Some(ref id) = logical_device_id {
                state.registry.complete_read(id, chunk_id, success, data_base64, error);
            }
        }
        InboundMessage::ChunkDeleted { chunk_id, success, error } => {
            if let Some(ref id) = logical_device_id {
                state.registry.complete_delete(id, chunk_id, success, error);
            }
        }
        InboundMessage::Disconnect(reason) => {
            return Err(reason);
        }
    }

    Ok(())
}
