//! [`DeviceEventHandler`] implementation wiring the device channel into
//! the device registry and health scanner.
//!
//! This is the one place that turns a wire event into a control-plane
//! side effect; the channel itself (`fabric_connect::ws`) stays ignorant
//! of devices, replication, or the metadata store.

use async_trait::async_trait;
use fabric_connect::ws::DeviceEventHandler;
use fabric_connect::protocol::{DeviceRegisterPayload, DeviceSummary, OutboundMessage};
use fabric_control::{DeviceRegistry, HealthScanner};
use fabric_metadata::{MetadataStore, RegisterDevice};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub struct CoordinatorDeviceHandler {
    device_registry: DeviceRegistry,
    health_scanner: Arc<HealthScanner<MetadataStore>>,
}

impl CoordinatorDeviceHandler {
    pub fn new(device_registry: DeviceRegistry, health_scanner: Arc<HealthScanner<MetadataStore>>) -> Self {
        Self {
            device_registry,
            health_scanner,
        }
    }
}

#[async_trait]
impl DeviceEventHandler for CoordinatorDeviceHandler {
    async fn on_register(&self, payload: DeviceRegisterPayload) -> Result<OutboundMessage, String> {
        let logical_device_id = payload.logical_device_id.clone();
        let device = self
            .device_registry
            .register(RegisterDevice {
                logical_device_id: payload.logical_device_id,
                device_type: payload.device_type,
                owner_id: payload.owner_id,
                total_capacity_bytes: payload.total_capacity_bytes,
                available_capacity_bytes: payload.total_capacity_bytes,
            })
            .await
            .map_err(|e| e.to_string())?;

        metrics::counter!("fabric_devices_registered_total").increment(1);
        info!(%logical_device_id, device_id = %device.id, "device registered over channel");

        Ok(OutboundMessage::DeviceRegistered {
            success: true,
            device: Some(DeviceSummary {
                logical_device_id: device.logical_device_id,
                state: device.state.to_string(),
                total_capacity_bytes: device.total_capacity_bytes,
                available_capacity_bytes: device.available_capacity_bytes,
            }),
            message: "registered".to_string(),
        })
    }

    async fn on_ping(&self, logical_device_id: &str, available_capacity_bytes: i64) -> OutboundMessage {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        match self.device_registry.heartbeat(logical_device_id, available_capacity_bytes).await {
            Ok(device) => OutboundMessage::DevicePong {
                success: true,
                timestamp_ms,
                state: device.state.to_string(),
            },
            Err(e) => {
                warn!(logical_device_id, error = %e, "heartbeat failed");
                OutboundMessage::DevicePong {
                    success: false,
                    timestamp_ms,
                    state: "unknown".to_string(),
                }
            }
        }
    }

    async fn on_storage_update(&self, logical_device_id: &str, available_capacity_bytes: i64) {
        if let Err(e) = self
            .device_registry
            .update_capacity(logical_device_id, available_capacity_bytes)
            .await
        {
            warn!(logical_device_id, error = %e, "storage update failed");
        }
    }

    async fn on_disconnect(&self, logical_device_id: &str, reason: &str) {
        info!(logical_device_id, reason, "device disconnected");
        let device = match self.device_registry.mark_offline(logical_device_id).await {
            Ok(device) => device,
            Err(e) => {
                warn!(logical_device_id, error = %e, "failed to mark device offline on disconnect");
                return;
            }
        };

        match self.health_scanner.detect_affected(device.id).await {
            Ok(affected) if affected > 0 => {
                metrics::counter!("fabric_chunks_requeued_on_disconnect_total").increment(affected as u64);
            }
            Ok(_) => {}
            Err(e) => warn!(logical_device_id, error = %e, "failed to scan chunks affected by disconnect"),
        }
    }
}
