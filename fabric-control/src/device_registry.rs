//! Device registry: presence, reliability accounting, and healthy-device
//! lookup for placement.
//!
//! This is the only place the uptime/downtime counters are mutated —
//! every transition (register, heartbeat, go offline, suspend) reads the
//! current row, folds in elapsed wall-clock time, recomputes
//! `reliability_score` from [`fabric_metadata::reliability_score`], and
//! writes the row back in one round trip.

use crate::error::MetaResultExt;
use chrono::Utc;
use fabric_core::error::{CoordinatorError, Result};
use fabric_metadata::{reliability_score, Device, DeviceState, MetadataStore, RegisterDevice};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A point-in-time health summary for one device, independent of the
/// full `Device` row — the shape `Health(logical_device_id)` returns.
#[derive(Debug, Clone)]
pub struct DeviceHealth {
    pub logical_device_id: String,
    pub online: bool,
    pub reliability_score: f64,
    pub uptime_pct: f64,
    pub consecutive_downtime_ms: i64,
    pub last_seen_at: chrono::DateTime<Utc>,
}

/// Business logic over [`MetadataStore`]'s device rows. Cheap to clone:
/// the only state is the `MetadataStore` handle, itself `Arc`-backed.
#[derive(Clone)]
pub struct DeviceRegistry {
    store: MetadataStore,
}

impl DeviceRegistry {
    pub fn new(store: MetadataStore) -> Self {
        Self { store }
    }

    /// First sight of a `logical_device_id` creates a row at
    /// `state=ONLINE`, `reliability_score=100`, all counters zero. A
    /// reconnect of a known device folds the elapsed time since
    /// `last_seen_at` into `cumulative_downtime_ms` (it was offline for
    /// however long it took to get back), recomputes the score, and
    /// flips back to `ONLINE`.
    #[instrument(skip(self, params))]
    pub async fn register(&self, params: RegisterDevice) -> Result<Device> {
        match self
            .store
            .get_device_by_logical_id(&params.logical_device_id)
            .await.fab()?
        {
            None => {
                let device = self.store.register_device(params).await.fab()?;
                info!(device_id = %device.id, logical_device_id = %device.logical_device_id, "device registered");
                Ok(device)
            }
            Some(mut device) => {
                let elapsed_ms = (Utc::now() - device.last_seen_at).num_milliseconds().max(0);
                device.cumulative_downtime_ms += elapsed_ms;
                device.reliability_score =
                    reliability_score(device.cumulative_uptime_ms, device.cumulative_downtime_ms);
                device.state = DeviceState::Online;
                device.last_seen_at = Utc::now();
                device.total_capacity_bytes = params.total_capacity_bytes;
                device.available_capacity_bytes = params.available_capacity_bytes;
                self.store.save_device(&device).await.fab()?;
                info!(device_id = %device.id, logical_device_id = %device.logical_device_id, "device reconnected");
                Ok(device)
            }
        }
    }

    /// Fold the elapsed time since `last_seen_at` into
    /// `cumulative_uptime_ms`, refresh reported capacity, recompute the
    /// score, and bump `last_seen_at`.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, logical_device_id: &str, available_capacity_bytes: i64) -> Result<Device> {
        let mut device = self
            .store
            .get_device_by_logical_id(logical_device_id)
            .await.fab()?
            .ok_or_else(|| CoordinatorError::NotFound(format!("device {logical_device_id}")))?;

        let elapsed_ms = (Utc::now() - device.last_seen_at).num_milliseconds().max(0);
        device.cumulative_uptime_ms += elapsed_ms;
        device.reliability_score =
            reliability_score(device.cumulative_uptime_ms, device.cumulative_downtime_ms);
        device.available_capacity_bytes = available_capacity_bytes;
        device.last_seen_at = Utc::now();

        self.store.save_device(&device).await.fab()?;
        Ok(device)
    }

    /// Transition to `OFFLINE`: fold elapsed uptime in if the device was
    /// online, recompute the score, flip state. Idempotent — calling
    /// this on an already-offline device just refreshes `last_seen_at`.
    #[instrument(skip(self))]
    pub async fn mark_offline(&self, logical_device_id: &str) -> Result<Device> {
        let mut device = self
            .store
            .get_device_by_logical_id(logical_device_id)
            .await.fab()?
            .ok_or_else(|| CoordinatorError::NotFound(format!("device {logical_device_id}")))?;

        if device.state == DeviceState::Online {
            let elapsed_ms = (Utc::now() - device.last_seen_at).num_milliseconds().max(0);
            device.cumulative_uptime_ms += elapsed_ms;
            device.reliability_score =
                reliability_score(device.cumulative_uptime_ms, device.cumulative_downtime_ms);
            device.state = DeviceState::Offline;
            device.last_seen_at = Utc::now();
            self.store.save_device(&device).await.fab()?;
            warn!(device_id = %device.id, logical_device_id, "device marked offline");
        }
        Ok(device)
    }

    /// Terminal transition: `SUSPENDED` is never automatically reversed
    /// by reconnect logic. Same accounting as `mark_offline`.
    #[instrument(skip(self))]
    pub async fn suspend(&self, logical_device_id: &str) -> Result<Device> {
        let mut device = self
            .store
            .get_device_by_logical_id(logical_device_id)
            .await.fab()?
            .ok_or_else(|| CoordinatorError::NotFound(format!("device {logical_device_id}")))?;

        if device.state == DeviceState::Online {
            let elapsed_ms = (Utc::now() - device.last_seen_at).num_milliseconds().max(0);
            device.cumulative_uptime_ms += elapsed_ms;
        }
        device.reliability_score =
            reliability_score(device.cumulative_uptime_ms, device.cumulative_downtime_ms);
        device.state = DeviceState::Suspended;
        device.last_seen_at = Utc::now();
        self.store.save_device(&device).await.fab()?;
        warn!(device_id = %device.id, logical_device_id, "device suspended");
        Ok(device)
    }

    /// A lighter-weight sibling of [`Self::heartbeat`] for capacity-only
    /// reports (`device:storage:update`): refreshes `available_capacity_bytes`
    /// without touching uptime/downtime accounting or `last_seen_at`, since
    /// the device didn't necessarily just prove connectivity.
    #[instrument(skip(self))]
    pub async fn update_capacity(&self, logical_device_id: &str, available_capacity_bytes: i64) -> Result<Device> {
        let mut device = self
            .store
            .get_device_by_logical_id(logical_device_id)
            .await.fab()?
            .ok_or_else(|| CoordinatorError::NotFound(format!("device {logical_device_id}")))?;

        device.available_capacity_bytes = available_capacity_bytes;
        self.store.save_device(&device).await.fab()?;
        Ok(device)
    }

    /// `FindHealthy`: online devices with at least `min_free_bytes`
    /// available and at least `min_score` reliability, ordered
    /// `(score DESC, available DESC)`, truncated to `limit`.
    pub async fn find_healthy(&self, min_free_bytes: i64, min_score: f64, limit: i64) -> Result<Vec<Device>> {
        Ok(self.store.find_healthy_devices(min_free_bytes, min_score, limit).await.fab()?)
    }

    pub async fn health(&self, logical_device_id: &str) -> Result<DeviceHealth> {
        let device = self
            .store
            .get_device_by_logical_id(logical_device_id)
            .await.fab()?
            .ok_or_else(|| CoordinatorError::NotFound(format!("device {logical_device_id}")))?;

        let total = device.cumulative_uptime_ms + device.cumulative_downtime_ms;
        let uptime_pct = if total <= 0 {
            100.0
        } else {
            100.0 * device.cumulative_uptime_ms as f64 / total as f64
        };
        let consecutive_downtime_ms = if device.state == DeviceState::Online {
            0
        } else {
            (Utc::now() - device.last_seen_at).num_milliseconds().max(0)
        };

        Ok(DeviceHealth {
            logical_device_id: device.logical_device_id,
            online: device.state == DeviceState::Online,
            reliability_score: device.reliability_score,
            uptime_pct,
            consecutive_downtime_ms,
            last_seen_at: device.last_seen_at,
        })
    }

    pub async fn get_by_id(&self, device_id: Uuid) -> Result<Device> {
        Ok(self.store.get_device(device_id).await.fab()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_device(state: DeviceState, uptime: i64, downtime: i64) -> Device {
        Device {
            id: Uuid::new_v4(),
            logical_device_id: "d1".to_string(),
            device_type: "nas".to_string(),
            owner_id: None,
            total_capacity_bytes: 1000,
            available_capacity_bytes: 500,
            state,
            last_seen_at: Utc::now(),
            cumulative_uptime_ms: uptime,
            cumulative_downtime_ms: downtime,
            reliability_score: reliability_score(uptime, downtime),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_health_uptime_pct_matches_reliability_formula() {
        let device = make_device(DeviceState::Online, 3, 1);
        assert_eq!(device.reliability_score, 75.0);
    }

    #[test]
    fn test_offline_device_has_zero_consecutive_downtime_floor() {
        let device = make_device(DeviceState::Offline, 100, 100);
        let elapsed = (Utc::now() - device.last_seen_at).num_milliseconds().max(0);
        assert!(elapsed >= 0);
    }
}
