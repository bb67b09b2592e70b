//! Placement engine: picks which devices hold a chunk's replicas.
//!
//! `assign` runs once per chunk at upload time; `reassign` runs whenever
//! the health scanner or healer finds a chunk short of its target and
//! needs to pick replacement devices.

use crate::error::MetaResultExt;
use fabric_core::error::{CoordinatorError, Result};
use fabric_metadata::{ChunkState, Device, MetadataStore};
use std::collections::HashSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct PlacementConfig {
    pub redundancy_factor: u32,
    pub min_reliability_for_placement: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            redundancy_factor: fabric_core::DEFAULT_TARGET_REPLICAS,
            min_reliability_for_placement: 70.0,
        }
    }
}

pub struct Placement {
    store: MetadataStore,
    config: PlacementConfig,
}

impl Placement {
    pub fn new(store: MetadataStore, config: PlacementConfig) -> Self {
        Self { store, config }
    }

    /// Select `redundancy_factor` devices for a brand-new chunk, create
    /// the placement rows, and return the chosen device ids. Candidates
    /// are the healthiest, most spacious online devices; we ask for
    /// `3 * redundancy_factor` so a handful of ties or races don't starve
    /// the final selection.
    #[instrument(skip(self))]
    pub async fn assign(&self, chunk_id: Uuid, chunk_size_bytes: i64) -> Result<Vec<Uuid>> {
        let rf = self.config.redundancy_factor as i64;
        let candidates = self
            .store
            .find_healthy_devices(chunk_size_bytes, self.config.min_reliability_for_placement, rf * 3)
            .await.fab()?;

        if (candidates.len() as i64) < rf {
            return Err(CoordinatorError::InsufficientCapacity {
                needed: rf as usize,
                found: candidates.len(),
            });
        }

        let chosen: Vec<&Device> = candidates.iter().take(rf as usize).collect();
        let mut device_ids = Vec::with_capacity(chosen.len());
        for device in &chosen {
            self.store
                .insert_chunk_location(chunk_id, device.id, &device.logical_device_id, true)
                .await.fab()?;
            device_ids.push(device.id);
        }

        self.store.update_chunk_state(chunk_id, ChunkState::Replicating).await.fab()?;
        self.store.set_chunk_current_replicas(chunk_id, 0).await.fab()?;

        info!(%chunk_id, devices = device_ids.len(), "chunk placed");
        Ok(device_ids)
    }

    /// Top up a chunk that has fewer healthy holders than its target.
    /// Returns the newly chosen device ids (empty if nothing to do, or
    /// if no candidates were available — the caller re-tries later via
    /// the healer's backoff rather than treating this as an error).
    #[instrument(skip(self))]
    pub async fn reassign(&self, chunk_id: Uuid, target_replicas: i32, chunk_size_bytes: i64) -> Result<Vec<Uuid>> {
        let holders = self.store.resolve_holders(chunk_id).await.fab()?;
        let healthy_count = holders.iter().filter(|h| h.location.healthy).count() as i32;
        let missing = target_replicas - healthy_count;
        if missing <= 0 {
            return Ok(Vec::new());
        }

        let existing: HashSet<Uuid> = holders.iter().map(|h| h.location.device_id).collect();
        let candidates = self
            .store
            .find_healthy_devices(
                chunk_size_bytes,
                self.config.min_reliability_for_placement,
                (missing as i64) * 3 + existing.len() as i64,
            )
            .await.fab()?;

        let chosen: Vec<&Device> = candidates
            .iter()
            .filter(|d| !existing.contains(&d.id))
            .take(missing as usize)
            .collect();

        if chosen.is_empty() {
            warn!(%chunk_id, missing, "no healthy candidates available for reassignment");
            return Ok(Vec::new());
        }

        let mut device_ids = Vec::with_capacity(chosen.len());
        for device in &chosen {
            self.store
                .insert_chunk_location(chunk_id, device.id, &device.logical_device_id, false)
                .await.fab()?;
            device_ids.push(device.id);
        }
        self.store.update_chunk_state(chunk_id, ChunkState::Replicating).await.fab()?;

        info!(%chunk_id, new_devices = device_ids.len(), missing, "chunk reassigned");
        Ok(device_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_core_constants() {
        let config = PlacementConfig::default();
        assert_eq!(config.redundancy_factor, fabric_core::DEFAULT_TARGET_REPLICAS);
    }
}
