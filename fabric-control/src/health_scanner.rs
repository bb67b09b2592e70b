//! Health scanner: the periodic sweep that finds under- and
//! over-replicated chunks and turns them into jobs for the healer and
//! reaper.
//!
//! Exposed over a narrow trait rather than the full [`MetadataStore`] —
//! the same seam the original classifier used for its metadata/network
//! clients — so a scan can be exercised against an in-memory fake
//! without a database.

use crate::error::MetaResultExt;
use crate::jobs::{InMemoryJobQueue, JobKind};
use async_trait::async_trait;
use fabric_core::error::Result;
use fabric_metadata::{Chunk, ChunkState, MetadataStore};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What the scanner needs from the metadata store. Narrow on purpose:
/// scan logic shouldn't know about devices, files, or caching.
#[async_trait]
pub trait HealthMetadataClient: Send + Sync {
    async fn list_chunks_in_states(&self, states: &[ChunkState]) -> Result<Vec<Chunk>>;
    async fn count_healthy_holders(&self, chunk_id: Uuid) -> Result<i64>;
    async fn update_chunk_state(&self, chunk_id: Uuid, state: ChunkState) -> Result<()>;
    async fn chunks_on_device(&self, device_id: Uuid) -> Result<Vec<Chunk>>;
    async fn mark_device_locations_unhealthy(&self, device_id: Uuid) -> Result<Vec<Uuid>>;
}

#[async_trait]
impl HealthMetadataClient for MetadataStore {
    async fn list_chunks_in_states(&self, states: &[ChunkState]) -> Result<Vec<Chunk>> {
        Ok(self.list_chunks_in_states(states).await.fab()?)
    }
    async fn count_healthy_holders(&self, chunk_id: Uuid) -> Result<i64> {
        Ok(self.count_healthy_holders(chunk_id).await.fab()?)
    }
    async fn update_chunk_state(&self, chunk_id: Uuid, state: ChunkState) -> Result<()> {
        Ok(self.update_chunk_state(chunk_id, state).await.fab()?)
    }
    async fn chunks_on_device(&self, device_id: Uuid) -> Result<Vec<Chunk>> {
        Ok(self.get_chunks_on_device(device_id).await.fab()?)
    }
    async fn mark_device_locations_unhealthy(&self, device_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.mark_device_locations_unhealthy(device_id).await.fab()?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScanSummary {
    pub chunks_scanned: usize,
    pub heal_jobs_enqueued: usize,
    pub trim_jobs_enqueued: usize,
}

pub struct HealthScanner<M: HealthMetadataClient> {
    metadata: Arc<M>,
    heal_queue: Arc<InMemoryJobQueue>,
    reap_queue: Arc<InMemoryJobQueue>,
    safety_margin: u32,
}

const SCANNED_STATES: &[ChunkState] = &[ChunkState::Replicating, ChunkState::Healthy, ChunkState::Degraded];

impl<M: HealthMetadataClient> HealthScanner<M> {
    /// `heal_queue` and `reap_queue` must be the same queues the healer
    /// and reaper worker pools (respectively) were spawned against — each
    /// pool only ever pops the kinds the other produces, so the scanner
    /// routing a `HealChunk` to `heal_queue` and a `TrimExcess` to
    /// `reap_queue` keeps every job in front of a worker that knows what
    /// to do with it.
    pub fn new(metadata: Arc<M>, heal_queue: Arc<InMemoryJobQueue>, reap_queue: Arc<InMemoryJobQueue>, safety_margin: u32) -> Self {
        Self {
            metadata,
            heal_queue,
            reap_queue,
            safety_margin,
        }
    }

    /// Sweep every chunk in an active replication state. Runs on
    /// `scan_interval` and once at startup.
    #[instrument(skip(self))]
    pub async fn scan_all(&self) -> Result<ScanSummary> {
        let chunks = self.metadata.list_chunks_in_states(SCANNED_STATES).await?;
        let mut summary = ScanSummary {
            chunks_scanned: chunks.len(),
            heal_jobs_enqueued: 0,
            trim_jobs_enqueued: 0,
        };

        for chunk in chunks {
            let healthy = self.metadata.count_healthy_holders(chunk.id).await? as i32;
            if healthy < chunk.target_replicas {
                self.enqueue_heal(chunk.id, healthy, chunk.target_replicas).await?;
                summary.heal_jobs_enqueued += 1;
            } else if healthy > chunk.target_replicas + self.safety_margin as i32 {
                self.reap_queue.push_kind(JobKind::TrimExcess { chunk_id: chunk.id }).await;
                summary.trim_jobs_enqueued += 1;
            }
        }

        info!(
            scanned = summary.chunks_scanned,
            heals = summary.heal_jobs_enqueued,
            trims = summary.trim_jobs_enqueued,
            "health scan complete"
        );
        Ok(summary)
    }

    async fn enqueue_heal(&self, chunk_id: Uuid, current: i32, target: i32) -> Result<()> {
        let state = if current <= 0 { ChunkState::Lost } else { ChunkState::Degraded };
        self.metadata.update_chunk_state(chunk_id, state).await?;
        self.heal_queue
            .push_kind(JobKind::HealChunk {
                chunk_id,
                current_replicas: current,
                target_replicas: target,
            })
            .await;
        Ok(())
    }

    /// A narrower sweep than [`Self::scan_all`]: only looks for
    /// over-replicated chunks and enqueues trims. Driven by its own
    /// `trim_interval`, which is typically much longer than `scan_interval`
    /// since excess replicas waste capacity but never put data at risk.
    #[instrument(skip(self))]
    pub async fn scan_excess(&self) -> Result<usize> {
        let chunks = self.metadata.list_chunks_in_states(SCANNED_STATES).await?;
        let mut trims = 0usize;
        for chunk in chunks {
            let healthy = self.metadata.count_healthy_holders(chunk.id).await? as i32;
            if healthy > chunk.target_replicas + self.safety_margin as i32 {
                self.reap_queue.push_kind(JobKind::TrimExcess { chunk_id: chunk.id }).await;
                trims += 1;
            }
        }
        info!(trims, "excess-replica sweep complete");
        Ok(trims)
    }

    /// Run synchronously the moment a device transitions away from
    /// `ONLINE`: every chunk it held is now down one holder, so recheck
    /// each one immediately rather than waiting for the next periodic
    /// sweep.
    #[instrument(skip(self))]
    pub async fn detect_affected(&self, device_id: Uuid) -> Result<usize> {
        let affected = self.metadata.mark_device_locations_unhealthy(device_id).await?;
        for chunk_id in &affected {
            let healthy = self.metadata.count_healthy_holders(*chunk_id).await? as i32;
            let chunk = self
                .metadata
                .chunks_on_device(device_id)
                .await?
                .into_iter()
                .find(|c| c.id == *chunk_id);
            let target = chunk.map(|c| c.target_replicas).unwrap_or(fabric_core::DEFAULT_TARGET_REPLICAS as i32);
            if healthy < target {
                self.enqueue_heal(*chunk_id, healthy, target).await?;
            }
        }
        if !affected.is_empty() {
            warn!(%device_id, chunks_affected = affected.len(), "device went offline, chunks re-queued for healing");
        }
        Ok(affected.len())
    }
}
