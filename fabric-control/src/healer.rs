//! Healer: consumes heal-chunk jobs and brings under-replicated chunks
//! back up to their target replica count.
//!
//! Runs a fixed pool of workers pulling from a heal-only
//! [`InMemoryJobQueue`], separate from the reaper's queue so a burst of
//! one kind can never starve or discard the other's jobs. A job that
//! fails (no candidate devices, every new device rejected the transfer)
//! is requeued with the kind's backoff up to its max attempt count;
//! beyond that it's logged and dropped; the next health scan will pick
//! the chunk up again if it's still unhealthy.

use crate::distribution::Distribution;
use crate::error::MetaResultExt;
use crate::jobs::{InMemoryJobQueue, Job, JobKind};
use crate::placement::Placement;
use bytes::Bytes;
use fabric_connect::ConnectionRegistry;
use fabric_core::chunk::ChunkId;
use fabric_core::error::{CoordinatorError, Result};
use fabric_metadata::{Chunk, ChunkState, DeviceState, MetadataStore};
use fabric_storage::StorageBackendSync;
use std::sync::Arc;
use tracing::{error, instrument, warn};

pub struct Healer<S: StorageBackendSync + 'static> {
    metadata: MetadataStore,
    placement: Placement,
    distribution: Arc<Distribution<S>>,
    registry: Arc<ConnectionRegistry>,
    staging: Arc<S>,
    queue: Arc<InMemoryJobQueue>,
    concurrency: usize,
}

impl<S: StorageBackendSync + 'static> Healer<S> {
    pub fn new(
        metadata: MetadataStore,
        placement: Placement,
        distribution: Arc<Distribution<S>>,
        registry: Arc<ConnectionRegistry>,
        staging: Arc<S>,
        queue: Arc<InMemoryJobQueue>,
        concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            placement,
            distribution,
            registry,
            staging,
            queue,
            concurrency,
        })
    }

    /// Spawn the worker pool; returns immediately, workers run until the
    /// process exits.
    pub fn spawn(self: &Arc<Self>) {
        for worker_id in 0..self.concurrency {
            let healer = self.clone();
            tokio::spawn(async move { healer.run_worker(worker_id).await });
        }
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        loop {
            let job = self.queue.pop().await;
            if !matches!(job.kind, JobKind::HealChunk { .. }) {
                // Shouldn't happen: this queue is dedicated to heal jobs.
                // Push back rather than drop, in case it ever does.
                warn!(worker_id, job_id = %job.id, "healer's queue yielded a non-heal job, pushing it back");
                self.queue.push(job).await;
                continue;
            }
            self.handle_job(job).await;
        }
    }

    async fn handle_job(&self, job: Job) {
        let chunk_id = match &job.kind {
            JobKind::HealChunk { chunk_id, .. } => *chunk_id,
            _ => return,
        };
        match self.heal(chunk_id).await {
            Ok(()) => {}
            Err(e) => {
                if job.exhausted() {
                    error!(%chunk_id, error = %e, attempts = job.attempt, "giving up healing chunk after max attempts");
                } else {
                    warn!(%chunk_id, error = %e, attempt = job.attempt, "heal attempt failed, requeueing with backoff");
                    self.queue.requeue(job).await;
                }
            }
        }
    }

    /// Reload the chunk, reassign replacement devices if it's still
    /// short of target, push ciphertext to the new holders, and
    /// recompute state from the result.
    #[instrument(skip(self))]
    async fn heal(&self, chunk_id: uuid::Uuid) -> Result<()> {
        let chunk = self.metadata.get_chunk(chunk_id).await.fab()?;
        let healthy = self.metadata.count_healthy_holders(chunk_id).await.fab()? as i32;
        if healthy >= chunk.target_replicas {
            self.metadata.update_chunk_state(chunk_id, ChunkState::Healthy).await.fab()?;
            return Ok(());
        }

        let new_devices = self
            .placement
            .reassign(chunk_id, chunk.target_replicas, chunk.size_bytes)
            .await?;
        if new_devices.is_empty() {
            return Err(CoordinatorError::InsufficientCapacity {
                needed: chunk.target_replicas as usize,
                found: healthy as usize,
            });
        }

        let ciphertext = self.ciphertext_for_heal(&chunk).await?;
        let fan_out = self
            .distribution
            .fan_out(chunk_id, &chunk.iv, &chunk.aad, &chunk.ciphertext_hash, ciphertext, &new_devices)
            .await?;

        let total_healthy = self.metadata.count_healthy_holders(chunk_id).await.fab()? as i32;
        self.metadata.set_chunk_current_replicas(chunk_id, total_healthy).await.fab()?;
        let state = if total_healthy >= chunk.target_replicas {
            ChunkState::Healthy
        } else {
            ChunkState::Degraded
        };
        self.metadata.update_chunk_state(chunk_id, state).await.fab()?;

        if fan_out.succeeded.is_empty() {
            return Err(CoordinatorError::Internal(format!(
                "heal fan-out: none of {} new devices accepted chunk {chunk_id}",
                new_devices.len()
            )));
        }
        Ok(())
    }

    /// The chunk's full ciphertext (with its AEAD tag), preferring the
    /// local staging copy and falling back to pulling it back from a
    /// device that already has it healthy.
    async fn ciphertext_for_heal(&self, chunk: &Chunk) -> Result<Bytes> {
        if let Some(body) = self.staging.get(ChunkId::from_uuid(chunk.id))? {
            return Ok(body);
        }

        let holders = self.metadata.resolve_holders(chunk.id).await.fab()?;
        for holder in holders
            .into_iter()
            .filter(|h| h.location.healthy && h.device_state == DeviceState::Online)
        {
            if let Ok(body) = self.registry.request_chunk(&holder.device_logical_id, chunk.id).await {
                let mut full = Vec::with_capacity(body.len() + chunk.auth_tag.len());
                full.extend_from_slice(&body);
                full.extend_from_slice(&chunk.auth_tag);
                return Ok(Bytes::from(full));
            }
        }

        Err(CoordinatorError::Unavailable(chunk.id.to_string()))
    }
}
