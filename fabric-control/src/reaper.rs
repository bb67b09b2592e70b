//! Reaper: consumes delete-file and trim-excess jobs off its own
//! [`InMemoryJobQueue`], kept separate from the healer's so neither pool
//! can steal or discard the other's work.
//!
//! A file delete removes a file's chunks from every device that holds
//! them and then drops the metadata rows regardless of device state,
//! since the file row itself is going away either way. A trim removes
//! the chunk from its least-reliable excess holders only, leaving it at
//! target replication; an offline victim can't be told to delete
//! anything, so its placement is left in place, just marked unhealthy,
//! for the scanner to reconcile later.

use crate::error::MetaResultExt;
use crate::jobs::{InMemoryJobQueue, Job, JobKind};
use fabric_connect::ConnectionRegistry;
use fabric_core::error::Result;
use fabric_metadata::{ChunkState, DeviceState, MetadataStore};
use std::sync::Arc;
use tracing::{error, instrument, warn};
use uuid::Uuid;

pub struct Reaper {
    metadata: MetadataStore,
    registry: Arc<ConnectionRegistry>,
    queue: Arc<InMemoryJobQueue>,
    concurrency: usize,
    safety_margin: u32,
}

impl Reaper {
    pub fn new(
        metadata: MetadataStore,
        registry: Arc<ConnectionRegistry>,
        queue: Arc<InMemoryJobQueue>,
        concurrency: usize,
        safety_margin: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            metadata,
            registry,
            queue,
            concurrency,
            safety_margin,
        })
    }

    /// Spawn the worker pool; returns immediately, workers run until the
    /// process exits.
    pub fn spawn(self: &Arc<Self>) {
        for worker_id in 0..self.concurrency {
            let reaper = self.clone();
            tokio::spawn(async move { reaper.run_worker(worker_id).await });
        }
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize) {
        loop {
            let job = self.queue.pop().await;
            if !matches!(job.kind, JobKind::DeleteFile { .. } | JobKind::TrimExcess { .. }) {
                // Shouldn't happen: this queue is dedicated to reaper jobs.
                // Push back rather than drop, in case it ever does.
                warn!(worker_id, job_id = %job.id, "reaper's queue yielded a non-reaper job, pushing it back");
                self.queue.push(job).await;
                continue;
            }
            self.handle_job(job).await;
        }
    }

    async fn handle_job(&self, job: Job) {
        let result = match &job.kind {
            JobKind::DeleteFile { file_id, .. } => self.delete_file(*file_id).await,
            JobKind::TrimExcess { chunk_id } => self.trim_excess(*chunk_id).await,
            _ => return,
        };
        if let Err(e) = result {
            if job.exhausted() {
                error!(job_id = %job.id, error = %e, attempts = job.attempt, "giving up on reaper job after max attempts");
            } else {
                warn!(job_id = %job.id, error = %e, attempt = job.attempt, "reaper job failed, requeueing with backoff");
                self.queue.requeue(job).await;
            }
        }
    }

    /// Remove a file's chunks from every device that holds them, then
    /// drop the file's metadata rows. Each chunk's holders are told to
    /// delete concurrently on a best-effort basis; an offline holder
    /// just has its placement row dropped since there's no one to ask.
    #[instrument(skip(self))]
    async fn delete_file(&self, file_id: Uuid) -> Result<()> {
        let chunks = self.metadata.get_file_chunks(file_id).await.fab()?;
        for chunk in &chunks {
            let holders = self.metadata.resolve_holders(chunk.id).await.fab()?;
            let mut futures = Vec::with_capacity(holders.len());
            for holder in holders {
                let registry = self.registry.clone();
                let metadata = self.metadata.clone();
                let chunk_id = chunk.id;
                let device_id = holder.location.device_id;
                let size_bytes = chunk.size_bytes;
                futures.push(async move {
                    if holder.device_state == DeviceState::Online {
                        let _ = registry
                            .delete_chunk(&holder.device_logical_id, chunk_id, "file deleted")
                            .await;
                    }
                    let _ = metadata.delete_chunk_location(chunk_id, device_id).await;
                    let _ = metadata.credit_device_capacity(device_id, size_bytes).await;
                });
            }
            futures::future::join_all(futures).await;
        }

        self.metadata.delete_file_cascade(file_id).await.fab()?;
        Ok(())
    }

    /// Bring an over-replicated chunk back down to `target_replicas +
    /// safety_margin` by instructing its least-reliable excess holders to
    /// delete their copy. [`MetadataStore::resolve_holders`] already orders
    /// least-reliable first, so the excess to remove is simply the head of
    /// the list.
    #[instrument(skip(self))]
    async fn trim_excess(&self, chunk_id: Uuid) -> Result<()> {
        let chunk = self.metadata.get_chunk(chunk_id).await.fab()?;
        let holders = self.metadata.resolve_holders(chunk_id).await.fab()?;
        let healthy: Vec<_> = holders.into_iter().filter(|h| h.location.healthy).collect();

        let cap = chunk.target_replicas + self.safety_margin as i32;
        let excess = healthy.len() as i32 - cap;
        if excess <= 0 {
            return Ok(());
        }

        let victims = &healthy[..excess as usize];
        let mut removed = 0i32;
        for holder in victims {
            let device_id = holder.location.device_id;
            if holder.device_state != DeviceState::Online {
                // Can't ask an offline device to delete anything; mark the
                // placement unhealthy and leave it for the scanner to
                // reconcile once the device comes back or is reassigned.
                self.metadata.set_location_healthy(chunk_id, device_id, false).await.fab()?;
                continue;
            }
            if self
                .registry
                .delete_chunk(&holder.device_logical_id, chunk_id, "excess replica trim")
                .await
                .is_err()
            {
                warn!(%chunk_id, %device_id, "victim device rejected trim, leaving its copy in place");
                continue;
            }
            self.metadata.delete_chunk_location(chunk_id, device_id).await.fab()?;
            self.metadata.credit_device_capacity(device_id, chunk.size_bytes).await.fab()?;
            removed += 1;
        }

        let total_healthy = self.metadata.count_healthy_holders(chunk_id).await.fab()? as i32;
        self.metadata.set_chunk_current_replicas(chunk_id, total_healthy).await.fab()?;
        if total_healthy >= chunk.target_replicas {
            self.metadata.update_chunk_state(chunk_id, ChunkState::Healthy).await.fab()?;
        }
        let _ = removed;
        Ok(())
    }
}
