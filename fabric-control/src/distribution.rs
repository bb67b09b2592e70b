//! Distribution: fans a chunk's ciphertext out to its assigned devices
//! and reconciles replica counts from the results.
//!
//! Placement decides *which* devices hold a chunk; distribution is what
//! actually pushes bytes to them and updates the metadata store to
//! reflect what landed. A chunk's state machine (`REPLICATING` →
//! `HEALTHY`/`DEGRADED`) is driven entirely from here and from the
//! healer, which reuses the same fan-out helper for repairs.

use crate::error::MetaResultExt;
use crate::placement::Placement;
use bytes::Bytes;
use fabric_connect::registry::ChunkAssignment;
use fabric_connect::ConnectionRegistry;
use fabric_core::crypto::TAG_SIZE;
use fabric_core::error::{CoordinatorError, Result};
use fabric_core::chunk::ChunkId;
use fabric_metadata::{ChunkState, MetadataStore};
use fabric_storage::StorageBackendSync;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of fanning a chunk out to its assigned devices.
#[derive(Debug, Default)]
pub struct FanOutResult {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

impl FanOutResult {
    pub fn success_count(&self) -> i32 {
        self.succeeded.len() as i32
    }
}

/// Outcome of distributing every chunk of a file.
#[derive(Debug, Default)]
pub struct FileDistributionOutcome {
    pub chunks_distributed: usize,
    pub chunks_failed: Vec<(Uuid, String)>,
}

pub struct Distribution<S: StorageBackendSync> {
    store: MetadataStore,
    placement: Placement,
    registry: Arc<ConnectionRegistry>,
    staging: Arc<S>,
}

impl<S: StorageBackendSync> Distribution<S> {
    pub fn new(store: MetadataStore, placement: Placement, registry: Arc<ConnectionRegistry>, staging: Arc<S>) -> Self {
        Self {
            store,
            placement,
            registry,
            staging,
        }
    }

    /// Assign devices for a freshly uploaded chunk and push its
    /// ciphertext to each one concurrently. Devices that fail or time
    /// out don't block the ones that succeed (all-settled semantics);
    /// the chunk ends `HEALTHY` if every assigned device confirmed, or
    /// `DEGRADED` if only some did.
    #[instrument(skip(self))]
    pub async fn distribute_chunk(&self, chunk_id: Uuid) -> Result<FanOutResult> {
        let chunk = self.store.get_chunk(chunk_id).await.fab()?;
        let ciphertext = self
            .staging
            .get(ChunkId::from_uuid(chunk_id))?
            .ok_or_else(|| CoordinatorError::NotFound(format!("staged ciphertext for chunk {chunk_id}")))?;

        let device_ids = self.placement.assign(chunk_id, chunk.size_bytes).await?;
        let result = self.fan_out(chunk_id, &chunk.iv, &chunk.aad, &chunk.ciphertext_hash, ciphertext, &device_ids).await?;

        if result.success_count() >= chunk.target_replicas {
            self.store.update_chunk_state(chunk_id, ChunkState::Healthy).await.fab()?;
        } else if result.success_count() > 0 {
            self.store.update_chunk_state(chunk_id, ChunkState::Degraded).await.fab()?;
        }
        self.store.set_chunk_current_replicas(chunk_id, result.success_count()).await.fab()?;

        Ok(result)
    }

    /// Push `ciphertext` to every device in `device_ids`, updating each
    /// placement's health and the device's available capacity as results
    /// arrive. Used both for the initial distribution and by the healer
    /// when it assigns replacement devices to an under-replicated chunk.
    pub async fn fan_out(
        &self,
        chunk_id: Uuid,
        iv: &[u8],
        aad: &[u8],
        checksum: &[u8],
        ciphertext_with_tag: Bytes,
        device_ids: &[Uuid],
    ) -> Result<FanOutResult> {
        let (ciphertext, auth_tag) = split_tag(&ciphertext_with_tag);
        let chunk = self.store.get_chunk(chunk_id).await.fab()?;

        let mut futures = Vec::with_capacity(device_ids.len());
        for &device_id in device_ids {
            let ciphertext = ciphertext.clone();
            let auth_tag = auth_tag.clone();
            let iv = iv.to_vec();
            let aad = aad.to_vec();
            let checksum = checksum.to_vec();
            let file_id = chunk.file_id;
            let sequence_num = chunk.sequence_num;
            let size_bytes = chunk.size_bytes;
            let store = self.store.clone();
            let registry = self.registry.clone();

            futures.push(async move {
                let device = match store.get_device(device_id).await {
                    Ok(d) => d,
                    Err(e) => return (device_id, Err(e.to_string())),
                };
                let assignment = ChunkAssignment {
                    chunk_id,
                    file_id,
                    sequence_num,
                    size_bytes,
                    iv,
                    auth_tag,
                    aad,
                    checksum,
                    ciphertext,
                };
                let result = registry.send_chunk(&device.logical_device_id, assignment).await;
                (device_id, result.map_err(|e| e.to_string()))
            });
        }

        let outcomes = futures::future::join_all(futures).await;
        let mut result = FanOutResult::default();
        for (device_id, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    self.store.set_location_healthy(chunk_id, device_id, true).await.fab()?;
                    self.store.debit_device_capacity(device_id, chunk.size_bytes).await.fab()?;
                    result.succeeded.push(device_id);
                }
                Err(reason) => {
                    warn!(%chunk_id, %device_id, %reason, "chunk distribution to device failed");
                    self.store.set_location_healthy(chunk_id, device_id, false).await.fab()?;
                    result.failed.push((device_id, reason));
                }
            }
        }
        Ok(result)
    }

    /// Distribute every chunk of a file, in sequence order. A failure on
    /// one chunk is recorded but does not stop later chunks from being
    /// distributed — partial replication is recoverable by the healer,
    /// a halted upload is not.
    #[instrument(skip(self))]
    pub async fn distribute_file(&self, file_id: Uuid) -> Result<FileDistributionOutcome> {
        let chunks = self.store.get_file_chunks(file_id).await.fab()?;
        let mut outcome = FileDistributionOutcome::default();

        for chunk in chunks {
            match self.distribute_chunk(chunk.id).await {
                Ok(result) if !result.succeeded.is_empty() => {
                    outcome.chunks_distributed += 1;
                }
                Ok(_) => {
                    outcome.chunks_failed.push((chunk.id, "no device accepted the chunk".to_string()));
                }
                Err(e) => {
                    outcome.chunks_failed.push((chunk.id, e.to_string()));
                }
            }
        }

        info!(
            %file_id,
            distributed = outcome.chunks_distributed,
            failed = outcome.chunks_failed.len(),
            "file distribution complete"
        );
        Ok(outcome)
    }
}

/// Split a GCM ciphertext (tag appended, the AES-GCM crate convention)
/// into the wire protocol's separate `ciphertext` / `auth_tag` fields.
fn split_tag(ciphertext_with_tag: &Bytes) -> (Bytes, Vec<u8>) {
    let len = ciphertext_with_tag.len();
    if len < TAG_SIZE {
        return (ciphertext_with_tag.clone(), Vec::new());
    }
    let split_at = len - TAG_SIZE;
    let ciphertext = ciphertext_with_tag.slice(0..split_at);
    let auth_tag = ciphertext_with_tag[split_at..].to_vec();
    (ciphertext, auth_tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tag_separates_trailing_bytes() {
        let mut data = vec![1u8; 32];
        data.extend_from_slice(&[9u8; TAG_SIZE]);
        let (ciphertext, tag) = split_tag(&Bytes::from(data));
        assert_eq!(ciphertext.len(), 32);
        assert_eq!(tag, vec![9u8; TAG_SIZE]);
    }

    #[test]
    fn test_split_tag_handles_undersized_input() {
        let data = Bytes::from(vec![1u8; 4]);
        let (ciphertext, tag) = split_tag(&data);
        assert_eq!(ciphertext.len(), 4);
        assert!(tag.is_empty());
    }
}
