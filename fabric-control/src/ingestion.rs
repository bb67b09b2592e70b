//! Ingestion: the upload-side glue between the chunker, the temporary
//! store, and distribution.
//!
//! The HTTP surface that actually receives a file is out of scope here
//! (it's an external collaborator); this module is the one place that
//! composes the data flow that surface drives: `Chunker → Temporary
//! store → metadata rows → Distribution`. Each chunk is staged and
//! distributed independently so a failure on one doesn't block the rest
//! of the file.

use crate::distribution::{Distribution, FileDistributionOutcome};
use crate::error::MetaResultExt;
use fabric_core::chunk::{self, ChunkId, ChunkSizePolicy};
use fabric_core::crypto::{Kek, TAG_SIZE};
use fabric_core::error::Result;
use fabric_metadata::{CreateChunk, CreateFile, MetadataStore};
use fabric_storage::StorageBackendSync;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

pub struct Ingestion<S: StorageBackendSync> {
    store: MetadataStore,
    distribution: Distribution<S>,
    staging: Arc<S>,
    kek: Arc<Kek>,
    policy: ChunkSizePolicy,
    max_file_size: u64,
}

impl<S: StorageBackendSync> Ingestion<S> {
    pub fn new(
        store: MetadataStore,
        distribution: Distribution<S>,
        staging: Arc<S>,
        kek: Arc<Kek>,
        policy: ChunkSizePolicy,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            distribution,
            staging,
            kek,
            policy,
            max_file_size,
        }
    }

    /// Chunk, encrypt, stage, and distribute `buf` as a new file named
    /// `original_name`. Returns the new file's id; the file is left in
    /// `ACTIVE` state once every chunk row exists, regardless of how many
    /// replicas distribution actually landed — partial replication is the
    /// healer's job, not the uploader's.
    #[instrument(skip(self, buf))]
    pub async fn ingest(&self, buf: &[u8], original_name: &str, mime: &str) -> Result<(Uuid, FileDistributionOutcome)> {
        let file_id = Uuid::new_v4();
        let processed = chunk::process_file(
            &self.kek,
            buf,
            original_name,
            mime,
            &file_id.to_string(),
            self.policy,
            self.max_file_size,
        )?;

        // `file_id` is already bound into every chunk's AAD and derived
        // key by `process_file`, so the persisted row must carry this
        // exact id rather than one the database mints on insert.
        self
            .store
            .create_file(CreateFile {
                id: file_id,
                original_name: original_name.to_string(),
                mime: mime.to_string(),
                size_bytes: processed.file_meta.size_bytes as i64,
                owner_id: None,
                wrapped_dek: processed.file_meta.wrapped_dek.to_hex(),
                dek_id: processed.file_meta.dek_id.to_hex(),
                plaintext_hash: processed.file_meta.plaintext_hash.clone(),
                chunk_count: processed.file_meta.chunk_count as i32,
            })
            .await.fab()?;

        for record in &processed.chunks {
            // `record.ciphertext` carries the AEAD tag appended (the
            // crypto layer's convention); the metadata row keeps the tag
            // separately so the wire protocol can send it apart from the
            // ciphertext body, the same split `fan_out` performs when it
            // actually pushes bytes to a device.
            let tag_at = record.ciphertext.len().saturating_sub(TAG_SIZE);
            let auth_tag = record.ciphertext[tag_at..].to_vec();

            let chunk_row = self
                .store
                .create_chunk(CreateChunk {
                    file_id,
                    sequence_num: record.sequence_num as i32,
                    size_bytes: record.size_bytes as i64,
                    iv: record.iv.to_vec(),
                    auth_tag,
                    aad: record.aad.clone(),
                    ciphertext_hash: record.ciphertext_hash.to_vec(),
                    target_replicas: fabric_core::DEFAULT_TARGET_REPLICAS as i32,
                })
                .await.fab()?;

            self.staging.put(ChunkId::from_uuid(chunk_row.id), record.ciphertext.clone())?;
        }

        self.store.activate_file(file_id).await.fab()?;
        let outcome = self.distribution.distribute_file(file_id).await?;

        info!(%file_id, chunks = processed.chunks.len(), distributed = outcome.chunks_distributed, "file ingested");
        Ok((file_id, outcome))
    }
}
