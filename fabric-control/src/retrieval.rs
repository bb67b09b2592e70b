//! Retrieval: reassembles a stored file's plaintext on demand.
//!
//! For each chunk, in sequence order, we resolve the chunk's live
//! holders, try each one in turn until a device successfully returns
//! ciphertext, decrypt it, and concatenate. The whole reassembled buffer
//! is checked against the file's `plaintext_hash` before being handed
//! back — per-chunk integrity checks happen implicitly via AEAD
//! decryption, but this catches any divergence across chunk boundaries.

use crate::error::MetaResultExt;
use bytes::Bytes;
use fabric_connect::ConnectionRegistry;
use fabric_core::chunk::{self, ChunkRecord, ChunkId};
use fabric_core::crypto::{Kek, WrappedDek};
use fabric_core::error::{CoordinatorError, Result};
use fabric_metadata::{Chunk, DeviceState, MetadataStore};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

pub struct Retrieval {
    store: MetadataStore,
    registry: Arc<ConnectionRegistry>,
    kek: Arc<Kek>,
}

impl Retrieval {
    pub fn new(store: MetadataStore, registry: Arc<ConnectionRegistry>, kek: Arc<Kek>) -> Self {
        Self { store, registry, kek }
    }

    /// Fetch every chunk of `file_id`, decrypt, and return the
    /// reassembled, integrity-checked plaintext.
    #[instrument(skip(self))]
    pub async fn retrieve_file(&self, file_id: Uuid) -> Result<Bytes> {
        let file = self.store.get_file(file_id).await.fab()?;
        let chunks = self.store.get_file_chunks(file_id).await.fab()?;

        let wrapped_dek = WrappedDek::from_hex(&file.wrapped_dek)?;

        let mut records = Vec::with_capacity(chunks.len());
        for row in &chunks {
            // Devices echo back the ciphertext body as they received it;
            // the AEAD tag travels alongside in the chunk row rather than
            // over the wire a second time, so reassemble it here.
            let body = self.fetch_chunk_ciphertext(row).await?;
            let mut ciphertext = Vec::with_capacity(body.len() + row.auth_tag.len());
            ciphertext.extend_from_slice(&body);
            ciphertext.extend_from_slice(&row.auth_tag);
            let ciphertext = Bytes::from(ciphertext);

            records.push(ChunkRecord {
                id: ChunkId::from_uuid(row.id),
                file_id: file_id.to_string(),
                sequence_num: row.sequence_num as u32,
                size_bytes: row.size_bytes as u64,
                iv: to_iv_array(&row.iv)?,
                aad: row.aad.clone(),
                ciphertext_hash: to_hash_array(&row.ciphertext_hash)?,
                ciphertext,
            });
        }

        chunk::reassemble_file(&self.kek, &wrapped_dek, &file_id.to_string(), &file.plaintext_hash, &records)
    }

    /// Resolve the chunk's live holders (healthy placement on an online
    /// device) and try each one until one returns the ciphertext. Order
    /// follows [`MetadataStore::resolve_holders`], least-reliable-first,
    /// which for retrieval just means we try every holder; there is no
    /// preference order documented for reads beyond availability.
    async fn fetch_chunk_ciphertext(&self, row: &Chunk) -> Result<Bytes> {
        let holders = self.store.resolve_holders(row.id).await.fab()?;
        let live: Vec<_> = holders
            .into_iter()
            .filter(|h| h.location.healthy && h.device_state == DeviceState::Online)
            .collect();

        if live.is_empty() {
            return Err(CoordinatorError::Unavailable(row.id.to_string()));
        }

        let mut last_error = None;
        for holder in live {
            match self.registry.request_chunk(&holder.device_logical_id, row.id).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    warn!(chunk_id = %row.id, device = %holder.device_logical_id, error = %e, "holder failed to serve chunk, trying next");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CoordinatorError::Unavailable(row.id.to_string())))
    }
}

fn to_iv_array(bytes: &[u8]) -> Result<[u8; fabric_core::crypto::NONCE_SIZE]> {
    bytes
        .try_into()
        .map_err(|_| CoordinatorError::Internal("corrupt chunk row: wrong iv length".to_string()))
}

fn to_hash_array(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| CoordinatorError::Internal("corrupt chunk row: wrong ciphertext hash length".to_string()))
}
