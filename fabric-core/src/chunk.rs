//! The chunker: splits a file into an ordered sequence of encrypted
//! chunks using adaptive sizing, and pins the whole-file hash.

use crate::crypto::{self, DekId, EncryptedChunk, Kek, WrappedDek};
use crate::error::{CoordinatorError, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// 1 GiB threshold: files at or below this size become a single chunk.
pub const SMALL_FILE_THRESHOLD: u64 = GIB;
/// 5 GiB threshold: files above this use 1 GiB chunks instead of 500 MiB.
pub const LARGE_FILE_THRESHOLD: u64 = 5 * GIB;
/// Chunk size used in the (1 GiB, 5 GiB] tier.
pub const MEDIUM_CHUNK_SIZE: u64 = 500 * MIB;
/// Chunk size used above the large-file threshold.
pub const LARGE_CHUNK_SIZE: u64 = GIB;

/// Opaque content identifier for a chunk. Chunk identity in this design is
/// `(file_id, sequence_num)`, not content address; `ChunkId` is simply a
/// fresh random row identifier, distinct from the legacy notion of a
/// content-addressed CID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkId(Uuid);

impl ChunkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing id — used to address the staging store by a
    /// chunk's metadata-store row id rather than minting a fresh one.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn to_string_id(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ChunkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChunkId({})", self.0)
    }
}

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Determines how a file's plaintext is split into chunks. The default in
/// production is [`ChunkSizePolicy::Adaptive`]; [`ChunkSizePolicy::Fixed`]
/// exists for legacy/small-scale configurations and tests, and the two
/// must never be mixed implicitly — callers pick one at construction time.
#[derive(Debug, Clone, Copy)]
pub enum ChunkSizePolicy {
    /// The tiered sizing table: 1 chunk up to 1 GiB, 500 MiB pieces up to
    /// 5 GiB, 1 GiB pieces beyond that.
    Adaptive,
    /// A single fixed piece size, used by deployments that opt out of
    /// adaptive sizing.
    Fixed(u64),
}

impl ChunkSizePolicy {
    /// Compute the plaintext size of each chunk for a file of `file_size`
    /// bytes. The last chunk may be smaller than the nominal size.
    pub fn plan(&self, file_size: u64) -> Vec<u64> {
        if file_size == 0 {
            return Vec::new();
        }
        let piece_size = match self {
            ChunkSizePolicy::Fixed(size) => *size,
            ChunkSizePolicy::Adaptive => {
                if file_size <= SMALL_FILE_THRESHOLD {
                    file_size
                } else if file_size <= LARGE_FILE_THRESHOLD {
                    MEDIUM_CHUNK_SIZE
                } else {
                    LARGE_CHUNK_SIZE
                }
            }
        };
        let piece_size = piece_size.max(1);
        let chunk_count = file_size.div_ceil(piece_size);
        let mut sizes = Vec::with_capacity(chunk_count as usize);
        let mut remaining = file_size;
        for _ in 0..chunk_count {
            let this_size = remaining.min(piece_size);
            sizes.push(this_size);
            remaining -= this_size;
        }
        sizes
    }
}

impl Default for ChunkSizePolicy {
    fn default() -> Self {
        ChunkSizePolicy::Adaptive
    }
}

/// One encrypted piece of a file, ready to hand to the placement engine.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub file_id: String,
    pub sequence_num: u32,
    pub size_bytes: u64,
    pub iv: [u8; crypto::NONCE_SIZE],
    pub aad: Vec<u8>,
    pub ciphertext_hash: [u8; 32],
    pub ciphertext: Bytes,
}

/// Metadata describing the file a [`ChunkRecord`] sequence belongs to.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub original_name: String,
    pub mime: String,
    pub size_bytes: u64,
    pub wrapped_dek: WrappedDek,
    pub dek_id: DekId,
    pub plaintext_hash: String,
    pub chunk_count: u32,
}

/// Result of [`process_file`]: the file's metadata plus its ordered,
/// encrypted chunks.
pub struct ProcessedFile {
    pub file_meta: FileMeta,
    pub chunks: Vec<ChunkRecord>,
}

/// Split `buf` into chunks per `policy`, encrypt each one under a freshly
/// issued DEK, and pin `plaintext_hash = SHA256(buf)` for end-to-end
/// integrity at retrieval time.
///
/// `file_id` identifies the file for HKDF key derivation and AAD binding;
/// callers typically generate it before calling so the same id can be used
/// to persist the resulting `File` row.
pub fn process_file(
    kek: &Kek,
    buf: &[u8],
    name: &str,
    mime: &str,
    file_id: &str,
    policy: ChunkSizePolicy,
    max_file_size: u64,
) -> Result<ProcessedFile> {
    if buf.is_empty() {
        return Err(CoordinatorError::InvalidInput(
            "cannot process an empty file".to_string(),
        ));
    }
    if buf.len() as u64 > max_file_size {
        return Err(CoordinatorError::TooLarge {
            size: buf.len() as u64,
            max: max_file_size,
        });
    }

    let plaintext_hash = crypto::sha256_hex(buf);
    let (wrapped_dek, dek_id) = kek.issue_wrapped_dek()?;

    let sizes = policy.plan(buf.len() as u64);
    let mut chunks = Vec::with_capacity(sizes.len());
    let mut offset = 0usize;
    for (sequence_num, size) in sizes.iter().enumerate() {
        let size = *size as usize;
        let piece = &buf[offset..offset + size];
        offset += size;

        let EncryptedChunk {
            ciphertext,
            iv,
            aad,
            ciphertext_hash,
        } = crypto::encrypt_chunk(kek, piece, &wrapped_dek, file_id, sequence_num as u32)?;

        chunks.push(ChunkRecord {
            id: ChunkId::new(),
            file_id: file_id.to_string(),
            sequence_num: sequence_num as u32,
            size_bytes: ciphertext.len() as u64,
            iv,
            aad,
            ciphertext_hash,
            ciphertext: Bytes::from(ciphertext),
        });
    }

    let file_meta = FileMeta {
        original_name: name.to_string(),
        mime: mime.to_string(),
        size_bytes: buf.len() as u64,
        wrapped_dek,
        dek_id,
        plaintext_hash,
        chunk_count: chunks.len() as u32,
    };

    Ok(ProcessedFile { file_meta, chunks })
}

/// Decrypt and reassemble a file from its ordered chunk ciphertexts,
/// verifying the result against `plaintext_hash`.
///
/// Chunks need not be supplied in order; they are sorted by
/// `sequence_num` before decryption. Fails `InvalidInput` if the sequence
/// numbers do not densely cover `[0, chunks.len())`.
pub fn reassemble_file(
    kek: &Kek,
    wrapped_dek: &WrappedDek,
    file_id: &str,
    plaintext_hash: &str,
    chunks: &[ChunkRecord],
) -> Result<Bytes> {
    let mut sorted: Vec<&ChunkRecord> = chunks.iter().collect();
    sorted.sort_by_key(|c| c.sequence_num);

    for (i, chunk) in sorted.iter().enumerate() {
        if chunk.sequence_num != i as u32 {
            return Err(CoordinatorError::InvalidInput(format!(
                "missing or out-of-order chunk sequence: expected {}, got {}",
                i, chunk.sequence_num
            )));
        }
    }

    let total_size: usize = sorted.iter().map(|c| c.ciphertext.len()).sum();
    let mut plaintext = Vec::with_capacity(total_size);
    for chunk in &sorted {
        let encrypted = EncryptedChunk {
            ciphertext: chunk.ciphertext.to_vec(),
            iv: chunk.iv,
            aad: chunk.aad.clone(),
            ciphertext_hash: chunk.ciphertext_hash,
        };
        let piece = crypto::decrypt_chunk(kek, &encrypted, wrapped_dek, file_id, chunk.sequence_num)?;
        plaintext.extend_from_slice(&piece);
    }

    let computed_hash = crypto::sha256_hex(&plaintext);
    if computed_hash != plaintext_hash {
        return Err(CoordinatorError::IntegrityError(
            "reassembled plaintext does not match file's plaintext_hash".to_string(),
        ));
    }

    Ok(Bytes::from(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adaptive_policy_small_file_is_one_chunk() {
        let policy = ChunkSizePolicy::Adaptive;
        let sizes = policy.plan(5);
        assert_eq!(sizes, vec![5]);

        let sizes = policy.plan(SMALL_FILE_THRESHOLD);
        assert_eq!(sizes, vec![SMALL_FILE_THRESHOLD]);
    }

    #[test]
    fn test_adaptive_policy_boundary_plus_one_byte() {
        let sizes = ChunkSizePolicy::Adaptive.plan(SMALL_FILE_THRESHOLD + 1);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0], MEDIUM_CHUNK_SIZE);
        assert_eq!(sizes[1], 1);
    }

    #[test]
    fn test_adaptive_policy_exactly_five_gib() {
        let sizes = ChunkSizePolicy::Adaptive.plan(LARGE_FILE_THRESHOLD);
        assert_eq!(sizes.len(), 10);
        assert!(sizes.iter().all(|&s| s == MEDIUM_CHUNK_SIZE));
    }

    #[test]
    fn test_adaptive_policy_above_five_gib_uses_one_gib_chunks() {
        let size = LARGE_FILE_THRESHOLD + 1;
        let sizes = ChunkSizePolicy::Adaptive.plan(size);
        assert_eq!(sizes.len(), 6);
        for s in &sizes[..5] {
            assert_eq!(*s, LARGE_CHUNK_SIZE);
        }
        assert_eq!(sizes[5], 1);
    }

    #[test]
    fn test_fixed_policy_degenerate_chunking() {
        let policy = ChunkSizePolicy::Fixed(5 * MIB);
        let sizes = policy.plan(12 * MIB);
        assert_eq!(sizes, vec![5 * MIB, 5 * MIB, 2 * MIB]);
    }

    #[test]
    fn test_process_file_roundtrip() {
        let kek = Kek::generate();
        let data = b"hello".to_vec();
        let processed = process_file(
            &kek,
            &data,
            "hello.txt",
            "text/plain",
            "file-1",
            ChunkSizePolicy::Adaptive,
            u64::MAX,
        )
        .unwrap();

        assert_eq!(processed.chunks.len(), 1);
        assert_eq!(processed.file_meta.chunk_count, 1);

        let plaintext = reassemble_file(
            &kek,
            &processed.file_meta.wrapped_dek,
            "file-1",
            &processed.file_meta.plaintext_hash,
            &processed.chunks,
        )
        .unwrap();
        assert_eq!(plaintext.as_ref(), data.as_slice());
    }

    #[test]
    fn test_process_file_multi_chunk_roundtrip() {
        let kek = Kek::generate();
        let data = vec![7u8; 12 * 1024 * 1024];
        let processed = process_file(
            &kek,
            &data,
            "big.bin",
            "application/octet-stream",
            "file-2",
            ChunkSizePolicy::Fixed(5 * MIB),
            u64::MAX,
        )
        .unwrap();

        assert_eq!(processed.chunks.len(), 3);
        assert_eq!(processed.chunks[0].sequence_num, 0);
        assert_eq!(processed.chunks[2].sequence_num, 2);

        let plaintext = reassemble_file(
            &kek,
            &processed.file_meta.wrapped_dek,
            "file-2",
            &processed.file_meta.plaintext_hash,
            &processed.chunks,
        )
        .unwrap();
        assert_eq!(plaintext.as_ref(), data.as_slice());
    }

    #[test]
    fn test_process_file_rejects_empty() {
        let kek = Kek::generate();
        let result = process_file(
            &kek,
            &[],
            "empty.txt",
            "text/plain",
            "file-3",
            ChunkSizePolicy::Adaptive,
            u64::MAX,
        );
        assert!(matches!(result, Err(CoordinatorError::InvalidInput(_))));
    }

    #[test]
    fn test_process_file_rejects_oversize() {
        let kek = Kek::generate();
        let data = vec![0u8; 100];
        let result = process_file(
            &kek,
            &data,
            "too-big.bin",
            "application/octet-stream",
            "file-4",
            ChunkSizePolicy::Adaptive,
            50,
        );
        assert!(matches!(result, Err(CoordinatorError::TooLarge { .. })));
    }

    #[test]
    fn test_reassemble_detects_missing_chunk() {
        let kek = Kek::generate();
        let data = vec![3u8; 12 * 1024 * 1024];
        let processed = process_file(
            &kek,
            &data,
            "big.bin",
            "application/octet-stream",
            "file-5",
            ChunkSizePolicy::Fixed(5 * MIB),
            u64::MAX,
        )
        .unwrap();

        let partial = &processed.chunks[..2];
        let result = reassemble_file(
            &kek,
            &processed.file_meta.wrapped_dek,
            "file-5",
            &processed.file_meta.plaintext_hash,
            partial,
        );
        assert!(matches!(result, Err(CoordinatorError::IntegrityError(_))) || result.is_err());
    }
}
