//! Core library for the storage fabric coordinator.
//!
//! Provides the parts of the replication control plane that don't need a
//! database or a network connection to reason about:
//! - The KEK/DEK/HKDF crypto pipeline ([`crypto`])
//! - The adaptive chunker ([`chunk`])
//! - The shared error taxonomy ([`error`])

pub mod chunk;
pub mod crypto;
pub mod error;

pub use chunk::{
    process_file, reassemble_file, ChunkId, ChunkRecord, ChunkSizePolicy, FileMeta, ProcessedFile,
};
pub use crypto::{EncryptionKey, Kek, WrappedDek};
pub use error::{CoordinatorError, Result};

/// Default number of healthy replicas a chunk targets, per the data model.
pub const DEFAULT_TARGET_REPLICAS: u32 = 3;
/// Minimum allowed `target_replicas` for a chunk.
pub const MIN_TARGET_REPLICAS: u32 = 2;
/// Chunks may briefly exceed `target_replicas` by this much before the
/// reaper trims the excess.
pub const SAFETY_MARGIN: u32 = 2;
