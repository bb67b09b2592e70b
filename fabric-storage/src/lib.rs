//! Temporary chunk storage for the fabric coordinator.
//!
//! Provides:
//! - `StorageBackendSync`, the pluggable storage trait
//! - `FilesystemChunkStore`, the production temporary chunk store
//! - `MemoryBackend` for tests

pub mod backend;
pub mod memory;
pub mod staging;

pub use backend::{StorageBackendSync, StorageStats};
pub use memory::MemoryBackend;
pub use staging::FilesystemChunkStore;
