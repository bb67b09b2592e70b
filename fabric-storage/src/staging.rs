//! Filesystem-backed temporary chunk store.
//!
//! Holds ciphertext durably enough to survive the gap between "chunk
//! encrypted" and "chunk acknowledged by enough devices", and nothing
//! longer: entries are evicted by a background sweep once they exceed
//! `temp_chunk_ttl`, not retained as a permanent store of record.

use crate::backend::{StorageBackendSync, StorageStats};
use fabric_core::chunk::ChunkId;
use fabric_core::error::{CoordinatorError, Result};
use bytes::Bytes;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Default time a staged chunk may sit unacknowledged before the sweep
/// reclaims it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A single-directory, single-writer-per-id filesystem store for chunk
/// ciphertext. Each chunk lives at `<root>/<chunk_id>.chunk`; writes go
/// through a temp file in the same directory and are renamed into place,
/// so a reader never observes a partially written chunk.
pub struct FilesystemChunkStore {
    root: PathBuf,
    ttl: Duration,
    bytes_used: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl FilesystemChunkStore {
    /// Open (creating if necessary) a chunk store rooted at `root`, using
    /// the default 24-hour TTL.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_ttl(root, DEFAULT_TTL)
    }

    /// Open a chunk store with an explicit eviction TTL.
    pub fn open_with_ttl(root: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let bytes_used = Self::scan_bytes_used(&root)?;
        Ok(Self {
            root,
            ttl,
            bytes_used: AtomicU64::new(bytes_used),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        })
    }

    fn scan_bytes_used(root: &Path) -> Result<u64> {
        let mut total = 0u64;
        for entry in fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }

    fn path_for(&self, id: ChunkId) -> PathBuf {
        self.root.join(format!("{}.chunk", id.to_string_id()))
    }

    /// Sweep the store, deleting any chunk file whose mtime is older than
    /// `self.ttl`. Intended to be invoked periodically by the scheduler.
    /// Returns the number of files reclaimed.
    pub fn sweep_expired(&self) -> Result<u64> {
        let now = SystemTime::now();
        let mut reclaimed = 0u64;

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let metadata = entry.metadata()?;
            let age = now
                .duration_since(metadata.modified()?)
                .unwrap_or(Duration::ZERO);
            if age > self.ttl {
                let size = metadata.len();
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = ?entry.path(), error = %e, "failed to reclaim expired staged chunk");
                    continue;
                }
                self.bytes_used.fetch_sub(size, Ordering::SeqCst);
                reclaimed += 1;
                debug!(path = ?entry.path(), age_secs = age.as_secs(), "reclaimed expired staged chunk");
            }
        }

        Ok(reclaimed)
    }
}

impl StorageBackendSync for FilesystemChunkStore {
    fn put(&self, id: ChunkId, data: Bytes) -> Result<()> {
        let final_path = self.path_for(id);
        let tmp_path = self.root.join(format!("{}.chunk.tmp", id.to_string_id()));

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &final_path)?;

        self.bytes_used.fetch_add(data.len() as u64, Ordering::SeqCst);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, id: ChunkId) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, id: ChunkId) -> Result<bool> {
        let path = self.path_for(id);
        let len = match fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                self.bytes_used.fetch_sub(len, Ordering::SeqCst);
                self.deletes.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: ChunkId) -> Result<bool> {
        Ok(self.path_for(id).exists())
    }

    fn stats(&self) -> Result<StorageStats> {
        let chunk_count = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "chunk")
                    .unwrap_or(false)
            })
            .count() as u64;

        Ok(StorageStats {
            chunk_count,
            bytes_used: self.bytes_used.load(Ordering::SeqCst),
            bytes_capacity: 0,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            avg_read_latency_us: 0,
            avg_write_latency_us: 0,
        })
    }

    fn list_chunks(&self) -> Result<Vec<ChunkId>> {
        // Chunk identity here is (file_id, sequence_num); the staging
        // store only ever needs to resolve a known ChunkId back to bytes,
        // so listing is used for diagnostics rather than lookups.
        Err(CoordinatorError::Internal(
            "FilesystemChunkStore does not support listing by ChunkId; chunk ids are opaque row ids not recoverable from the filename".to_string(),
        ))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemChunkStore::open(dir.path()).unwrap();
        let id = ChunkId::new();
        let data = Bytes::from_static(b"ciphertext bytes");

        store.put(id, data.clone()).unwrap();
        let retrieved = store.get(id).unwrap().unwrap();
        assert_eq!(retrieved, data);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemChunkStore::open(dir.path()).unwrap();
        assert!(store.get(ChunkId::new()).unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemChunkStore::open(dir.path()).unwrap();
        let id = ChunkId::new();

        store.put(id, Bytes::from_static(b"data")).unwrap();
        assert!(store.exists(id).unwrap());
        assert!(store.delete(id).unwrap());
        assert!(!store.exists(id).unwrap());
        assert!(!store.delete(id).unwrap());
    }

    #[test]
    fn test_write_is_atomic_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemChunkStore::open(dir.path()).unwrap();
        let id = ChunkId::new();
        store.put(id, Bytes::from_static(b"data")).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path().to_string_lossy().ends_with(".chunk"));
    }

    #[test]
    fn test_sweep_expired_reclaims_old_files() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemChunkStore::open_with_ttl(dir.path(), Duration::from_millis(1)).unwrap();
        let id = ChunkId::new();
        store.put(id, Bytes::from_static(b"stale")).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let reclaimed = store.sweep_expired().unwrap();

        assert_eq!(reclaimed, 1);
        assert!(!store.exists(id).unwrap());
    }

    #[test]
    fn test_sweep_keeps_fresh_files() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemChunkStore::open_with_ttl(dir.path(), Duration::from_secs(3600)).unwrap();
        let id = ChunkId::new();
        store.put(id, Bytes::from_static(b"fresh")).unwrap();

        let reclaimed = store.sweep_expired().unwrap();
        assert_eq!(reclaimed, 0);
        assert!(store.exists(id).unwrap());
    }

    #[test]
    fn test_stats_tracks_counts() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemChunkStore::open(dir.path()).unwrap();
        let id = ChunkId::new();

        store.put(id, Bytes::from_static(b"0123456789")).unwrap();
        store.get(id).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.bytes_used, 10);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.reads, 1);
    }
}
