//! Benchmarks for the temporary chunk store
//!
//! Run with: cargo bench --package fabric-storage --bench storage

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fabric_core::chunk::ChunkId;
use fabric_storage::backend::StorageBackendSync;
use fabric_storage::memory::MemoryBackend;
use fabric_storage::staging::FilesystemChunkStore;
use tempfile::TempDir;

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Benchmark single put operations (latency)
fn bench_put_latency(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemChunkStore::open(temp_dir.path()).unwrap();

    let mut group = c.benchmark_group("filesystem_put_latency");

    for size in [
        1024,            // 1 KB
        64 * 1024,       // 64 KB
        256 * 1024,      // 256 KB
        1024 * 1024,     // 1 MB
        4 * 1024 * 1024, // 4 MB (typical chunk)
    ] {
        let data = Bytes::from(generate_data(size));

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("put", format_size(size)),
            &data,
            |b, data| {
                b.iter(|| {
                    let id = ChunkId::new();
                    backend.put(id, black_box(data.clone())).unwrap()
                })
            },
        );
    }

    group.finish();
}

/// Benchmark get operations (latency)
fn bench_get_latency(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemChunkStore::open(temp_dir.path()).unwrap();

    let mut group = c.benchmark_group("filesystem_get_latency");

    for size in [
        1024,            // 1 KB
        64 * 1024,       // 64 KB
        256 * 1024,      // 256 KB
        1024 * 1024,     // 1 MB
        4 * 1024 * 1024, // 4 MB
    ] {
        let data = Bytes::from(generate_data(size));
        let ids: Vec<ChunkId> = (0..100).map(|_| ChunkId::new()).collect();
        for id in &ids {
            backend.put(*id, data.clone()).unwrap();
        }
        backend.flush().unwrap();

        let mut idx = 0usize;
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("get", format_size(size)),
            &ids,
            |b, ids| {
                b.iter(|| {
                    idx = (idx + 1) % ids.len();
                    backend.get(black_box(ids[idx])).unwrap()
                })
            },
        );
    }

    group.finish();
}

/// Benchmark sequential write throughput
fn bench_write_throughput(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemChunkStore::open(temp_dir.path()).unwrap();

    let chunk_size = 500 * 1024 * 1024 / 64; // representative fraction of a 500 MiB chunk
    let chunks_per_iter = 16;
    let total_bytes = chunk_size * chunks_per_iter;

    let data = Bytes::from(generate_data(chunk_size));

    let mut group = c.benchmark_group("filesystem_write_throughput");
    group.throughput(Throughput::Bytes(total_bytes as u64));
    group.sample_size(20);

    group.bench_function("sequential", |b| {
        b.iter(|| {
            for _ in 0..chunks_per_iter {
                let id = ChunkId::new();
                backend.put(id, data.clone()).unwrap();
            }
        })
    });

    group.finish();
}

/// Benchmark sequential read throughput
fn bench_read_throughput(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemChunkStore::open(temp_dir.path()).unwrap();

    let chunk_size = 4 * 1024 * 1024;
    let chunks_per_iter = 16;
    let total_bytes = chunk_size * chunks_per_iter;

    let data = Bytes::from(generate_data(chunk_size));
    let ids: Vec<ChunkId> = (0..chunks_per_iter).map(|_| ChunkId::new()).collect();

    for id in &ids {
        backend.put(*id, data.clone()).unwrap();
    }
    backend.flush().unwrap();

    let mut group = c.benchmark_group("filesystem_read_throughput");
    group.throughput(Throughput::Bytes(total_bytes as u64));
    group.sample_size(50);

    group.bench_function("sequential", |b| {
        b.iter(|| {
            for id in &ids {
                black_box(backend.get(*id).unwrap());
            }
        })
    });

    group.finish();
}

/// Benchmark mixed read/write workload
fn bench_mixed_workload(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemChunkStore::open(temp_dir.path()).unwrap();

    let chunk_size = 256 * 1024;
    let data = Bytes::from(generate_data(chunk_size));

    let pre_ids: Vec<ChunkId> = (0..100).map(|_| ChunkId::new()).collect();
    for id in &pre_ids {
        backend.put(*id, data.clone()).unwrap();
    }
    backend.flush().unwrap();

    let mut group = c.benchmark_group("filesystem_mixed_workload");
    group.throughput(Throughput::Bytes(10 * chunk_size as u64));

    let mut read_idx = 0usize;

    group.bench_function("50_50_read_write", |b| {
        b.iter(|| {
            for _ in 0..5 {
                let id = ChunkId::new();
                backend.put(id, data.clone()).unwrap();
            }
            for _ in 0..5 {
                read_idx = (read_idx + 1) % pre_ids.len();
                black_box(backend.get(pre_ids[read_idx]).unwrap());
            }
        })
    });

    group.finish();
}

/// Benchmark memory backend for comparison
fn bench_memory_backend(c: &mut Criterion) {
    let backend = MemoryBackend::new();
    let chunk_size = 4 * 1024 * 1024; // 4 MB
    let data = Bytes::from(generate_data(chunk_size));

    let mut group = c.benchmark_group("memory_backend");
    group.throughput(Throughput::Bytes(chunk_size as u64));

    group.bench_function("put_4MB", |b| {
        b.iter(|| {
            let id = ChunkId::new();
            backend.put(id, black_box(data.clone())).unwrap()
        })
    });

    let ids: Vec<ChunkId> = (0..100).map(|_| ChunkId::new()).collect();
    for id in &ids {
        backend.put(*id, data.clone()).unwrap();
    }

    let mut idx = 0usize;
    group.bench_function("get_4MB", |b| {
        b.iter(|| {
            idx = (idx + 1) % ids.len();
            black_box(backend.get(ids[idx]).unwrap())
        })
    });

    group.finish();
}

/// Compare filesystem vs in-memory backend
fn bench_filesystem_vs_memory(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let fs_backend = FilesystemChunkStore::open(temp_dir.path()).unwrap();
    let memory_backend = MemoryBackend::new();

    let chunk_size = 256 * 1024;
    let data = Bytes::from(generate_data(chunk_size));

    let mut group = c.benchmark_group("filesystem_vs_memory_256KB");
    group.throughput(Throughput::Bytes(chunk_size as u64));

    group.bench_function("filesystem_put", |b| {
        b.iter(|| {
            let id = ChunkId::new();
            fs_backend.put(id, data.clone()).unwrap()
        })
    });

    group.bench_function("memory_put", |b| {
        b.iter(|| {
            let id = ChunkId::new();
            memory_backend.put(id, data.clone()).unwrap()
        })
    });

    group.finish();
}

/// Benchmark exists check performance
fn bench_exists(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemChunkStore::open(temp_dir.path()).unwrap();

    let data = Bytes::from_static(b"test data");
    let existing_ids: Vec<ChunkId> = (0..100).map(|_| ChunkId::new()).collect();
    let missing_ids: Vec<ChunkId> = (0..100).map(|_| ChunkId::new()).collect();

    for id in &existing_ids {
        backend.put(*id, data.clone()).unwrap();
    }
    backend.flush().unwrap();

    let mut group = c.benchmark_group("filesystem_exists");

    let mut idx = 0usize;
    group.bench_function("existing_key", |b| {
        b.iter(|| {
            idx = (idx + 1) % existing_ids.len();
            black_box(backend.exists(existing_ids[idx]).unwrap())
        })
    });

    let mut idx2 = 0usize;
    group.bench_function("missing_key", |b| {
        b.iter(|| {
            idx2 = (idx2 + 1) % missing_ids.len();
            black_box(backend.exists(missing_ids[idx2]).unwrap())
        })
    });

    group.finish();
}

/// Format size for display
fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{}MB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{}B", bytes)
    }
}

criterion_group!(
    benches,
    bench_put_latency,
    bench_get_latency,
    bench_write_throughput,
    bench_read_throughput,
    bench_mixed_workload,
    bench_memory_backend,
    bench_filesystem_vs_memory,
    bench_exists,
);
criterion_main!(benches);
