//! Benchmarks for the chunk-encryption pipeline
//!
//! Run with: cargo bench --package fabric-core --bench crypto

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fabric_core::crypto::{encrypt_chunk, sha256_hex, Kek};

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// Benchmark the full per-chunk encrypt path (DEK unwrap + HKDF + AES-GCM)
/// at the adaptive chunker's size tiers.
fn bench_encrypt_chunk(c: &mut Criterion) {
    let kek = Kek::generate();
    let (wrapped, _) = kek.issue_wrapped_dek().unwrap();

    let mut group = c.benchmark_group("encrypt_chunk");

    for size in [
        64 * 1024,         // 64 KB
        1024 * 1024,       // 1 MB
        4 * 1024 * 1024,   // 4 MB
        16 * 1024 * 1024,  // 16 MB
    ] {
        let data = generate_data(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encrypt", format_size(size)), &data, |b, data| {
            b.iter(|| encrypt_chunk(&kek, black_box(data), &wrapped, "bench-file", 0))
        });
    }

    group.finish();
}

/// Benchmark the full decrypt path (hash check + AAD check + AES-GCM).
fn bench_decrypt_chunk(c: &mut Criterion) {
    let kek = Kek::generate();
    let (wrapped, _) = kek.issue_wrapped_dek().unwrap();

    let mut group = c.benchmark_group("decrypt_chunk");

    for size in [64 * 1024, 1024 * 1024, 4 * 1024 * 1024, 16 * 1024 * 1024] {
        let data = generate_data(size);
        let encrypted = encrypt_chunk(&kek, &data, &wrapped, "bench-file", 0).unwrap();

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("decrypt", format_size(size)),
            &encrypted,
            |b, encrypted| {
                b.iter(|| {
                    fabric_core::crypto::decrypt_chunk(
                        &kek,
                        black_box(encrypted),
                        &wrapped,
                        "bench-file",
                        0,
                    )
                })
            },
        );
    }

    group.finish();
}

/// Benchmark DEK issuance and unwrapping under the process KEK.
fn bench_dek_lifecycle(c: &mut Criterion) {
    let kek = Kek::generate();

    c.bench_function("issue_wrapped_dek", |b| {
        b.iter(|| kek.issue_wrapped_dek().unwrap())
    });

    let (wrapped, _) = kek.issue_wrapped_dek().unwrap();
    c.bench_function("unwrap_dek", |b| {
        b.iter(|| kek.unwrap_dek(black_box(&wrapped)).unwrap())
    });
}

/// Benchmark the whole-file `plaintext_hash` computation.
fn bench_plaintext_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha256_hex");

    for size in [1024 * 1024, 10 * 1024 * 1024, 100 * 1024 * 1024] {
        let data = generate_data(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("hash", format_size(size)), &data, |b, data| {
            b.iter(|| sha256_hex(black_box(data)))
        });
    }

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
    bench_encrypt_chunk,
    bench_decrypt_chunk,
    bench_dek_lifecycle,
    bench_plaintext_hash,
);
criterion_main!(benches);
