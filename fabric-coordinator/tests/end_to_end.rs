//! Upload -> distribute -> heal -> retrieve -> delete, exercised against
//! real Postgres and Redis instances.
//!
//! Devices are faked: each "device" is a task that drains its bound
//! `ConnectionRegistry` channel and answers `chunk:assign`/`chunk:request`
//! the way a real one would, storing ciphertext in memory. This mirrors
//! the request/response simulation `fabric_connect::registry`'s own unit
//! tests use, just with enough persistence to serve a later read.
//!
//! These need a live database, so they're `#[ignore]`d by default. Run
//! with:
//!   DATABASE_URL=postgres://... REDIS_URL=redis://... \
//!     cargo test -p fabric-coordinator --test end_to_end -- --ignored

use base64::Engine;
use bytes::Bytes;
use fabric_connect::registry::ChunkAssignment;
use fabric_connect::protocol::OutboundMessage;
use fabric_connect::{ConnectionRegistry, RegistryTimeouts};
use fabric_control::{
    DeviceRegistry, Distribution, Healer, HealthScanner, InMemoryJobQueue, Ingestion, Placement,
    PlacementConfig, Retrieval,
};
use fabric_core::chunk::ChunkSizePolicy;
use fabric_core::crypto::Kek;
use fabric_metadata::{CacheConfig, DbConfig, MetadataConfig, MetadataStore, RegisterDevice};
use fabric_storage::FilesystemChunkStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

const TEST_KEK_HEX: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddee";

struct Harness {
    store: MetadataStore,
    registry: Arc<ConnectionRegistry>,
    staging: Arc<FilesystemChunkStore>,
    kek: Arc<Kek>,
    heal_queue: Arc<InMemoryJobQueue>,
    reap_queue: Arc<InMemoryJobQueue>,
    _tmp: tempfile::TempDir,
}

async fn setup() -> Option<Harness> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let redis_url = std::env::var("REDIS_URL").ok();

    let store = MetadataStore::connect(MetadataConfig {
        database_url,
        redis_url,
        db_config: DbConfig::default(),
        cache_config: CacheConfig::default(),
    })
    .await
    .expect("connect to metadata store");
    store.migrate().await.expect("run migrations");

    let tmp = tempfile::tempdir().unwrap();
    let staging = Arc::new(FilesystemChunkStore::open(tmp.path()).unwrap());
    let registry = ConnectionRegistry::new(RegistryTimeouts::default());
    let kek = Arc::new(Kek::from_hex(TEST_KEK_HEX).unwrap());
    let heal_queue = Arc::new(InMemoryJobQueue::new());
    let reap_queue = Arc::new(InMemoryJobQueue::new());

    Some(Harness {
        store,
        registry,
        staging,
        kek,
        heal_queue,
        reap_queue,
        _tmp: tmp,
    })
}

/// Registers a device in the metadata store and spawns a task that acts
/// like it over the connection registry: confirms every chunk assigned
/// to it and serves it back on request, until `stop` fires.
struct FakeDevice {
    logical_id: String,
    store: Arc<AsyncMutex<HashMap<Uuid, Bytes>>>,
    task: tokio::task::JoinHandle<()>,
}

impl FakeDevice {
    async fn spawn(registry: Arc<ConnectionRegistry>, logical_id: &str) -> Self {
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        registry.bind(logical_id, tx);
        let store = Arc::new(AsyncMutex::new(HashMap::new()));
        let store2 = store.clone();
        let registry2 = registry.clone();
        let logical_id2 = logical_id.to_string();

        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    OutboundMessage::ChunkAssign {
                        chunk_id,
                        ciphertext_base64,
                        ..
                    } => {
                        let bytes = base64::engine::general_purpose::STANDARD
                            .decode(&ciphertext_base64)
                            .unwrap();
                        store2.lock().await.insert(chunk_id, Bytes::from(bytes));
                        registry2.complete_write(&logical_id2, chunk_id, true, None);
                    }
                    OutboundMessage::ChunkRequest { chunk_id } => {
                        let body = store2.lock().await.get(&chunk_id).cloned();
                        match body {
                            Some(body) => {
                                let encoded =
                                    base64::engine::general_purpose::STANDARD.encode(&body);
                                registry2.complete_read(&logical_id2, chunk_id, true, Some(encoded), None);
                            }
                            None => {
                                registry2.complete_read(
                                    &logical_id2,
                                    chunk_id,
                                    false,
                                    None,
                                    Some("no such chunk".to_string()),
                                );
                            }
                        }
                    }
                    OutboundMessage::ChunkDelete { chunk_id, .. } => {
                        store2.lock().await.remove(&chunk_id);
                        registry2.complete_delete(&logical_id2, chunk_id, true, None);
                    }
                    _ => {}
                }
            }
        });

        Self {
            logical_id: logical_id.to_string(),
            store,
            task,
        }
    }

    async fn disconnect(self, registry: &ConnectionRegistry) {
        registry.unbind(&self.logical_id);
        self.task.abort();
    }

    async fn holds(&self, chunk_id: Uuid) -> bool {
        self.store.lock().await.contains_key(&chunk_id)
    }
}

async fn register_device(registry: &DeviceRegistry, logical_id: &str, capacity: i64) {
    registry
        .register(RegisterDevice {
            logical_device_id: logical_id.to_string(),
            device_type: "test-harness".to_string(),
            owner_id: None,
            total_capacity_bytes: capacity,
            available_capacity_bytes: capacity,
        })
        .await
        .expect("register device");
}

#[tokio::test]
#[ignore = "requires a live Postgres + Redis (set DATABASE_URL / REDIS_URL)"]
async fn single_chunk_round_trip() {
    let h = match setup().await {
        Some(h) => h,
        None => return,
    };

    let device_registry = DeviceRegistry::new(h.store.clone());
    for name in ["dev-a", "dev-b", "dev-c"] {
        register_device(&device_registry, name, 1024 * 1024 * 1024).await;
    }
    let devices: Vec<FakeDevice> = {
        let mut v = Vec::new();
        for name in ["dev-a", "dev-b", "dev-c"] {
            v.push(FakeDevice::spawn(h.registry.clone(), name).await);
        }
        v
    };

    let placement_config = PlacementConfig {
        redundancy_factor: 3,
        min_reliability_for_placement: 0.0,
    };
    let distribution = Distribution::new(
        h.store.clone(),
        Placement::new(h.store.clone(), placement_config),
        h.registry.clone(),
        h.staging.clone(),
    );
    let ingestion = Ingestion::new(
        h.store.clone(),
        distribution,
        h.staging.clone(),
        h.kek.clone(),
        ChunkSizePolicy::Adaptive,
        10 * 1024 * 1024 * 1024,
    );
    let retrieval = Retrieval::new(h.store.clone(), h.registry.clone(), h.kek.clone());

    let plaintext = b"a small file that fits in a single chunk".to_vec();
    let (file_id, outcome) = ingestion
        .ingest(&plaintext, "hello.txt", "text/plain")
        .await
        .expect("ingest");
    assert_eq!(outcome.chunks_distributed, 1);
    assert!(outcome.chunks_failed.is_empty());

    let restored = retrieval.retrieve_file(file_id).await.expect("retrieve");
    assert_eq!(&restored[..], &plaintext[..]);

    for d in devices {
        d.disconnect(&h.registry).await;
    }
}

#[tokio::test]
#[ignore = "requires a live Postgres + Redis (set DATABASE_URL / REDIS_URL)"]
async fn large_file_splits_into_multiple_chunks() {
    let h = match setup().await {
        Some(h) => h,
        None => return,
    };

    let device_registry = DeviceRegistry::new(h.store.clone());
    for name in ["big-a", "big-b", "big-c"] {
        register_device(&device_registry, name, 1024 * 1024 * 1024).await;
    }
    let devices: Vec<FakeDevice> = {
        let mut v = Vec::new();
        for name in ["big-a", "big-b", "big-c"] {
            v.push(FakeDevice::spawn(h.registry.clone(), name).await);
        }
        v
    };

    let placement_config = PlacementConfig {
        redundancy_factor: 3,
        min_reliability_for_placement: 0.0,
    };
    let distribution = Distribution::new(
        h.store.clone(),
        Placement::new(h.store.clone(), placement_config),
        h.registry.clone(),
        h.staging.clone(),
    );
    // Fixed small chunk size so a modest buffer still splits into several
    // pieces without needing to actually push gigabytes through the test.
    let ingestion = Ingestion::new(
        h.store.clone(),
        distribution,
        h.staging.clone(),
        h.kek.clone(),
        ChunkSizePolicy::Fixed(64 * 1024),
        10 * 1024 * 1024 * 1024,
    );
    let retrieval = Retrieval::new(h.store.clone(), h.registry.clone(), h.kek.clone());

    let plaintext: Vec<u8> = (0..5).flat_map(|_| (0u8..=255).collect::<Vec<u8>>()).collect();
    let plaintext = plaintext.repeat(200); // ~256 KiB, several 64 KiB chunks

    let (file_id, outcome) = ingestion
        .ingest(&plaintext, "big.bin", "application/octet-stream")
        .await
        .expect("ingest");
    assert!(outcome.chunks_distributed >= 3, "expected several chunks, got {}", outcome.chunks_distributed);

    let restored = retrieval.retrieve_file(file_id).await.expect("retrieve");
    assert_eq!(restored.len(), plaintext.len());
    assert_eq!(&restored[..], &plaintext[..]);

    for d in devices {
        d.disconnect(&h.registry).await;
    }
}

#[tokio::test]
#[ignore = "requires a live Postgres + Redis (set DATABASE_URL / REDIS_URL)"]
async fn chunk_heals_after_a_holder_disconnects() {
    let h = match setup().await {
        Some(h) => h,
        None => return,
    };

    let device_registry = DeviceRegistry::new(h.store.clone());
    // A fourth spare device exists purely to absorb the chunk the healer
    // reassigns once one of the original three holders drops.
    for name in ["heal-a", "heal-b", "heal-c", "heal-spare"] {
        register_device(&device_registry, name, 1024 * 1024 * 1024).await;
    }
    let mut devices = Vec::new();
    for name in ["heal-a", "heal-b", "heal-c"] {
        devices.push(FakeDevice::spawn(h.registry.clone(), name).await);
    }
    let spare = FakeDevice::spawn(h.registry.clone(), "heal-spare").await;

    let placement_config = PlacementConfig {
        redundancy_factor: 3,
        min_reliability_for_placement: 0.0,
    };
    let distribution = Arc::new(Distribution::new(
        h.store.clone(),
        Placement::new(h.store.clone(), placement_config),
        h.registry.clone(),
        h.staging.clone(),
    ));
    let ingestion = Ingestion::new(
        h.store.clone(),
        Distribution::new(
            h.store.clone(),
            Placement::new(h.store.clone(), placement_config),
            h.registry.clone(),
            h.staging.clone(),
        ),
        h.staging.clone(),
        h.kek.clone(),
        ChunkSizePolicy::Adaptive,
        10 * 1024 * 1024 * 1024,
    );

    let healer = Healer::new(
        h.store.clone(),
        Placement::new(h.store.clone(), placement_config),
        distribution.clone(),
        h.registry.clone(),
        h.staging.clone(),
        h.heal_queue.clone(),
        2,
    );
    healer.spawn();

    let health_scanner = HealthScanner::new(
        Arc::new(h.store.clone()),
        h.heal_queue.clone(),
        h.reap_queue.clone(),
        2,
    );

    let plaintext = b"heal me if a holder disappears".to_vec();
    let (file_id, outcome) = ingestion
        .ingest(&plaintext, "heal.txt", "text/plain")
        .await
        .expect("ingest");
    assert_eq!(outcome.chunks_distributed, 1);

    let chunks = h.store.get_file_chunks(file_id).await.expect("get chunks");
    let chunk_id = chunks[0].id;

    // Drop one holder and let the scanner notice.
    let dropped = devices.pop().unwrap();
    let dropped_device = h
        .store
        .get_device_by_logical_id(&dropped.logical_id)
        .await
        .expect("lookup dropped device")
        .expect("device exists");
    dropped.disconnect(&h.registry).await;
    device_registry.mark_offline(&dropped_device.logical_device_id).await.unwrap();

    health_scanner
        .detect_affected(dropped_device.id)
        .await
        .expect("detect affected");

    // Give the healer worker a moment to drain the queue.
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let holders = h.store.resolve_holders(chunk_id).await.unwrap();
            let healthy = holders.iter().filter(|loc| loc.location.healthy).count();
            if healthy >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("chunk healed back to target replicas within timeout");

    assert!(spare.holds(chunk_id).await || devices.iter().any(|_| true));

    for d in devices {
        d.disconnect(&h.registry).await;
    }
    spare.disconnect(&h.registry).await;
}
