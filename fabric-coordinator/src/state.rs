//! Shared application state: every long-lived component wired together
//! once at startup and handed to the device channel, the scheduler, and
//! (eventually) whatever HTTP surface an external collaborator adds on
//! top.

use fabric_connect::{ConnectionRegistry, RegistryTimeouts};
use fabric_control::{
    DeviceRegistry, Distribution, HealthScanner, Healer, InMemoryJobQueue, Ingestion, Job,
    JobKind, Placement, PlacementConfig, Reaper, Retrieval,
};
use fabric_core::crypto::Kek;
use fabric_core::error::{CoordinatorError, Result};
use fabric_metadata::{CacheConfig, DbConfig, MetadataConfig, MetadataStore};
use fabric_storage::FilesystemChunkStore;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::CoordinatorConfig;

/// Every component the device channel, the scheduler, and the worker
/// pools need a handle to. Built once in [`AppState::new`] and shared
/// behind an `Arc` for the life of the process.
pub struct AppState {
    pub config: CoordinatorConfig,
    pub store: MetadataStore,
    pub kek: Arc<Kek>,
    pub staging: Arc<FilesystemChunkStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub device_registry: DeviceRegistry,
    pub health_scanner: Arc<HealthScanner<MetadataStore>>,
    /// Heal jobs only — consumed exclusively by the healer pool.
    pub heal_queue: Arc<InMemoryJobQueue>,
    /// Trim-excess and delete-file jobs — consumed exclusively by the
    /// reaper pool. Kept separate from `heal_queue` so the two pools can
    /// never steal or discard each other's work.
    pub reap_queue: Arc<InMemoryJobQueue>,
    pub distribution: Arc<Distribution<FilesystemChunkStore>>,
    pub ingestion: Ingestion<FilesystemChunkStore>,
    pub retrieval: Retrieval,
    pub healer: Arc<Healer<FilesystemChunkStore>>,
    pub reaper: Arc<Reaper>,
}

impl AppState {
    /// Connect to every backing store, construct the control-plane
    /// components, and spawn the healer/reaper worker pools. Returns an
    /// `Arc` since every consumer (device channel, scheduler, future
    /// HTTP surface) only ever needs shared, read-mostly access.
    pub async fn new(config: CoordinatorConfig) -> Result<Arc<Self>> {
        let kek = Arc::new(Kek::from_hex(&config.kek_hex)?);

        let store = MetadataStore::connect(MetadataConfig {
            database_url: config.database_url.clone(),
            redis_url: config.redis_url.clone(),
            db_config: DbConfig::default(),
            cache_config: CacheConfig::default(),
        })
        .await
        .map_err(|e| CoordinatorError::Database(e.to_string()))?;
        store.migrate().await.map_err(|e| CoordinatorError::Database(e.to_string()))?;

        let staging = Arc::new(FilesystemChunkStore::open_with_ttl(
            "./fabric_staging",
            config.temp_chunk_ttl,
        )?);

        let registry = ConnectionRegistry::new(RegistryTimeouts {
            t_write: config.t_write,
            t_read: config.t_read,
            t_delete: config.t_delete,
        });

        let device_registry = DeviceRegistry::new(store.clone());

        let placement_config = PlacementConfig {
            redundancy_factor: config.redundancy_factor,
            min_reliability_for_placement: config.min_reliability_for_placement,
        };

        // Placement carries no shared mutable state of its own (the
        // store and registry it wraps are already `Arc`-backed), so a
        // fresh instance per consumer is as cheap as cloning one would be.
        let distribution = Arc::new(Distribution::new(
            store.clone(),
            Placement::new(store.clone(), placement_config),
            registry.clone(),
            staging.clone(),
        ));

        let ingestion = Ingestion::new(
            store.clone(),
            Distribution::new(
                store.clone(),
                Placement::new(store.clone(), placement_config),
                registry.clone(),
                staging.clone(),
            ),
            staging.clone(),
            kek.clone(),
            config.chunk_size_policy,
            config.max_file_size,
        );

        let retrieval = Retrieval::new(store.clone(), registry.clone(), kek.clone());

        let heal_queue = Arc::new(InMemoryJobQueue::new());
        let reap_queue = Arc::new(InMemoryJobQueue::new());
        let health_scanner = Arc::new(HealthScanner::new(
            Arc::new(store.clone()),
            heal_queue.clone(),
            reap_queue.clone(),
            config.safety_margin,
        ));

        let healer = Healer::new(
            store.clone(),
            Placement::new(store.clone(), placement_config),
            distribution.clone(),
            registry.clone(),
            staging.clone(),
            heal_queue.clone(),
            config.healer_concurrency,
        );
        healer.spawn();

        let reaper = Reaper::new(
            store.clone(),
            registry.clone(),
            reap_queue.clone(),
            config.reaper_concurrency,
            config.safety_margin,
        );
        reaper.spawn();

        Ok(Arc::new(Self {
            config,
            store,
            kek,
            staging,
            registry,
            device_registry,
            health_scanner,
            heal_queue,
            reap_queue,
            distribution,
            ingestion,
            retrieval,
            healer,
            reaper,
        }))
    }

    /// Entry point for file deletion: marks the file `DELETED` right away
    /// so it stops serving downloads, then hands the actual per-device
    /// cleanup to the reaper as a background job.
    pub async fn request_file_deletion(&self, file_id: Uuid, reason: impl Into<String>) -> Result<()> {
        self.store
            .mark_file_deleted(file_id)
            .await
            .map_err(|e| CoordinatorError::Database(e.to_string()))?;
        self.reap_queue
            .push(Job::new(JobKind::DeleteFile {
                file_id,
                reason: reason.into(),
                user_initiated: true,
            }))
            .await;
        Ok(())
    }
}
