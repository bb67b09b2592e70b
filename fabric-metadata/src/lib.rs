//! Metadata store for the storage fabric coordinator.
//!
//! Persists `Device`, `File`, `Chunk`, and `ChunkLocation` rows in
//! PostgreSQL, with an optional Redis cache in front of the hot paths
//! (chunk holder resolution, device lookups). This crate is the contract
//! every higher-level component (device registry, placement, retrieval,
//! scanner) reads and writes through; none of them touch `sqlx` directly.
//!
//! # Usage
//!
//! ```ignore
//! use fabric_metadata::{MetadataStore, MetadataConfig};
//!
//! let store = MetadataStore::connect(MetadataConfig::default()).await?;
//! store.migrate().await?;
//!
//! let device = store.register_device(RegisterDevice { .. }).await?;
//! ```

pub mod cache;
pub mod models;
pub mod postgres;

pub use cache::{Cache, CacheConfig, CacheError, OptionalCache};
pub use models::*;
pub use postgres::{Database, DbConfig, DbError, LocationWithDevice};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Metadata store error types.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Aggregated configuration for the metadata store.
#[derive(Debug, Clone)]
pub struct MetadataConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub db_config: DbConfig,
    pub cache_config: CacheConfig,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/fabric".to_string(),
            redis_url: Some("redis://localhost:6379".to_string()),
            db_config: DbConfig::default(),
            cache_config: CacheConfig::default(),
        }
    }
}

/// The metadata store: PostgreSQL for durability, an optional Redis cache
/// for the lookups on the hot path. Every method here is the one place a
/// given row shape touches SQL; callers never see a query.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<Database>,
    cache: Arc<OptionalCache>,
}

impl MetadataStore {
    /// Connect to PostgreSQL, and to Redis if a URL is configured — a
    /// cache connection failure degrades to no caching rather than
    /// failing startup, since the cache is an optimization, not a
    /// durability boundary.
    pub async fn connect(config: MetadataConfig) -> Result<Self> {
        let mut db_config = config.db_config.clone();
        db_config.url = config.database_url.clone();
        let db = Database::new(db_config).await?;

        let cache = match config.redis_url {
            Some(url) => {
                let mut cache_config = config.cache_config.clone();
                cache_config.url = url;
                match Cache::new(cache_config).await {
                    Ok(cache) => OptionalCache::new(cache),
                    Err(e) => {
                        warn!(error = %e, "redis cache unavailable, continuing without it");
                        OptionalCache::none()
                    }
                }
            }
            None => OptionalCache::none(),
        };

        Ok(Self {
            db: Arc::new(db),
            cache: Arc::new(cache),
        })
    }

    pub async fn migrate(&self) -> Result<()> {
        self.db.migrate().await?;
        Ok(())
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // =========================================================================
    // DEVICE REGISTRY
    // =========================================================================

    pub async fn register_device(&self, device: RegisterDevice) -> Result<Device> {
        let logical_id = device.logical_device_id.clone();
        let row = self.db.insert_device(device).await?;
        self.cache.try_delete(&self.device_cache_key(&logical_id)).await;
        Ok(row)
    }

    pub async fn get_device(&self, id: Uuid) -> Result<Device> {
        self.db
            .get_device(id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("device {id}")))
    }

    pub async fn get_device_by_logical_id(&self, logical_device_id: &str) -> Result<Option<Device>> {
        if let Some(cached) = self
            .cache
            .try_get::<Device>(&self.device_cache_key(logical_device_id))
            .await
        {
            return Ok(Some(cached));
        }
        let device = self.db.get_device_by_logical_id(logical_device_id).await?;
        if let Some(ref d) = device {
            self.cache
                .try_set(&self.device_cache_key(logical_device_id), d, Duration::from_secs(120))
                .await;
        }
        Ok(device)
    }

    /// Persist updated device state (heartbeat, offline transition, score
    /// recompute) and invalidate the cached row.
    pub async fn save_device(&self, device: &Device) -> Result<()> {
        self.db.update_device(device).await?;
        self.cache
            .try_delete(&self.device_cache_key(&device.logical_device_id))
            .await;
        Ok(())
    }

    pub async fn find_healthy_devices(
        &self,
        min_free_bytes: i64,
        min_score: f64,
        limit: i64,
    ) -> Result<Vec<Device>> {
        Ok(self.db.find_healthy_devices(min_free_bytes, min_score, limit).await?)
    }

    pub async fn debit_device_capacity(&self, device_id: Uuid, bytes: i64) -> Result<()> {
        Ok(self.db.debit_device_capacity(device_id, bytes).await?)
    }

    pub async fn credit_device_capacity(&self, device_id: Uuid, bytes: i64) -> Result<()> {
        Ok(self.db.credit_device_capacity(device_id, bytes).await?)
    }

    fn device_cache_key(&self, logical_device_id: &str) -> String {
        format!("fabric:device:{logical_device_id}")
    }

    fn chunk_holder_cache_key(&self, chunk_id: Uuid) -> String {
        format!("fabric:chunk:{chunk_id}:holders")
    }

    // =========================================================================
    // FILES
    // =========================================================================

    pub async fn create_file(&self, file: CreateFile) -> Result<File> {
        Ok(self.db.create_file(file).await?)
    }

    pub async fn get_file(&self, id: Uuid) -> Result<File> {
        self.db
            .get_file(id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("file {id}")))
    }

    pub async fn activate_file(&self, id: Uuid) -> Result<()> {
        Ok(self.db.activate_file(id).await?)
    }

    pub async fn mark_file_deleted(&self, id: Uuid) -> Result<()> {
        Ok(self.db.mark_file_deleted(id).await?)
    }

    pub async fn delete_file_cascade(&self, id: Uuid) -> Result<()> {
        Ok(self.db.delete_file_cascade(id).await?)
    }

    // =========================================================================
    // CHUNKS
    // =========================================================================

    pub async fn create_chunk(&self, chunk: CreateChunk) -> Result<Chunk> {
        Ok(self.db.create_chunk(chunk).await?)
    }

    pub async fn get_chunk(&self, id: Uuid) -> Result<Chunk> {
        self.db
            .get_chunk(id)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("chunk {id}")))
    }

    pub async fn get_file_chunks(&self, file_id: Uuid) -> Result<Vec<Chunk>> {
        Ok(self.db.get_file_chunks(file_id).await?)
    }

    pub async fn update_chunk_state(&self, id: Uuid, state: ChunkState) -> Result<()> {
        Ok(self.db.update_chunk_state(id, state).await?)
    }

    pub async fn set_chunk_current_replicas(&self, id: Uuid, count: i32) -> Result<()> {
        Ok(self.db.set_chunk_current_replicas(id, count).await?)
    }

    pub async fn list_chunks_in_states(&self, states: &[ChunkState]) -> Result<Vec<Chunk>> {
        Ok(self.db.list_chunks_in_states(states).await?)
    }

    pub async fn get_chunks_on_device(&self, device_id: Uuid) -> Result<Vec<Chunk>> {
        Ok(self.db.get_chunks_on_device(device_id).await?)
    }

    pub async fn count_healthy_holders(&self, chunk_id: Uuid) -> Result<i64> {
        Ok(self.db.count_healthy_holders(chunk_id).await?)
    }

    // =========================================================================
    // CHUNK LOCATIONS (PLACEMENT)
    // =========================================================================

    pub async fn insert_chunk_location(
        &self,
        chunk_id: Uuid,
        device_id: Uuid,
        local_path: &str,
        healthy: bool,
    ) -> Result<Option<ChunkLocation>> {
        let result = self
            .db
            .insert_chunk_location(chunk_id, device_id, local_path, healthy)
            .await?;
        self.cache
            .try_delete(&self.chunk_holder_cache_key(chunk_id))
            .await;
        Ok(result)
    }

    pub async fn get_chunk_locations(&self, chunk_id: Uuid) -> Result<Vec<ChunkLocation>> {
        Ok(self.db.get_chunk_locations(chunk_id).await?)
    }

    /// Resolve holders for retrieval: devices holding a healthy copy of
    /// the chunk, ordered least-reliable-first so the healer can
    /// deprioritize the same way the reaper trims. Cached for a few
    /// minutes since placement changes are comparatively rare; every
    /// mutation to a chunk's placements invalidates this key.
    pub async fn resolve_holders(&self, chunk_id: Uuid) -> Result<Vec<LocationWithDevice>> {
        let key = self.chunk_holder_cache_key(chunk_id);
        if let Some(cached) = self.cache.try_get::<Vec<LocationWithDevice>>(&key).await {
            return Ok(cached);
        }
        let holders = self.db.get_chunk_locations_with_device(chunk_id).await?;
        self.cache.try_set(&key, &holders, Duration::from_secs(300)).await;
        Ok(holders)
    }

    pub async fn set_location_healthy(&self, chunk_id: Uuid, device_id: Uuid, healthy: bool) -> Result<()> {
        self.db.set_location_healthy(chunk_id, device_id, healthy).await?;
        self.cache.try_delete(&self.chunk_holder_cache_key(chunk_id)).await;
        Ok(())
    }

    pub async fn mark_device_locations_unhealthy(&self, device_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.db.mark_device_locations_unhealthy(device_id).await?)
    }

    pub async fn delete_chunk_location(&self, chunk_id: Uuid, device_id: Uuid) -> Result<()> {
        self.db.delete_chunk_location(chunk_id, device_id).await?;
        self.cache.try_delete(&self.chunk_holder_cache_key(chunk_id)).await;
        Ok(())
    }
}
