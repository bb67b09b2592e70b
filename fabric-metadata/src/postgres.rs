//! PostgreSQL-backed metadata store for the replication control plane.
//!
//! Provides CRUD and query operations over the four entities defined in
//! `models`: `Device`, `File`, `Chunk`, `ChunkLocation`. This module is the
//! "metadata store contract" from the design — the single source of truth
//! every other component reconciles against. Business logic (reliability
//! scoring, placement selection, state machine transitions) lives above
//! this layer; `Database` only persists and queries rows.

use crate::models::*;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate entry: {0}")]
    Duplicate(String),

    #[error("invalid data: {0}")]
    Invalid(String),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fabric".to_string(),
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

/// A chunk location joined with the device holding it, used wherever a
/// query needs the device's liveness or reliability alongside the
/// placement row (retrieval holder resolution, reaper victim selection).
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct LocationWithDevice {
    #[sqlx(flatten)]
    pub location: ChunkLocation,
    pub device_logical_id: String,
    pub device_state: DeviceState,
    pub device_reliability_score: f64,
}

/// PostgreSQL-backed implementation of the metadata store contract.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: DbConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(config.idle_timeout)
            .connect(&config.url)
            .await?;

        info!("connected to PostgreSQL metadata store");
        Ok(Self { pool })
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("metadata store migrations complete");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // =========================================================================
    // DEVICE OPERATIONS
    // =========================================================================

    /// Insert a brand-new device row: `state=ONLINE`, `reliability_score=100`,
    /// all counters zero. Callers (the device registry) are responsible for
    /// checking the device doesn't already exist by `logical_device_id`
    /// before calling this.
    #[instrument(skip(self, device))]
    pub async fn insert_device(&self, device: RegisterDevice) -> Result<Device> {
        let result = sqlx::query_as::<_, Device>(
            r#"
            INSERT INTO devices (
                logical_device_id, device_type, owner_id,
                total_capacity_bytes, available_capacity_bytes,
                state, last_seen_at, cumulative_uptime_ms, cumulative_downtime_ms,
                reliability_score
            )
            VALUES ($1, $2, $3, $4, $5, 'online', NOW(), 0, 0, 100.0)
            RETURNING *
            "#,
        )
        .bind(&device.logical_device_id)
        .bind(&device.device_type)
        .bind(device.owner_id)
        .bind(device.total_capacity_bytes)
        .bind(device.available_capacity_bytes)
        .fetch_one(&self.pool)
        .await?;

        debug!(device_id = %result.id, logical_device_id = %device.logical_device_id, "device registered");
        Ok(result)
    }

    pub async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        let result = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result)
    }

    pub async fn get_device_by_logical_id(&self, logical_device_id: &str) -> Result<Option<Device>> {
        let result = sqlx::query_as::<_, Device>(
            "SELECT * FROM devices WHERE logical_device_id = $1",
        )
        .bind(logical_device_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    /// Persist the full mutable surface of a device row: state, capacity,
    /// timers, and reliability score. Called by the device registry after
    /// it computes the new values in memory — keeps the score formula out
    /// of SQL and in one place.
    pub async fn update_device(&self, device: &Device) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE devices SET
                state = $2,
                total_capacity_bytes = $3,
                available_capacity_bytes = $4,
                last_seen_at = $5,
                cumulative_uptime_ms = $6,
                cumulative_downtime_ms = $7,
                reliability_score = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(device.id)
        .bind(device.state)
        .bind(device.total_capacity_bytes)
        .bind(device.available_capacity_bytes)
        .bind(device.last_seen_at)
        .bind(device.cumulative_uptime_ms)
        .bind(device.cumulative_downtime_ms)
        .bind(device.reliability_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `FindHealthy`: devices online, with enough free space and a high
    /// enough reliability score, ranked `(score DESC, available DESC)`.
    pub async fn find_healthy_devices(
        &self,
        min_free_bytes: i64,
        min_score: f64,
        limit: i64,
    ) -> Result<Vec<Device>> {
        let result = sqlx::query_as::<_, Device>(
            r#"
            SELECT * FROM devices
            WHERE state = 'online'
              AND available_capacity_bytes >= $1
              AND reliability_score >= $2
            ORDER BY reliability_score DESC, available_capacity_bytes DESC, id ASC
            LIMIT $3
            "#,
        )
        .bind(min_free_bytes)
        .bind(min_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    /// Debit `bytes` of available capacity after a successful placement ack.
    pub async fn debit_device_capacity(&self, device_id: Uuid, bytes: i64) -> Result<()> {
        sqlx::query(
            "UPDATE devices SET available_capacity_bytes = GREATEST(available_capacity_bytes - $2, 0), updated_at = NOW() WHERE id = $1",
        )
        .bind(device_id)
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Credit back `bytes` of available capacity after a reap/delete frees it.
    pub async fn credit_device_capacity(&self, device_id: Uuid, bytes: i64) -> Result<()> {
        sqlx::query(
            "UPDATE devices SET available_capacity_bytes = LEAST(available_capacity_bytes + $2, total_capacity_bytes), updated_at = NOW() WHERE id = $1",
        )
        .bind(device_id)
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // FILE OPERATIONS
    // =========================================================================

    #[instrument(skip(self, file))]
    pub async fn create_file(&self, file: CreateFile) -> Result<File> {
        let result = sqlx::query_as::<_, File>(
            r#"
            INSERT INTO files (
                id, original_name, mime, size_bytes, owner_id,
                wrapped_dek, dek_id, plaintext_hash, state, chunk_count
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'uploading', $9)
            RETURNING *
            "#,
        )
        .bind(file.id)
        .bind(&file.original_name)
        .bind(&file.mime)
        .bind(file.size_bytes)
        .bind(file.owner_id)
        .bind(&file.wrapped_dek)
        .bind(&file.dek_id)
        .bind(&file.plaintext_hash)
        .bind(file.chunk_count)
        .fetch_one(&self.pool)
        .await?;

        debug!(file_id = %result.id, "file row created (uploading)");
        Ok(result)
    }

    pub async fn get_file(&self, id: Uuid) -> Result<Option<File>> {
        let result = sqlx::query_as::<_, File>("SELECT * FROM files WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result)
    }

    /// Flip a file from `UPLOADING` to `ACTIVE` once its chunk rows exist.
    pub async fn activate_file(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE files SET state = 'active', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Mark a file `DELETED`. Physical removal (chunk/location cascade) is
    /// driven asynchronously by the reaper via `delete_file_cascade`.
    pub async fn mark_file_deleted(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE files SET state = 'deleted', updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Physically remove a file row. `ON DELETE CASCADE` on `chunks` and
    /// `chunk_locations` takes the rest of the tree with it.
    pub async fn delete_file_cascade(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // CHUNK OPERATIONS
    // =========================================================================

    #[instrument(skip(self, chunk))]
    pub async fn create_chunk(&self, chunk: CreateChunk) -> Result<Chunk> {
        let result = sqlx::query_as::<_, Chunk>(
            r#"
            INSERT INTO chunks (
                file_id, sequence_num, size_bytes,
                iv, auth_tag, aad, ciphertext_hash,
                state, current_replicas, target_replicas
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 0, $8)
            RETURNING *
            "#,
        )
        .bind(chunk.file_id)
        .bind(chunk.sequence_num)
        .bind(chunk.size_bytes)
        .bind(&chunk.iv)
        .bind(&chunk.auth_tag)
        .bind(&chunk.aad)
        .bind(&chunk.ciphertext_hash)
        .bind(chunk.target_replicas)
        .fetch_one(&self.pool)
        .await?;

        debug!(chunk_id = %result.id, file_id = %chunk.file_id, sequence_num = chunk.sequence_num, "chunk created");
        Ok(result)
    }

    pub async fn get_chunk(&self, id: Uuid) -> Result<Option<Chunk>> {
        let result = sqlx::query_as::<_, Chunk>("SELECT * FROM chunks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result)
    }

    pub async fn get_file_chunks(&self, file_id: Uuid) -> Result<Vec<Chunk>> {
        let result = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE file_id = $1 ORDER BY sequence_num",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    pub async fn update_chunk_state(&self, id: Uuid, state: ChunkState) -> Result<()> {
        sqlx::query("UPDATE chunks SET state = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_chunk_current_replicas(&self, id: Uuid, count: i32) -> Result<()> {
        sqlx::query("UPDATE chunks SET current_replicas = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(count)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Chunks in an active replication state, candidates for the health
    /// scanner's periodic sweep.
    pub async fn list_chunks_in_states(&self, states: &[ChunkState]) -> Result<Vec<Chunk>> {
        let names: Vec<&str> = states
            .iter()
            .map(|s| match s {
                ChunkState::Pending => "pending",
                ChunkState::Replicating => "replicating",
                ChunkState::Healthy => "healthy",
                ChunkState::Degraded => "degraded",
                ChunkState::Lost => "lost",
            })
            .collect();
        let result = sqlx::query_as::<_, Chunk>(
            "SELECT * FROM chunks WHERE state = ANY($1) ORDER BY updated_at ASC",
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    /// Every chunk with a placement on `device_id`, for `DetectAffected`.
    pub async fn get_chunks_on_device(&self, device_id: Uuid) -> Result<Vec<Chunk>> {
        let result = sqlx::query_as::<_, Chunk>(
            r#"
            SELECT c.* FROM chunks c
            JOIN chunk_locations cl ON cl.chunk_id = c.id
            WHERE cl.device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    // =========================================================================
    // CHUNK LOCATION (PLACEMENT) OPERATIONS
    // =========================================================================

    /// Insert a placement row. A `(chunk_id, device_id)` uniqueness
    /// violation is treated as a benign race: another writer already won,
    /// so this returns `Ok(None)` rather than an error on conflict.
    pub async fn insert_chunk_location(
        &self,
        chunk_id: Uuid,
        device_id: Uuid,
        local_path: &str,
        healthy: bool,
    ) -> Result<Option<ChunkLocation>> {
        let result = sqlx::query_as::<_, ChunkLocation>(
            r#"
            INSERT INTO chunk_locations (chunk_id, device_id, local_path, healthy, last_verified_at)
            VALUES ($1, $2, $3, $4, CASE WHEN $4 THEN NOW() ELSE NULL END)
            ON CONFLICT (chunk_id, device_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(chunk_id)
        .bind(device_id)
        .bind(local_path)
        .bind(healthy)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    pub async fn get_chunk_locations(&self, chunk_id: Uuid) -> Result<Vec<ChunkLocation>> {
        let result = sqlx::query_as::<_, ChunkLocation>(
            "SELECT * FROM chunk_locations WHERE chunk_id = $1",
        )
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    /// Placement rows for a chunk joined with the holding device, ordered
    /// by reliability ascending (lowest-reliability first — the order the
    /// reaper picks trim victims in).
    pub async fn get_chunk_locations_with_device(
        &self,
        chunk_id: Uuid,
    ) -> Result<Vec<LocationWithDevice>> {
        let rows = sqlx::query(
            r#"
            SELECT
                cl.id, cl.chunk_id, cl.device_id, cl.local_path, cl.healthy,
                cl.last_verified_at, cl.created_at,
                d.logical_device_id AS device_logical_id,
                d.state AS device_state,
                d.reliability_score AS device_reliability_score
            FROM chunk_locations cl
            JOIN devices d ON d.id = cl.device_id
            WHERE cl.chunk_id = $1
            ORDER BY d.reliability_score ASC
            "#,
        )
        .bind(chunk_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(LocationWithDevice {
                location: ChunkLocation {
                    id: row.try_get("id")?,
                    chunk_id: row.try_get("chunk_id")?,
                    device_id: row.try_get("device_id")?,
                    local_path: row.try_get("local_path")?,
                    healthy: row.try_get("healthy")?,
                    last_verified_at: row.try_get("last_verified_at")?,
                    created_at: row.try_get("created_at")?,
                },
                device_logical_id: row.try_get("device_logical_id")?,
                device_state: row.try_get("device_state")?,
                device_reliability_score: row.try_get("device_reliability_score")?,
            });
        }
        Ok(out)
    }

    /// Count placements that are healthy and on an ONLINE device — the
    /// definition of `current_replicas` per invariant I1.
    pub async fn count_healthy_holders(&self, chunk_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM chunk_locations cl
            JOIN devices d ON d.id = cl.device_id
            WHERE cl.chunk_id = $1 AND cl.healthy AND d.state = 'online'
            "#,
        )
        .bind(chunk_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn set_location_healthy(
        &self,
        chunk_id: Uuid,
        device_id: Uuid,
        healthy: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE chunk_locations
            SET healthy = $3, last_verified_at = CASE WHEN $3 THEN NOW() ELSE last_verified_at END
            WHERE chunk_id = $1 AND device_id = $2
            "#,
        )
        .bind(chunk_id)
        .bind(device_id)
        .bind(healthy)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip every healthy placement on `device_id` to unhealthy (the device
    /// just went OFFLINE/SUSPENDED). Returns the distinct chunk ids
    /// affected, for the caller to re-scan.
    pub async fn mark_device_locations_unhealthy(&self, device_id: Uuid) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE chunk_locations
            SET healthy = false
            WHERE device_id = $1 AND healthy
            RETURNING chunk_id
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    pub async fn delete_chunk_location(&self, chunk_id: Uuid, device_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM chunk_locations WHERE chunk_id = $1 AND device_id = $2")
            .bind(chunk_id)
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
