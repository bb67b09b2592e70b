//! Data model for the replication control plane.
//!
//! These structs mirror the persisted schema exactly: `Device`, `File`,
//! `Chunk`, and `ChunkLocation`. Row identifiers are opaque (`Uuid`)
//! except `Device.logical_device_id`, the externally presented wire
//! identity, which is what every device-channel operation uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A device's connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
    Suspended,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// A storage device registered with the coordinator.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Device {
    /// Internal row id. Never crosses the device-channel boundary.
    pub id: Uuid,
    /// Externally presented wire identity; unique.
    pub logical_device_id: String,
    pub device_type: String,
    pub owner_id: Option<Uuid>,

    pub total_capacity_bytes: i64,
    pub available_capacity_bytes: i64,

    pub state: DeviceState,

    pub last_seen_at: DateTime<Utc>,
    pub cumulative_uptime_ms: i64,
    pub cumulative_downtime_ms: i64,

    /// `clamp(round(100 * uptime / (uptime + downtime), 2), 0, 100)`;
    /// 100 when `uptime + downtime = 0`.
    pub reliability_score: f64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for registering a device for the first time, or on
/// reconnect.
#[derive(Debug, Clone)]
pub struct RegisterDevice {
    pub logical_device_id: String,
    pub device_type: String,
    pub owner_id: Option<Uuid>,
    pub total_capacity_bytes: i64,
    pub available_capacity_bytes: i64,
}

/// Computes the reliability score from cumulative uptime/downtime, per
/// the formula in the device registry design.
pub fn reliability_score(uptime_ms: i64, downtime_ms: i64) -> f64 {
    let total = uptime_ms + downtime_ms;
    if total <= 0 {
        return 100.0;
    }
    let raw = 100.0 * (uptime_ms as f64) / (total as f64);
    let rounded = (raw * 100.0).round() / 100.0;
    rounded.clamp(0.0, 100.0)
}

/// A file's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum FileState {
    Uploading,
    Active,
    Deleted,
}

/// A file uploaded into the fabric: its chunks are the unit of
/// replication, but integrity is checked end-to-end against this row's
/// `plaintext_hash`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct File {
    pub id: Uuid,
    pub original_name: String,
    pub mime: String,
    pub size_bytes: i64,
    pub owner_id: Option<Uuid>,

    pub wrapped_dek: String,
    pub dek_id: String,
    pub plaintext_hash: String,

    pub state: FileState,
    pub chunk_count: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a file row in the `UPLOADING` state, before
/// its chunk rows exist.
///
/// `id` is caller-assigned rather than database-generated: the chunker
/// binds every chunk's AAD and derived key to this id before any metadata
/// row exists, so the persisted row must carry the same id the crypto
/// pipeline already committed to, not one the database mints afterward.
#[derive(Debug, Clone)]
pub struct CreateFile {
    pub id: Uuid,
    pub original_name: String,
    pub mime: String,
    pub size_bytes: i64,
    pub owner_id: Option<Uuid>,
    pub wrapped_dek: String,
    pub dek_id: String,
    pub plaintext_hash: String,
    pub chunk_count: i32,
}

/// A chunk's replication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum ChunkState {
    Pending,
    Replicating,
    Healthy,
    Degraded,
    Lost,
}

/// One encrypted piece of a file. Identity is `(file_id, sequence_num)`,
/// unique per file.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub file_id: Uuid,
    pub sequence_num: i32,
    pub size_bytes: i64,

    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub aad: Vec<u8>,
    pub ciphertext_hash: Vec<u8>,

    pub state: ChunkState,
    pub current_replicas: i32,
    pub target_replicas: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a chunk row at upload time, state `PENDING`.
#[derive(Debug, Clone)]
pub struct CreateChunk {
    pub file_id: Uuid,
    pub sequence_num: i32,
    pub size_bytes: i64,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub aad: Vec<u8>,
    pub ciphertext_hash: Vec<u8>,
    pub target_replicas: i32,
}

/// A placement: one device holding (or expected to hold) one chunk.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChunkLocation {
    pub id: Uuid,
    pub chunk_id: Uuid,
    pub device_id: Uuid,
    /// Opaque per-device hint; not interpreted by the coordinator.
    pub local_path: String,

    pub healthy: bool,
    pub last_verified_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}
