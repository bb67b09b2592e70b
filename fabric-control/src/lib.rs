//! Fabric control plane
//!
//! This crate implements the business logic that sits above
//! `fabric-metadata`, `fabric-connect`, and `fabric-storage`: device
//! lifecycle tracking, placement decisions, chunk distribution and
//! retrieval, and the background jobs that keep replication healthy
//! (health scanning, healing, and reaping of deleted/excess replicas).

pub mod config;
pub mod device_registry;
pub mod distribution;
pub(crate) mod error;
pub mod health_scanner;
pub mod healer;
pub mod ingestion;
pub mod jobs;
pub mod placement;
pub mod reaper;
pub mod retrieval;

pub use config::{ConfigError, CoordinatorConfig};
pub use device_registry::{DeviceHealth, DeviceRegistry};
pub use distribution::{Distribution, FanOutResult, FileDistributionOutcome};
pub use health_scanner::{HealthMetadataClient, HealthScanner, ScanSummary};
pub use healer::Healer;
pub use ingestion::Ingestion;
pub use jobs::{InMemoryJobQueue, Job, JobKind};
pub use placement::{Placement, PlacementConfig};
pub use reaper::Reaper;
pub use retrieval::Retrieval;
