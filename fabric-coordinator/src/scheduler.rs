//! Background daemon: the periodic sweeps that aren't driven by a
//! device-channel event.
//!
//! Four independent loops, one per configured interval, each spawned as
//! its own task so a slow scan never delays the others. Modeled on the
//! fixed-interval `tokio::spawn` loop the rebalancer daemon in this
//! codebase's lineage uses, generalized to this coordinator's four
//! cadences instead of one.

use crate::config::CoordinatorConfig;
use fabric_control::{HealthScanner, InMemoryJobQueue};
use fabric_metadata::MetadataStore;
use fabric_storage::FilesystemChunkStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Scheduler {
    health_scanner: Arc<HealthScanner<MetadataStore>>,
    staging: Arc<FilesystemChunkStore>,
    heal_queue: Arc<InMemoryJobQueue>,
    reap_queue: Arc<InMemoryJobQueue>,
    config: CoordinatorConfig,
}

impl Scheduler {
    pub fn new(
        health_scanner: Arc<HealthScanner<MetadataStore>>,
        staging: Arc<FilesystemChunkStore>,
        heal_queue: Arc<InMemoryJobQueue>,
        reap_queue: Arc<InMemoryJobQueue>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            health_scanner,
            staging,
            heal_queue,
            reap_queue,
            config,
        })
    }

    /// Spawn the scan, trim, sweep, and summary loops. Returns their
    /// join handles; the caller isn't expected to await them, only to
    /// keep them alive for the life of the process.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            self.clone().spawn_scan_loop(),
            self.clone().spawn_trim_loop(),
            self.clone().spawn_sweep_loop(),
            self.clone().spawn_summary_loop(),
        ]
    }

    fn spawn_scan_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.scan_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.health_scanner.scan_all().await {
                    warn!(error = %e, "health scan failed");
                }
            }
        })
    }

    fn spawn_trim_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.trim_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.health_scanner.scan_excess().await {
                    warn!(error = %e, "excess-replica scan failed");
                }
            }
        })
    }

    /// Reclaim staged ciphertext that never got distributed and
    /// outlived `temp_chunk_ttl`. Runs at the same cadence as the TTL
    /// it's enforcing, so a chunk is never more than one interval past
    /// expiry before it's swept.
    fn spawn_sweep_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.temp_chunk_ttl);
            loop {
                ticker.tick().await;
                match self.staging.sweep_expired() {
                    Ok(reclaimed) if reclaimed > 0 => {
                        info!(reclaimed, "swept expired staged chunks");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "staged chunk sweep failed"),
                }
            }
        })
    }

    fn spawn_summary_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.summary_interval);
            loop {
                ticker.tick().await;
                info!(
                    pending_heal_jobs = self.heal_queue.len().await,
                    pending_reap_jobs = self.reap_queue.len().await,
                    redundancy_factor = self.config.redundancy_factor,
                    "coordinator summary"
                );
            }
        })
    }
}
