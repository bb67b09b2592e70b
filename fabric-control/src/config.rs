//! Coordinator configuration.
//!
//! Layered the way the rest of the codebase's services load settings:
//! built-in defaults, overridden by an optional TOML file, overridden by
//! environment variables, validated once at startup. `kek_hex` is the
//! only setting with no sane default — its absence is a fatal
//! `ConfigError`, not a fallback.

use fabric_core::chunk::ChunkSizePolicy;
use fabric_core::error::CoordinatorError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl From<ConfigError> for CoordinatorError {
    fn from(err: ConfigError) -> Self {
        CoordinatorError::ConfigError(err.to_string())
    }
}

/// Settings for the coordinator's device channel and control plane.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// 64 hex characters (32 bytes), the process-wide KEK. Required.
    pub kek_hex: String,

    pub database_url: String,
    pub redis_url: Option<String>,
    pub listen_addr: String,

    pub redundancy_factor: u32,
    pub safety_margin: u32,
    pub min_reliability_for_placement: f64,

    pub scan_interval: Duration,
    pub summary_interval: Duration,
    pub trim_interval: Duration,

    pub device_offline_threshold: Duration,
    pub heartbeat_interval: Duration,

    pub chunk_size_policy: ChunkSizePolicy,
    pub temp_chunk_ttl: Duration,
    pub max_file_size: u64,

    pub t_write: Duration,
    pub t_read: Duration,
    pub t_delete: Duration,

    pub healer_concurrency: usize,
    pub reaper_concurrency: usize,

    /// `human` (default, for local dev) or `json` (for aggregated log
    /// shipping in production).
    pub log_format: String,
    pub metrics_port: u16,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            kek_hex: String::new(),
            database_url: "postgres://localhost/fabric".to_string(),
            redis_url: Some("redis://localhost:6379".to_string()),
            listen_addr: "0.0.0.0:8080".to_string(),

            redundancy_factor: fabric_core::DEFAULT_TARGET_REPLICAS,
            safety_margin: fabric_core::SAFETY_MARGIN,
            min_reliability_for_placement: 70.0,

            scan_interval: Duration::from_secs(60 * 60),
            summary_interval: Duration::from_secs(24 * 60 * 60),
            trim_interval: Duration::from_secs(12 * 60 * 60),

            device_offline_threshold: Duration::from_secs(90),
            heartbeat_interval: Duration::from_secs(60),

            chunk_size_policy: ChunkSizePolicy::Adaptive,
            temp_chunk_ttl: Duration::from_secs(24 * 60 * 60),
            max_file_size: 10 * 1024 * 1024 * 1024,

            t_write: Duration::from_secs(30),
            t_read: Duration::from_secs(60),
            t_delete: Duration::from_secs(60),

            healer_concurrency: 5,
            reaper_concurrency: 4,

            log_format: "human".to_string(),
            metrics_port: 9090,
        }
    }
}

/// Mirrors [`CoordinatorConfig`] with every field optional, for partial
/// overrides from a TOML file or the environment. Durations are
/// expressed in seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
struct RawConfig {
    kek_hex: Option<String>,
    database_url: Option<String>,
    redis_url: Option<String>,
    listen_addr: Option<String>,
    redundancy_factor: Option<u32>,
    safety_margin: Option<u32>,
    min_reliability_for_placement: Option<f64>,
    scan_interval_secs: Option<u64>,
    summary_interval_secs: Option<u64>,
    trim_interval_secs: Option<u64>,
    device_offline_threshold_secs: Option<u64>,
    heartbeat_interval_secs: Option<u64>,
    fixed_chunk_size_bytes: Option<u64>,
    temp_chunk_ttl_secs: Option<u64>,
    max_file_size_bytes: Option<u64>,
    t_write_secs: Option<u64>,
    t_read_secs: Option<u64>,
    t_delete_secs: Option<u64>,
    healer_concurrency: Option<usize>,
    reaper_concurrency: Option<usize>,
    log_format: Option<String>,
    metrics_port: Option<u16>,
}

impl CoordinatorConfig {
    /// Load defaults, then an optional TOML file (path from
    /// `FABRIC_CONFIG_FILE`), then environment variables, then validate.
    /// Env always wins over the file, which always wins over defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FABRIC_CONFIG_FILE") {
            config.merge_file(Path::new(&path))?;
        }
        config.merge_env();
        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        self.apply(raw);
        Ok(())
    }

    fn merge_env(&mut self) {
        let raw = RawConfig {
            kek_hex: env_string("FABRIC_KEK_HEX"),
            database_url: env_string("DATABASE_URL"),
            redis_url: env_string("REDIS_URL"),
            listen_addr: env_string("FABRIC_LISTEN_ADDR"),
            redundancy_factor: env_parsed("FABRIC_REDUNDANCY_FACTOR"),
            safety_margin: env_parsed("FABRIC_SAFETY_MARGIN"),
            min_reliability_for_placement: env_parsed("FABRIC_MIN_RELIABILITY"),
            scan_interval_secs: env_parsed("FABRIC_SCAN_INTERVAL_SECS"),
            summary_interval_secs: env_parsed("FABRIC_SUMMARY_INTERVAL_SECS"),
            trim_interval_secs: env_parsed("FABRIC_TRIM_INTERVAL_SECS"),
            device_offline_threshold_secs: env_parsed("FABRIC_DEVICE_OFFLINE_THRESHOLD_SECS"),
            heartbeat_interval_secs: env_parsed("FABRIC_HEARTBEAT_INTERVAL_SECS"),
            fixed_chunk_size_bytes: env_parsed("FABRIC_FIXED_CHUNK_SIZE_BYTES"),
            temp_chunk_ttl_secs: env_parsed("FABRIC_TEMP_CHUNK_TTL_SECS"),
            max_file_size_bytes: env_parsed("FABRIC_MAX_FILE_SIZE_BYTES"),
            t_write_secs: env_parsed("FABRIC_T_WRITE_SECS"),
            t_read_secs: env_parsed("FABRIC_T_READ_SECS"),
            t_delete_secs: env_parsed("FABRIC_T_DELETE_SECS"),
            healer_concurrency: env_parsed("FABRIC_HEALER_CONCURRENCY"),
            reaper_concurrency: env_parsed("FABRIC_REAPER_CONCURRENCY"),
            log_format: env_string("FABRIC_LOG_FORMAT"),
            metrics_port: env_parsed("FABRIC_METRICS_PORT"),
        };
        self.apply(raw);
    }

    fn apply(&mut self, raw: RawConfig) {
        if let Some(v) = raw.kek_hex {
            self.kek_hex = v;
        }
        if let Some(v) = raw.database_url {
            self.database_url = v;
        }
        if let Some(v) = raw.redis_url {
            self.redis_url = Some(v);
        }
        if let Some(v) = raw.listen_addr {
            self.listen_addr = v;
        }
        if let Some(v) = raw.redundancy_factor {
            self.redundancy_factor = v;
        }
        if let Some(v) = raw.safety_margin {
            self.safety_margin = v;
        }
        if let Some(v) = raw.min_reliability_for_placement {
            self.min_reliability_for_placement = v;
        }
        if let Some(v) = raw.scan_interval_secs {
            self.scan_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.summary_interval_secs {
            self.summary_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.trim_interval_secs {
            self.trim_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.device_offline_threshold_secs {
            self.device_offline_threshold = Duration::from_secs(v);
        }
        if let Some(v) = raw.heartbeat_interval_secs {
            self.heartbeat_interval = Duration::from_secs(v);
        }
        if let Some(v) = raw.fixed_chunk_size_bytes {
            self.chunk_size_policy = ChunkSizePolicy::Fixed(v);
        }
        if let Some(v) = raw.temp_chunk_ttl_secs {
            self.temp_chunk_ttl = Duration::from_secs(v);
        }
        if let Some(v) = raw.max_file_size_bytes {
            self.max_file_size = v;
        }
        if let Some(v) = raw.t_write_secs {
            self.t_write = Duration::from_secs(v);
        }
        if let Some(v) = raw.t_read_secs {
            self.t_read = Duration::from_secs(v);
        }
        if let Some(v) = raw.t_delete_secs {
            self.t_delete = Duration::from_secs(v);
        }
        if let Some(v) = raw.healer_concurrency {
            self.healer_concurrency = v;
        }
        if let Some(v) = raw.reaper_concurrency {
            self.reaper_concurrency = v;
        }
        if let Some(v) = raw.log_format {
            self.log_format = v;
        }
        if let Some(v) = raw.metrics_port {
            self.metrics_port = v;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kek_hex.is_empty() {
            return Err(ConfigError::Missing(
                "kek_hex (set FABRIC_KEK_HEX or kek_hex in the config file)".to_string(),
            ));
        }
        if self.kek_hex.len() != 64 || hex::decode(&self.kek_hex).is_err() {
            return Err(ConfigError::Invalid {
                field: "kek_hex".to_string(),
                reason: "must be exactly 64 hex characters (32 bytes)".to_string(),
            });
        }
        if !(2..=5).contains(&self.redundancy_factor) {
            return Err(ConfigError::Invalid {
                field: "redundancy_factor".to_string(),
                reason: "must be between 2 and 5".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.min_reliability_for_placement) {
            return Err(ConfigError::Invalid {
                field: "min_reliability_for_placement".to_string(),
                reason: "must be between 0 and 100".to_string(),
            });
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
