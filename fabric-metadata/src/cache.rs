//! Redis caching layer for the metadata store.
//!
//! A thin generic get/set/delete client plus [`OptionalCache`], which
//! [`crate::MetadataStore`] holds so a cache-connection failure at startup
//! degrades to no caching rather than refusing to start.

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache miss")]
    Miss,
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL
    pub url: String,
    /// Default TTL for cached items; individual call sites in
    /// `MetadataStore` pass their own TTL, this is only the constructor's
    /// fallback.
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// Redis cache client
#[derive(Clone)]
pub struct Cache {
    conn: MultiplexedConnection,
}

impl Cache {
    /// Create a new cache connection
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis cache");
        Ok(Self { conn })
    }

    /// Set a value with TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, json, ttl.as_secs()).await?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cache set");
        Ok(())
    }

    /// Get a value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(key).await?;
        match json {
            Some(json) => {
                let value = serde_json::from_str(&json)?;
                debug!(key = %key, "Cache hit");
                Ok(value)
            }
            None => {
                debug!(key = %key, "Cache miss");
                Err(CacheError::Miss)
            }
        }
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        debug!(key = %key, "Cache delete");
        Ok(())
    }

}

/// Optional cache wrapper - allows graceful degradation if Redis is unavailable
pub struct OptionalCache {
    cache: Option<Cache>,
}

impl OptionalCache {
    /// Create with cache
    pub fn new(cache: Cache) -> Self {
        Self { cache: Some(cache) }
    }

    /// Create without cache (no-op)
    pub fn none() -> Self {
        Self { cache: None }
    }

    /// Try to get from cache, return None on miss or error
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match &self.cache {
            Some(cache) => cache.get(key).await.ok(),
            None => None,
        }
    }

    /// Try to set in cache, ignore errors
    pub async fn try_set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(key, value, ttl).await {
                warn!(key = %key, error = %e, "Cache set failed");
            }
        }
    }

    /// Try to delete from cache, ignore errors
    pub async fn try_delete(&self, key: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(key).await {
                warn!(key = %key, error = %e, "Cache delete failed");
            }
        }
    }

    /// Check if cache is available
    pub fn is_available(&self) -> bool {
        self.cache.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.url, "redis://localhost:6379");
    }

    #[test]
    fn test_optional_cache_none_is_unavailable() {
        let cache = OptionalCache::none();
        assert!(!cache.is_available());
    }
}
