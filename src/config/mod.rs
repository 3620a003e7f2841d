use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_ITEM_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub address: String,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub database_url: String,
    pub ttl_secs: u64,
    pub max_cache_size: u64,
    pub max_item_size: u64,
    pub eviction_target_ratio: f64,
    pub delete_batch_size: usize,
    pub delete_batch_timeout_ms: u64,
}

impl CacheConfig {
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            ..Self::default()
        }
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.min(i64::MAX as u64) as i64)
    }

    pub fn delete_batch_timeout(&self) -> Duration {
        Duration::from_millis(self.delete_batch_timeout_ms)
    }

    // Size the cleanup pass evicts down to once the budget is exceeded
    pub fn eviction_target(&self) -> u64 {
        let ratio = self.eviction_target_ratio.clamp(0.0, 1.0);
        (self.max_cache_size as f64 * ratio) as u64
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://image_cache.db".to_string(),
            ttl_secs: DEFAULT_TTL_SECS,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            max_item_size: DEFAULT_MAX_ITEM_SIZE,
            eviction_target_ratio: 0.8,
            delete_batch_size: 10,
            delete_batch_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoaderConfig {
    pub fallback_src: String,
    pub static_prefix: String,
    pub preload_concurrency: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            fallback_src: "/placeholder.svg".to_string(),
            static_prefix: "/static/".to_string(),
            preload_concurrency: 3,
        }
    }
}

fn default_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("posterbox/{}", env!("CARGO_PKG_VERSION"))
}
