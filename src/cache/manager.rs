use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::cache::clock::{Clock, SystemClock};
use crate::cache::entry::CacheEntry;
use crate::cache::eviction::{plan_evictions, EvictionReason};
use crate::cache::stats::{CacheCounters, CacheCountersSnapshot, CacheStats};
use crate::cache::store::ImageStore;
use crate::config::CacheConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub ran: bool,
    pub scanned: usize,
    pub removed_ttl: u64,
    pub removed_size: u64,
    pub timed_out_batches: usize,
}

/// TTL and size policy on top of [`ImageStore`].
///
/// Nothing here returns an error: storage failures are logged and turn into
/// a cache miss or an ignored write, the caller falls back to the network.
#[derive(Debug)]
pub struct ImageCacheManager {
    store: ImageStore,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    cleanup_lock: Mutex<()>,
    counters: CacheCounters,
}

impl ImageCacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: ImageStore::new(config.database_url.clone()),
            config,
            clock,
            cleanup_lock: Mutex::new(()),
            counters: CacheCounters::default(),
        }
    }

    pub fn store(&self) -> &ImageStore {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn counters(&self) -> CacheCountersSnapshot {
        self.counters.snapshot()
    }

    pub async fn get_cached_image(&self, key: &str) -> Option<Bytes> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.counters.on_miss();
                return None;
            }
            Err(e) => {
                warn!("Error getting cached image {}: {}", key, e);
                self.counters.on_miss();
                return None;
            }
        };

        if !entry.is_valid(self.config.ttl(), self.clock.now()) {
            debug!("Cached image expired, purging: {}", key);
            self.counters.on_expired_read();
            let stale = [(entry.key.clone(), entry.stored_at)];
            if let Err(e) = self.store.delete_unchanged(&stale).await {
                warn!("Error deleting expired image {}: {}", key, e);
            }
            return None;
        }

        self.counters.on_hit();
        Some(entry.payload)
    }

    /// Store `payload` under `key` and schedule a background cleanup check.
    ///
    /// Completes once the write has been committed (or ignored).
    pub async fn cache_image(self: &Arc<Self>, key: &str, payload: Bytes) {
        if !self.write(key, payload).await {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = Arc::clone(self);
                handle.spawn(async move {
                    manager.cleanup_if_needed().await;
                });
            }
            Err(_) => debug!("No runtime available, skipping cleanup after write"),
        }
    }

    /// Fire-and-forget variant of [`cache_image`](Self::cache_image).
    pub fn cache_image_detached(self: &Arc<Self>, key: impl Into<String>, payload: Bytes) {
        let key = key.into();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = Arc::clone(self);
                handle.spawn(async move {
                    manager.cache_image(&key, payload).await;
                });
            }
            Err(_) => warn!("No runtime available, not caching image: {}", key),
        }
    }

    // Returns true when the entry was committed
    async fn write(&self, key: &str, payload: Bytes) -> bool {
        let size = payload.len() as u64;
        if size > self.config.max_item_size {
            warn!(
                "Image too large to cache ({} bytes > {} bytes): {}",
                size, self.config.max_item_size, key
            );
            self.counters.on_rejected_oversized();
            return false;
        }

        let entry = CacheEntry::new(key, payload, self.clock.now());
        match self.store.put(&entry).await {
            Ok(()) => {
                self.counters.on_write();
                true
            }
            Err(e) => {
                warn!("Error caching image {}: {}", key, e);
                self.counters.on_write_error();
                false
            }
        }
    }

    pub async fn clear_cache(&self) {
        match self.store.clear().await {
            Ok(()) => info!("Image cache cleared"),
            Err(e) => warn!("Error clearing image cache: {}", e),
        }
    }

    pub async fn get_cache_stats(&self) -> CacheStats {
        let entries = match self.store.get_all_meta().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Error getting cache stats: {}", e);
                return CacheStats::default();
            }
        };

        let ttl = self.config.ttl();
        let now = self.clock.now();
        let total_size = entries.iter().map(|e| e.size).sum();
        let valid = entries.iter().filter(|e| e.is_valid(ttl, now)).count();

        CacheStats::new(entries.len() as u64, valid as u64, total_size)
    }

    /// Run a cleanup pass only when the store is over budget or holds an
    /// expired entry.
    pub async fn cleanup_if_needed(&self) -> CleanupReport {
        let usage = match self.store.usage().await {
            Ok(usage) => usage,
            Err(e) => {
                warn!("Error reading cache usage: {}", e);
                return CleanupReport::default();
            }
        };

        let now = self.clock.now();
        let over_budget = usage.total_size > self.config.max_cache_size;
        let has_expired = usage
            .oldest_stored_at
            .map(|oldest| now.signed_duration_since(oldest) >= self.config.ttl())
            .unwrap_or(false);

        if !over_budget && !has_expired {
            return CleanupReport::default();
        }

        self.run_cleanup().await
    }

    pub async fn run_cleanup(&self) -> CleanupReport {
        let _guard = self.cleanup_lock.lock().await;
        let start = Instant::now();

        let entries = match self.store.get_all_meta().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Error reading cache for cleanup: {}", e);
                return CleanupReport::default();
            }
        };

        let mut report = CleanupReport {
            ran: true,
            scanned: entries.len(),
            ..CleanupReport::default()
        };
        if entries.is_empty() {
            return report;
        }

        let plan = plan_evictions(
            entries,
            self.clock.now(),
            self.config.ttl(),
            self.config.max_cache_size,
            self.config.eviction_target(),
        );
        if plan.is_empty() {
            return report;
        }

        let batch_size = self.config.delete_batch_size.max(1);
        let batch_timeout = self.config.delete_batch_timeout();

        for batch in plan.planned.chunks(batch_size) {
            let versions: Vec<_> = batch.iter().map(|p| (p.key.clone(), p.stored_at)).collect();

            match tokio::time::timeout(batch_timeout, self.store.delete_unchanged(&versions)).await {
                Ok(Ok(_)) => {
                    for planned in batch {
                        match planned.reason {
                            EvictionReason::TtlExpired => report.removed_ttl += 1,
                            EvictionReason::OverBudget => report.removed_size += 1,
                        }
                    }
                }
                Ok(Err(e)) => warn!("Error deleting cache batch of {}: {}", versions.len(), e),
                Err(_) => {
                    warn!(
                        "Cache batch delete timed out after {:?}, continuing",
                        batch_timeout
                    );
                    report.timed_out_batches += 1;
                    self.counters.on_batch_timeout();
                }
            }
        }

        self.counters
            .on_cleanup_finished(report.removed_ttl, report.removed_size);
        info!(
            "Image cache cleanup removed {} expired and {} over-budget entries in {}ms ({} -> {} valid bytes)",
            report.removed_ttl,
            report.removed_size,
            start.elapsed().as_millis(),
            plan.valid_bytes_before,
            plan.valid_bytes_after,
        );

        report
    }
}
