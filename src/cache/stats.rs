use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_images: u64,
    pub valid_images: u64,
    pub total_size: u64,
    pub formatted_size: String,
}

impl CacheStats {
    pub fn new(total_images: u64, valid_images: u64, total_size: u64) -> Self {
        Self {
            total_images,
            valid_images,
            total_size,
            formatted_size: format_bytes(total_size),
        }
    }
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new(0, 0, 0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCountersSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub expired_on_read: u64,
    pub writes: u64,
    pub write_errors: u64,
    pub rejected_oversized: u64,
    pub cleanup_runs: u64,
    pub cleanup_removed_ttl: u64,
    pub cleanup_removed_size: u64,
    pub cleanup_batch_timeouts: u64,
}

// Process-local counters, reset on restart
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired_on_read: AtomicU64,
    writes: AtomicU64,
    write_errors: AtomicU64,
    rejected_oversized: AtomicU64,
    cleanup_runs: AtomicU64,
    cleanup_removed_ttl: AtomicU64,
    cleanup_removed_size: AtomicU64,
    cleanup_batch_timeouts: AtomicU64,
}

impl CacheCounters {
    pub fn on_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_expired_read(&self) {
        self.expired_on_read.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_rejected_oversized(&self) {
        self.rejected_oversized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_batch_timeout(&self) {
        self.cleanup_batch_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_cleanup_finished(&self, removed_ttl: u64, removed_size: u64) {
        self.cleanup_runs.fetch_add(1, Ordering::Relaxed);
        self.cleanup_removed_ttl
            .fetch_add(removed_ttl, Ordering::Relaxed);
        self.cleanup_removed_size
            .fetch_add(removed_size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheCountersSnapshot {
        CacheCountersSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired_on_read: self.expired_on_read.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            rejected_oversized: self.rejected_oversized.load(Ordering::Relaxed),
            cleanup_runs: self.cleanup_runs.load(Ordering::Relaxed),
            cleanup_removed_ttl: self.cleanup_removed_ttl.load(Ordering::Relaxed),
            cleanup_removed_size: self.cleanup_removed_size.load(Ordering::Relaxed),
            cleanup_batch_timeouts: self.cleanup_batch_timeouts.load(Ordering::Relaxed),
        }
    }
}

const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human readable size with up to two decimals, e.g. `1.5 KB` or `5 MB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
