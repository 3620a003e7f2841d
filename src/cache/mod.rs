pub mod clock;
pub mod entry;
pub mod eviction;
pub mod manager;
pub mod stats;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{CacheEntry, EntryMeta};
pub use manager::{CleanupReport, ImageCacheManager};
pub use stats::{format_bytes, CacheCountersSnapshot, CacheStats};
pub use store::{ImageStore, StoreError, StoreUsage};
