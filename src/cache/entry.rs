use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Bytes,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Bytes, stored_at: DateTime<Utc>) -> Self {
        let size = payload.len() as u64;
        Self {
            key: key.into(),
            payload,
            stored_at,
            size,
        }
    }

    pub fn meta(&self) -> EntryMeta {
        EntryMeta {
            key: self.key.clone(),
            stored_at: self.stored_at,
            size: self.size,
        }
    }

    pub fn is_valid(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        is_fresh(self.stored_at, ttl, now)
    }
}

/// Bookkeeping columns of an entry, without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub size: u64,
}

impl EntryMeta {
    pub fn is_valid(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        is_fresh(self.stored_at, ttl, now)
    }
}

// An entry stored at `t` is readable strictly before `t + ttl`
pub(crate) fn is_fresh(stored_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(stored_at) < ttl
}
