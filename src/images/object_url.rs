use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

const SCHEME: &str = "blob:posterbox/";

/// Registry of temporary object URLs handed to the display layer.
///
/// A URL stays resolvable until it is revoked, either explicitly or when
/// the last [`ObjectUrl`] handle for it is dropped.
#[derive(Debug, Default)]
pub struct ObjectUrlRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<u64, Bytes>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create(self: &Arc<Self>, payload: Bytes) -> ObjectUrl {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(id, payload.clone());
        ObjectUrl {
            id,
            url: format!("{}{}", SCHEME, id),
            payload,
            registry: Arc::clone(self),
        }
    }

    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        let id = url.strip_prefix(SCHEME)?.parse::<u64>().ok()?;
        self.live.lock().get(&id).cloned()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    fn revoke(&self, id: u64) -> bool {
        self.live.lock().remove(&id).is_some()
    }
}

pub struct ObjectUrl {
    id: u64,
    url: String,
    payload: Bytes,
    registry: Arc<ObjectUrlRegistry>,
}

impl ObjectUrl {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Idempotent.
    pub fn revoke(&self) -> bool {
        self.registry.revoke(self.id)
    }
}

impl Drop for ObjectUrl {
    fn drop(&mut self) {
        self.registry.revoke(self.id);
    }
}

impl fmt::Debug for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectUrl")
            .field("url", &self.url)
            .field("size", &self.payload.len())
            .finish()
    }
}
