use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::images::fetcher::{FetchError, ImageFetcher};

#[derive(Debug, Clone)]
pub(crate) enum FakeResponse {
    // Resolves after the delay even if cancelled, like a response already on the wire
    Body(Bytes, Duration),
    Status(u16),
    // Never resolves until cancelled
    Hang,
}

#[derive(Debug, Default)]
pub(crate) struct FakeFetcher {
    responses: Mutex<HashMap<String, FakeResponse>>,
    calls: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeFetcher {
    pub(crate) fn set(&self, url: &str, response: FakeResponse) {
        self.responses.lock().insert(url.to_string(), response);
    }

    pub(crate) fn body(&self, url: &str, body: &'static [u8]) {
        self.set(url, FakeResponse::Body(Bytes::from_static(body), Duration::ZERO));
    }

    pub(crate) fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| u.as_str() == url).count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub(crate) fn cancelled_count(&self) -> usize {
        self.cancelled.lock().len()
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Bytes, FetchError> {
        self.calls.lock().push(url.to_string());
        let response = self
            .responses
            .lock()
            .get(url)
            .cloned()
            .unwrap_or(FakeResponse::Status(404));

        match response {
            FakeResponse::Body(body, delay) => {
                let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(active, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(body)
            }
            FakeResponse::Status(code) => Err(FetchError::Status(code)),
            FakeResponse::Hang => {
                cancel.cancelled().await;
                self.cancelled.lock().push(url.to_string());
                Err(FetchError::Cancelled)
            }
        }
    }
}
