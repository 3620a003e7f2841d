use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::ImageCacheManager;
use crate::images::fetcher::ImageFetcher;
use crate::images::source::{resolve_source, ImageSource, ResolvedSource};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    pub requested: usize,
    pub scheduled: usize,
    pub already_cached: usize,
    pub fetched: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreloadOutcome {
    AlreadyCached,
    Fetched,
    Failed,
    Cancelled,
    // Another batch picked the URL up first
    Skipped,
}

/// Warms the cache for lists of images ahead of display.
pub struct ImagePreloader {
    cache: Arc<ImageCacheManager>,
    fetcher: Arc<dyn ImageFetcher>,
    static_prefix: String,
    concurrency: usize,
    preloaded: RwLock<HashSet<String>>,
    in_flight: Mutex<HashSet<String>>,
    shutdown: CancellationToken,
}

// Removes its URL from the in-flight set however the fetch ends
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    url: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.url);
    }
}

impl ImagePreloader {
    pub fn new(
        cache: Arc<ImageCacheManager>,
        fetcher: Arc<dyn ImageFetcher>,
        static_prefix: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            cache,
            fetcher,
            static_prefix: static_prefix.into(),
            concurrency: concurrency.max(1),
            preloaded: RwLock::new(HashSet::new()),
            in_flight: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn preloaded_images(&self) -> HashSet<String> {
        self.preloaded.read().clone()
    }

    pub fn is_preloaded(&self, url: &str) -> bool {
        self.preloaded.read().contains(url)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Fetch and cache every network source not already handled, at most
    /// `concurrency` at a time. Failures are logged and skipped.
    pub async fn preload_images(&self, sources: &[Option<ImageSource>]) -> PreloadSummary {
        let mut summary = PreloadSummary {
            requested: sources.len(),
            ..PreloadSummary::default()
        };
        if self.shutdown.is_cancelled() {
            return summary;
        }

        let urls = self.pending_urls(sources);
        summary.scheduled = urls.len();
        if urls.is_empty() {
            return summary;
        }

        for chunk in urls.chunks(self.concurrency) {
            if self.shutdown.is_cancelled() {
                debug!("Preloader shut down, dropping remaining batch");
                break;
            }

            let outcomes = join_all(chunk.iter().map(|url| self.preload_one(url))).await;
            for outcome in outcomes {
                match outcome {
                    PreloadOutcome::AlreadyCached => summary.already_cached += 1,
                    PreloadOutcome::Fetched => summary.fetched += 1,
                    PreloadOutcome::Failed => summary.failed += 1,
                    PreloadOutcome::Cancelled => summary.cancelled += 1,
                    PreloadOutcome::Skipped => {}
                }
            }
        }

        debug!("Preload finished: {:?}", summary);
        summary
    }

    /// Abort every tracked fetch. Later calls return without doing work.
    pub fn shutdown(&self) {
        let in_flight = self.in_flight_count();
        self.shutdown.cancel();
        if in_flight > 0 {
            info!("Preloader shutting down, cancelled {} in-flight fetches", in_flight);
        }
    }

    // Unique network URLs that are neither preloaded nor being fetched
    fn pending_urls(&self, sources: &[Option<ImageSource>]) -> Vec<String> {
        let preloaded = self.preloaded.read();
        let in_flight = self.in_flight.lock();
        let mut seen = HashSet::new();

        sources
            .iter()
            .filter_map(|source| match resolve_source(source.as_ref(), &self.static_prefix) {
                ResolvedSource::Network(url) => Some(url),
                _ => None,
            })
            .filter(|url| {
                !preloaded.contains(url) && !in_flight.contains(url) && seen.insert(url.clone())
            })
            .collect()
    }

    fn track(&self, url: &str) -> Option<InFlightGuard<'_>> {
        if !self.in_flight.lock().insert(url.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: &self.in_flight,
            url: url.to_string(),
        })
    }

    fn mark_preloaded(&self, url: &str) {
        self.preloaded.write().insert(url.to_string());
    }

    async fn preload_one(&self, url: &str) -> PreloadOutcome {
        let cancel = self.shutdown.child_token();
        let _guard = match self.track(url) {
            Some(guard) => guard,
            None => return PreloadOutcome::Skipped,
        };

        if self.cache.get_cached_image(url).await.is_some() {
            self.mark_preloaded(url);
            return PreloadOutcome::AlreadyCached;
        }

        match self.fetcher.fetch(url, &cancel).await {
            Ok(payload) => {
                self.cache.cache_image(url, payload).await;
                self.mark_preloaded(url);
                PreloadOutcome::Fetched
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                debug!("Preload cancelled: {}", url);
                PreloadOutcome::Cancelled
            }
            Err(e) => {
                warn!("Failed to preload image {}: {}", url, e);
                PreloadOutcome::Failed
            }
        }
    }
}

impl Drop for ImagePreloader {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
