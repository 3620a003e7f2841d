use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use posterbox::cache::{CacheEntry, ImageCacheManager, ManualClock};
use posterbox::config::{CacheConfig, LoaderConfig};
use posterbox::images::{DisplaySource, FetchError, ImageFetcher, ImageServices, ImageSource};

const MB: usize = 1024 * 1024;

#[derive(Default)]
struct MapFetcher {
    bodies: Mutex<HashMap<String, Bytes>>,
    calls: Mutex<usize>,
}

impl MapFetcher {
    fn insert(&self, url: &str, body: Bytes) {
        self.bodies.lock().insert(url.to_string(), body);
    }

    fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl ImageFetcher for MapFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Bytes, FetchError> {
        *self.calls.lock() += 1;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.bodies
            .lock()
            .get(url)
            .cloned()
            .ok_or(FetchError::Status(404))
    }
}

fn start() -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
}

#[tokio::test]
async fn test_cleanup_converges_to_eighty_percent_of_budget() {
    let clock = Arc::new(ManualClock::new(start()));
    let manager = Arc::new(ImageCacheManager::with_clock(
        CacheConfig::in_memory(),
        clock.clone(),
    ));

    for i in 0..25 {
        let entry = CacheEntry::new(
            format!("https://img.example/{:02}.jpg", i),
            Bytes::from(vec![0u8; 5 * MB]),
            start() + Duration::seconds(i),
        );
        manager.store().put(&entry).await.unwrap();
    }
    clock.set(start() + Duration::minutes(1));

    let report = manager.run_cleanup().await;

    assert_eq!(report.removed_ttl, 0);
    assert_eq!(report.removed_size, 9);
    assert_eq!(report.timed_out_batches, 0);

    let stats = manager.get_cache_stats().await;
    assert_eq!(stats.total_images, 16);
    assert_eq!(stats.total_size, 80 * MB as u64);
    assert_eq!(stats.formatted_size, "80 MB");

    // Oldest entries go first
    assert!(manager.get_cached_image("https://img.example/08.jpg").await.is_none());
    assert!(manager.get_cached_image("https://img.example/09.jpg").await.is_some());
    assert!(manager.get_cached_image("https://img.example/24.jpg").await.is_some());
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        database_url: format!("sqlite://{}", dir.path().join("cache.db").display()),
        ..CacheConfig::default()
    };
    let url = "https://img.example/poster.jpg";

    let first = Arc::new(ImageCacheManager::new(config.clone()));
    first.cache_image(url, Bytes::from_static(b"poster")).await;
    first.store().close().await;

    let second = Arc::new(ImageCacheManager::new(config));
    assert_eq!(
        second.get_cached_image(url).await,
        Some(Bytes::from_static(b"poster"))
    );
}

#[tokio::test]
async fn test_preloaded_image_displays_without_fetching() {
    let cache = Arc::new(ImageCacheManager::new(CacheConfig::in_memory()));
    let fetcher = Arc::new(MapFetcher::default());
    let url = "https://img.example/poster.jpg";
    fetcher.insert(url, Bytes::from_static(b"poster"));

    let services = ImageServices::new(cache, fetcher.clone(), LoaderConfig::default());
    let summary = services
        .preloader()
        .preload_images(&[Some(ImageSource::from(url)), None])
        .await;
    assert_eq!(summary.fetched, 1);
    assert_eq!(fetcher.calls(), 1);

    let loader = services.loader();
    let display = loader.load(Some(ImageSource::from(url))).await;

    assert_eq!(fetcher.calls(), 1);
    assert!(display.as_str().starts_with("blob:"));
    assert_eq!(display.payload(), Some(&Bytes::from_static(b"poster")));
    assert!(!loader.snapshot().is_loading);
}

#[tokio::test]
async fn test_failed_load_shows_fallback() {
    let cache = Arc::new(ImageCacheManager::new(CacheConfig::in_memory()));
    let fetcher = Arc::new(MapFetcher::default());
    let services = ImageServices::new(cache, fetcher, LoaderConfig::default());

    let loader = services.loader();
    let display = loader
        .load(Some(ImageSource::from("https://img.example/gone.jpg")))
        .await;

    assert!(matches!(display, DisplaySource::Fallback(ref src) if src == "/placeholder.svg"));
    let snapshot = loader.snapshot();
    assert!(snapshot.error.is_some());
    assert!(!snapshot.is_loading);
}
