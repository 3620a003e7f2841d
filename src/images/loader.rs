use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::ImageCacheManager;
use crate::config::LoaderConfig;
use crate::images::fetcher::{FetchError, ImageFetcher};
use crate::images::object_url::{ObjectUrl, ObjectUrlRegistry};
use crate::images::source::{resolve_source, ImageSource, ResolvedSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    Idle,
    Loading,
    Ready,
    Error,
}

#[derive(Debug, Clone)]
pub enum DisplaySource {
    Fallback(String),
    Path(String),
    Object(Arc<ObjectUrl>),
}

impl DisplaySource {
    pub fn as_str(&self) -> &str {
        match self {
            DisplaySource::Fallback(path) | DisplaySource::Path(path) => path,
            DisplaySource::Object(handle) => handle.url(),
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        match self {
            DisplaySource::Object(handle) => Some(handle.payload()),
            _ => None,
        }
    }

    fn release(&self) {
        if let DisplaySource::Object(handle) = self {
            handle.revoke();
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoaderSnapshot {
    pub display_source: DisplaySource,
    pub is_loading: bool,
    pub error: Option<Arc<FetchError>>,
    pub phase: LoadPhase,
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub fallback_src: String,
    pub static_prefix: String,
}

impl From<&LoaderConfig> for LoaderOptions {
    fn from(config: &LoaderConfig) -> Self {
        Self {
            fallback_src: config.fallback_src.clone(),
            static_prefix: config.static_prefix.clone(),
        }
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self::from(&LoaderConfig::default())
    }
}

#[derive(Debug)]
struct LoaderState {
    source: Option<ImageSource>,
    display: DisplaySource,
    phase: LoadPhase,
    error: Option<Arc<FetchError>>,
    generation: u64,
    cancel: Option<CancellationToken>,
}

/// Resolves one image source at a time into something displayable.
///
/// Starting a new load cancels the one in progress; any result belonging to
/// a superseded request is dropped and never touches the state.
pub struct ImageLoader {
    cache: Arc<ImageCacheManager>,
    fetcher: Arc<dyn ImageFetcher>,
    registry: Arc<ObjectUrlRegistry>,
    options: LoaderOptions,
    state: Mutex<LoaderState>,
}

impl ImageLoader {
    pub fn new(
        cache: Arc<ImageCacheManager>,
        fetcher: Arc<dyn ImageFetcher>,
        registry: Arc<ObjectUrlRegistry>,
        options: LoaderOptions,
    ) -> Self {
        let state = LoaderState {
            source: None,
            display: DisplaySource::Fallback(options.fallback_src.clone()),
            phase: LoadPhase::Idle,
            error: None,
            generation: 0,
            cancel: None,
        };

        Self {
            cache,
            fetcher,
            registry,
            options,
            state: Mutex::new(state),
        }
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        let state = self.state.lock();
        LoaderSnapshot {
            display_source: state.display.clone(),
            is_loading: state.phase == LoadPhase::Loading,
            error: state.error.clone(),
            phase: state.phase,
        }
    }

    /// Load `source`, returning what this request resolved to. A superseded
    /// request returns the fallback and leaves the state alone.
    pub async fn load(&self, source: Option<ImageSource>) -> DisplaySource {
        let resolved = resolve_source(source.as_ref(), &self.options.static_prefix);
        let (generation, cancel) = self.begin(source);

        match resolved {
            ResolvedSource::Missing => {
                let fallback = self.fallback();
                self.commit(generation, fallback, LoadPhase::Ready, None)
            }
            ResolvedSource::Bundled(path) | ResolvedSource::Local(path) => {
                self.commit(generation, DisplaySource::Path(path), LoadPhase::Ready, None)
            }
            ResolvedSource::Network(url) => self.load_network(generation, &cancel, &url).await,
        }
    }

    pub async fn reload(&self) -> DisplaySource {
        let source = self.state.lock().source.clone();
        self.load(source).await
    }

    /// Cancel anything in flight and release the displayed handle.
    pub fn unmount(&self) {
        let mut state = self.state.lock();
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.generation += 1;
        state.display.release();
        state.display = DisplaySource::Fallback(self.options.fallback_src.clone());
        state.phase = LoadPhase::Idle;
        state.error = None;
    }

    async fn load_network(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        url: &str,
    ) -> DisplaySource {
        if let Some(payload) = self.cache.get_cached_image(url).await {
            if cancel.is_cancelled() {
                return self.fallback();
            }
            let handle = DisplaySource::Object(Arc::new(self.registry.create(payload)));
            return self.commit(generation, handle, LoadPhase::Ready, None);
        }

        match self.fetcher.fetch(url, cancel).await {
            Ok(_) if cancel.is_cancelled() => self.fallback(),
            Ok(payload) => {
                self.cache.cache_image_detached(url, payload.clone());
                let handle = DisplaySource::Object(Arc::new(self.registry.create(payload)));
                self.commit(generation, handle, LoadPhase::Ready, None)
            }
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                debug!("Image load cancelled: {}", url);
                self.fallback()
            }
            Err(e) => {
                warn!("Error loading image {}: {}", url, e);
                let fallback = self.fallback();
                self.commit(generation, fallback, LoadPhase::Error, Some(Arc::new(e)))
            }
        }
    }

    fn begin(&self, source: Option<ImageSource>) -> (u64, CancellationToken) {
        let mut state = self.state.lock();
        if let Some(previous) = state.cancel.take() {
            previous.cancel();
        }

        let cancel = CancellationToken::new();
        state.generation += 1;
        state.cancel = Some(cancel.clone());
        state.source = source;
        state.phase = LoadPhase::Loading;
        state.error = None;

        (state.generation, cancel)
    }

    fn commit(
        &self,
        generation: u64,
        display: DisplaySource,
        phase: LoadPhase,
        error: Option<Arc<FetchError>>,
    ) -> DisplaySource {
        let mut state = self.state.lock();
        if state.generation != generation {
            display.release();
            return self.fallback();
        }

        let previous = std::mem::replace(&mut state.display, display.clone());
        previous.release();
        state.phase = phase;
        state.error = error;
        state.cancel = None;

        display
    }

    fn fallback(&self) -> DisplaySource {
        DisplaySource::Fallback(self.options.fallback_src.clone())
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        if let Some(cancel) = self.state.get_mut().cancel.take() {
            cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::images::testing::{FakeFetcher, FakeResponse};
    use std::time::Duration;

    struct Harness {
        cache: Arc<ImageCacheManager>,
        fetcher: Arc<FakeFetcher>,
        registry: Arc<ObjectUrlRegistry>,
        loader: ImageLoader,
    }

    fn harness() -> Harness {
        let cache = Arc::new(ImageCacheManager::new(CacheConfig::in_memory()));
        let fetcher = Arc::new(FakeFetcher::default());
        let registry = ObjectUrlRegistry::new();
        let loader = ImageLoader::new(
            cache.clone(),
            fetcher.clone(),
            registry.clone(),
            LoaderOptions::default(),
        );
        Harness {
            cache,
            fetcher,
            registry,
            loader,
        }
    }

    async fn wait_until_cached(cache: &ImageCacheManager, url: &str) -> bool {
        for _ in 0..100 {
            if cache.store().get(url).await.unwrap().is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_initial_state_is_idle_fallback() {
        let h = harness();
        let snapshot = h.loader.snapshot();
        assert_eq!(snapshot.phase, LoadPhase::Idle);
        assert!(!snapshot.is_loading);
        assert_eq!(snapshot.display_source.as_str(), "/placeholder.svg");
    }

    #[tokio::test]
    async fn test_missing_source_resolves_to_fallback() {
        let h = harness();
        let display = h.loader.load(None).await;

        assert!(matches!(display, DisplaySource::Fallback(ref p) if p == "/placeholder.svg"));
        assert_eq!(h.loader.snapshot().phase, LoadPhase::Ready);
        assert_eq!(h.fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_static_and_local_paths_skip_network() {
        let h = harness();

        let display = h.loader.load(Some("/static/media/logo.png".into())).await;
        assert_eq!(display.as_str(), "/static/media/logo.png");

        let display = h.loader.load(Some("/avatars/me.png".into())).await;
        assert_eq!(display.as_str(), "/avatars/me.png");

        assert_eq!(h.loader.snapshot().phase, LoadPhase::Ready);
        assert_eq!(h.fetcher.total_calls(), 0);
        assert!(h.cache.store().get_all_meta().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches_in_background() {
        let h = harness();
        let url = "https://img.example/poster.jpg";
        h.fetcher.body(url, b"poster-bytes");

        let display = h.loader.load(Some(url.into())).await;

        assert_eq!(display.payload(), Some(&Bytes::from_static(b"poster-bytes")));
        assert!(display.as_str().starts_with("blob:"));
        let snapshot = h.loader.snapshot();
        assert_eq!(snapshot.phase, LoadPhase::Ready);
        assert!(snapshot.error.is_none());
        assert_eq!(h.fetcher.calls_for(url), 1);
        assert!(wait_until_cached(&h.cache, url).await);
    }

    #[tokio::test]
    async fn test_hit_skips_network() {
        let h = harness();
        let url = "https://img.example/poster.jpg";
        h.cache.cache_image(url, Bytes::from_static(b"cached")).await;

        let display = h.loader.load(Some(url.into())).await;

        assert_eq!(display.payload(), Some(&Bytes::from_static(b"cached")));
        assert_eq!(h.fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_sets_error_and_fallback() {
        let h = harness();
        let url = "https://img.example/broken.jpg";
        h.fetcher.set(url, FakeResponse::Status(500));

        let display = h.loader.load(Some(url.into())).await;

        assert!(matches!(display, DisplaySource::Fallback(_)));
        let snapshot = h.loader.snapshot();
        assert_eq!(snapshot.phase, LoadPhase::Error);
        assert!(!snapshot.is_loading);
        assert!(matches!(
            snapshot.error.as_deref(),
            Some(FetchError::Status(500))
        ));
        assert!(h.cache.store().get(url).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_after_failure() {
        let h = harness();
        let url = "https://img.example/flaky.jpg";
        h.fetcher.set(url, FakeResponse::Status(503));
        h.loader.load(Some(url.into())).await;
        assert_eq!(h.loader.snapshot().phase, LoadPhase::Error);

        h.fetcher.body(url, b"recovered");
        let display = h.loader.reload().await;

        assert_eq!(display.payload(), Some(&Bytes::from_static(b"recovered")));
        let snapshot = h.loader.snapshot();
        assert_eq!(snapshot.phase, LoadPhase::Ready);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_newer_request_wins_over_late_response() {
        let h = harness();
        let slow = "https://img.example/a.jpg";
        let fast = "https://img.example/b.jpg";
        h.fetcher.set(
            slow,
            FakeResponse::Body(Bytes::from_static(b"A"), Duration::from_millis(200)),
        );
        h.fetcher.body(fast, b"B");

        let (a, b) = tokio::join!(h.loader.load(Some(slow.into())), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.loader.load(Some(fast.into())).await
        });

        assert!(matches!(a, DisplaySource::Fallback(_)));
        assert_eq!(b.payload(), Some(&Bytes::from_static(b"B")));

        let snapshot = h.loader.snapshot();
        assert_eq!(snapshot.phase, LoadPhase::Ready);
        assert_eq!(
            snapshot.display_source.payload(),
            Some(&Bytes::from_static(b"B"))
        );
        // A's late bytes never became a handle
        assert_eq!(h.registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_superseded_handle_is_revoked() {
        let h = harness();
        h.fetcher.body("https://img.example/1.jpg", b"one");
        h.fetcher.body("https://img.example/2.jpg", b"two");

        let first = h.loader.load(Some("https://img.example/1.jpg".into())).await;
        let first_url = first.as_str().to_string();
        assert!(h.registry.resolve(&first_url).is_some());

        h.loader.load(Some("https://img.example/2.jpg".into())).await;

        assert!(h.registry.resolve(&first_url).is_none());
        assert_eq!(h.registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_unmount_cancels_in_flight_fetch() {
        let h = harness();
        let url = "https://img.example/hang.jpg";
        h.fetcher.set(url, FakeResponse::Hang);

        let (display, _) = tokio::join!(h.loader.load(Some(url.into())), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.loader.unmount();
        });

        assert!(matches!(display, DisplaySource::Fallback(_)));
        assert_eq!(h.fetcher.cancelled_count(), 1);
        let snapshot = h.loader.snapshot();
        assert_eq!(snapshot.phase, LoadPhase::Idle);
        assert!(snapshot.error.is_none());
    }

    #[tokio::test]
    async fn test_unmount_releases_handle() {
        let h = harness();
        let url = "https://img.example/poster.jpg";
        h.fetcher.body(url, b"poster");
        h.loader.load(Some(url.into())).await;
        assert_eq!(h.registry.live_count(), 1);

        h.loader.unmount();

        assert_eq!(h.registry.live_count(), 0);
    }
}
