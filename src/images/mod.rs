pub mod fetcher;
pub mod loader;
pub mod object_url;
pub mod preloader;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

pub use fetcher::{content_type_for, FetchError, HttpImageFetcher, ImageFetcher};
pub use loader::{DisplaySource, ImageLoader, LoadPhase, LoaderOptions, LoaderSnapshot};
pub use object_url::{ObjectUrl, ObjectUrlRegistry};
pub use preloader::{ImagePreloader, PreloadSummary};
pub use source::{resolve_source, ImageSource, ResolvedSource, StaticImage};

use crate::cache::ImageCacheManager;
use crate::config::LoaderConfig;

/// Everything a view needs to turn image sources into displayable images.
#[derive(Clone)]
pub struct ImageServices {
    pub cache: Arc<ImageCacheManager>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub registry: Arc<ObjectUrlRegistry>,
    pub config: LoaderConfig,
}

impl ImageServices {
    pub fn new(
        cache: Arc<ImageCacheManager>,
        fetcher: Arc<dyn ImageFetcher>,
        config: LoaderConfig,
    ) -> Self {
        Self {
            cache,
            fetcher,
            registry: ObjectUrlRegistry::new(),
            config,
        }
    }

    pub fn loader(&self) -> ImageLoader {
        ImageLoader::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.registry),
            LoaderOptions::from(&self.config),
        )
    }

    pub fn preloader(&self) -> ImagePreloader {
        ImagePreloader::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.fetcher),
            self.config.static_prefix.clone(),
            self.config.preload_concurrency,
        )
    }
}
