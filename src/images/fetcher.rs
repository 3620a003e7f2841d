use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::ImageFormat;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image request failed with status: {0}")]
    Status(u16),

    #[error("Image request cancelled")]
    Cancelled,

    #[error("Client error: {0}")]
    Client(String),
}

impl FetchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}

/// Turns a URL into raw image bytes. Implementations must return
/// [`FetchError::Cancelled`] promptly once `cancel` fires.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Bytes, FetchError>;
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: u64, user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Client(format!("Failed to build client: {}", e)))?;

        Ok(Self { client })
    }

    async fn request(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "image/avif,image/webp,image/*,*/*;q=0.8")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            log::debug!("Image request for {} failed with status: {}", url, status);
            return Err(FetchError::Status(status.as_u16()));
        }

        Ok(response.bytes().await?)
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<Bytes, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.request(url) => result,
        }
    }
}

// Sniff the content type from the image data itself
pub fn content_type_for(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Gif) => "image/gif",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Tiff) => "image/tiff",
        Ok(ImageFormat::Ico) => "image/x-icon",
        Ok(ImageFormat::Avif) => "image/avif",
        _ => "application/octet-stream",
    }
}
