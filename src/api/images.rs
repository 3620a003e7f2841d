use std::io::Cursor;

use bytes::Bytes;
use rocket::http::{ContentType, Header, Status};
use rocket::response::{self, Redirect, Responder, Response};
use rocket::serde::json::Json;
use rocket::{Request, State};
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::cache::{CacheCountersSnapshot, CacheStats};
use crate::images::{
    content_type_for, DisplaySource, ImagePreloader, ImageServices, ImageSource, PreloadSummary,
};

// Responder for image data
pub struct ImageResponse {
    pub data: Bytes,
    pub content_type: String,
}

impl<'r> Responder<'r, 'static> for ImageResponse {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let content_type =
            ContentType::parse_flexible(&self.content_type).unwrap_or(ContentType::Binary);
        let etag = format!("\"{:x}\"", md5::compute(&self.data));

        if let Some(if_none_match) = req.headers().get_one("If-None-Match") {
            if if_none_match == etag {
                return Response::build()
                    .status(Status::NotModified)
                    .header(Header::new("ETag", etag))
                    .header(Header::new("Cache-Control", "public, max-age=86400"))
                    .ok();
            }
        }

        Response::build()
            .header(content_type)
            .header(Header::new("Cache-Control", "public, max-age=86400"))
            .header(Header::new("ETag", etag))
            .sized_body(self.data.len(), Cursor::new(self.data))
            .ok()
    }
}

#[derive(Responder)]
pub enum ImageReply {
    Image(ImageResponse),
    Redirect(Redirect),
}

#[derive(Debug, Deserialize)]
pub struct PreloadRequest {
    pub sources: Vec<Option<ImageSource>>,
}

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub counters: CacheCountersSnapshot,
}

#[get("/images?<url>")]
pub async fn get_image(url: String, services: &State<ImageServices>) -> Result<ImageReply, ApiError> {
    if url.trim().is_empty() {
        return Err(ApiError::BadRequest("Query parameter 'url' is empty".to_string()));
    }

    log::debug!("Serving image: {}", url);

    let loader = services.loader();
    let display = loader.load(Some(ImageSource::from(url))).await;
    if let Some(error) = loader.snapshot().error {
        return Err(error.into());
    }

    match display {
        DisplaySource::Object(handle) => {
            let data = handle.payload().clone();
            Ok(ImageReply::Image(ImageResponse {
                content_type: content_type_for(&data).to_string(),
                data,
            }))
        }
        DisplaySource::Path(path) if is_same_origin_path(&path) => {
            Ok(ImageReply::Redirect(Redirect::to(path)))
        }
        DisplaySource::Path(path) => Err(ApiError::BadRequest(format!(
            "Refusing to redirect to non-local path: {}",
            path
        ))),
        DisplaySource::Fallback(path) => Ok(ImageReply::Redirect(Redirect::to(path))),
    }
}

// Absolute path on this host; `//host` and `/\host` are taken as another origin
fn is_same_origin_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains('\\')
}

#[post("/images/preload", format = "json", data = "<request>")]
pub async fn preload_images(
    request: Json<PreloadRequest>,
    preloader: &State<ImagePreloader>,
) -> Json<PreloadSummary> {
    let summary = preloader.preload_images(&request.sources).await;
    log::info!(
        "Preloaded {} of {} requested images ({} already cached, {} failed)",
        summary.fetched,
        summary.requested,
        summary.already_cached,
        summary.failed
    );
    Json(summary)
}

#[get("/cache/stats")]
pub async fn cache_stats(services: &State<ImageServices>) -> Json<CacheStatsResponse> {
    Json(CacheStatsResponse {
        stats: services.cache.get_cache_stats().await,
        counters: services.cache.counters(),
    })
}

#[delete("/cache")]
pub async fn clear_cache(services: &State<ImageServices>) -> Status {
    services.cache.clear_cache().await;
    Status::NoContent
}
