mod error;
pub mod images;

pub use error::ApiError;

use rocket::Route;

pub fn routes() -> Vec<Route> {
    routes![
        images::get_image,
        images::preload_images,
        images::cache_stats,
        images::clear_cache,
    ]
}
