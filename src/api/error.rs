use std::io::Cursor;
use std::sync::Arc;

use rocket::http::{ContentType, Status};
use serde_json::json;

use crate::images::FetchError;

#[derive(Debug)]
pub enum ApiError {
    ImageError(Arc<FetchError>),
    BadRequest(String),
}

impl From<Arc<FetchError>> for ApiError {
    fn from(error: Arc<FetchError>) -> Self {
        ApiError::ImageError(error)
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        ApiError::ImageError(Arc::new(error))
    }
}

impl ApiError {
    fn status_and_body(&self) -> (Status, serde_json::Value) {
        match self {
            ApiError::ImageError(error) => match error.as_ref() {
                FetchError::Status(code) => (
                    Status::BadGateway,
                    json!({
                        "error": "Upstream image error",
                        "message": format!("Image request failed with status: {}", code)
                    }),
                ),
                FetchError::Network(e) => (
                    Status::ServiceUnavailable,
                    json!({
                        "error": "Image network error",
                        "message": e.to_string()
                    }),
                ),
                FetchError::Cancelled => (
                    Status::ServiceUnavailable,
                    json!({
                        "error": "Image request cancelled",
                        "message": "The image request was cancelled before it completed"
                    }),
                ),
                FetchError::Client(message) => (
                    Status::InternalServerError,
                    json!({
                        "error": "Image client error",
                        "message": message
                    }),
                ),
            },
            ApiError::BadRequest(message) => (
                Status::BadRequest,
                json!({
                    "error": "Bad request",
                    "message": message
                }),
            ),
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let (status, body) = self.status_and_body();
        let body = body.to_string();

        rocket::Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}
