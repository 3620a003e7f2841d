use serde::{Deserialize, Serialize};

/// An image reference as views hand it over: either a plain URL/path or a
/// bundled asset object carrying its `src`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    Url(String),
    Static(StaticImage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticImage {
    pub src: String,
}

impl ImageSource {
    pub fn as_str(&self) -> &str {
        match self {
            ImageSource::Url(url) => url,
            ImageSource::Static(image) => &image.src,
        }
    }
}

impl From<&str> for ImageSource {
    fn from(url: &str) -> Self {
        ImageSource::Url(url.to_string())
    }
}

impl From<String> for ImageSource {
    fn from(url: String) -> Self {
        ImageSource::Url(url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Missing,
    Bundled(String),
    Network(String),
    Local(String),
}

pub fn resolve_source(source: Option<&ImageSource>, static_prefix: &str) -> ResolvedSource {
    let raw = match source.map(ImageSource::as_str) {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return ResolvedSource::Missing,
    };

    if !static_prefix.is_empty() && raw.starts_with(static_prefix) {
        ResolvedSource::Bundled(raw.to_string())
    } else if raw.starts_with("http") {
        ResolvedSource::Network(raw.to_string())
    } else {
        ResolvedSource::Local(raw.to_string())
    }
}
