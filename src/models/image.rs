//! Image references carried by outfits, and cached image blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An image attached to an outfit.
///
/// Before upload an image is held as raw bytes; once the remote has stored it
/// the record carries the finalized URL instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Url(String),
    Pending(PendingImage),
}

impl ImageRef {
    pub fn url(&self) -> Option<&str> {
        match self {
            ImageRef::Url(url) => Some(url),
            ImageRef::Pending(_) => None,
        }
    }
}

impl From<&str> for ImageRef {
    fn from(url: &str) -> Self {
        ImageRef::Url(url.to_string())
    }
}

/// Image bytes captured on the device and not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A cached copy of remote image bytes, keyed by source URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub url: String,
    pub bytes: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}
