//! Error handling module for the wardrobe sync core.
//!
//! Provides the error taxonomy shared by the local store, the remote gateway,
//! the record stores and the image loader. None of these errors is fatal: each
//! one degrades a single operation and is captured into store state or image
//! state.

use std::time::Duration;

use thiserror::Error;

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const AUTHENTICATION_REQUIRED: &str = "AUTHENTICATION_REQUIRED";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const REMOTE_ERROR: &str = "REMOTE_ERROR";
    pub const DECODE_ERROR: &str = "DECODE_ERROR";
    pub const INVALID_ENDPOINT: &str = "INVALID_ENDPOINT";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CACHE_UNAVAILABLE: &str = "CACHE_UNAVAILABLE";
    pub const CACHE_CORRUPT: &str = "CACHE_CORRUPT";
    pub const IMAGE_FETCH_FAILED: &str = "IMAGE_FETCH_FAILED";
}

/// Failure of the local persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Storage engine could not be opened or refused the operation
    /// (quota exceeded, locked, missing directory).
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    /// A stored payload could not be encoded or decoded.
    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl CacheError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CacheError::Unavailable(_) => codes::CACHE_UNAVAILABLE,
            CacheError::Corrupt(_) => codes::CACHE_CORRUPT,
        }
    }
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Cache engine error: {:?}", err);
        CacheError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Cache payload error: {:?}", err);
        CacheError::Corrupt(err.to_string())
    }
}

/// Failure reported by the remote data gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport-level failure (DNS, connection reset, offline).
    #[error("network error: {0}")]
    Network(String),
    /// The identity token was rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The addressed record does not exist remotely.
    #[error("not found: {0}")]
    NotFound(String),
    /// Any other non-success response.
    #[error("remote responded with status {status}: {message}")]
    Status { status: u16, message: String },
    /// The response body did not match the expected shape.
    #[error("invalid remote response: {0}")]
    Decode(String),
    /// The configured endpoint cannot address the store.
    #[error("invalid remote endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RemoteError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RemoteError::Network(_) => codes::NETWORK_ERROR,
            RemoteError::Unauthorized(_) => codes::UNAUTHORIZED,
            RemoteError::NotFound(_) => codes::NOT_FOUND,
            RemoteError::Status { .. } => codes::REMOTE_ERROR,
            RemoteError::Decode(_) => codes::DECODE_ERROR,
            RemoteError::InvalidEndpoint(_) => codes::INVALID_ENDPOINT,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network(_) => true,
            RemoteError::Status { status, .. } => *status >= 500 || *status == 429,
            RemoteError::Unauthorized(_)
            | RemoteError::NotFound(_)
            | RemoteError::Decode(_)
            | RemoteError::InvalidEndpoint(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return RemoteError::Decode(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                RemoteError::Unauthorized(err.to_string())
            }
            Some(status) => RemoteError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => RemoteError::Network(err.to_string()),
        }
    }
}

/// Failure fetching image bytes. Never leaves the image it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("image request failed: {0}")]
    Network(String),
    #[error("image request returned status {0}")]
    Status(u16),
    #[error("image request timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    pub fn error_code(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => codes::TIMEOUT,
            FetchError::Network(_) | FetchError::Status(_) => codes::IMAGE_FETCH_FAILED,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Network(err.to_string()),
        }
    }
}

/// Error surfaced by the synchronizing record stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A mutation was attempted while signed out.
    #[error("authentication required")]
    AuthenticationRequired,
    /// The draft was rejected before reaching the remote.
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// The remote did not answer within the configured bound.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),
}

impl SyncError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::AuthenticationRequired => codes::AUTHENTICATION_REQUIRED,
            SyncError::Validation(_) => codes::VALIDATION_ERROR,
            SyncError::Remote(e) => e.error_code(),
            SyncError::Cache(e) => e.error_code(),
            SyncError::Timeout(_) => codes::TIMEOUT,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::AuthenticationRequired | SyncError::Validation(_) => false,
            SyncError::Remote(e) => e.is_retryable(),
            SyncError::Cache(_) | SyncError::Timeout(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_codes() {
        assert_eq!(
            SyncError::AuthenticationRequired.error_code(),
            codes::AUTHENTICATION_REQUIRED
        );
        assert_eq!(
            SyncError::from(RemoteError::Network("offline".into())).error_code(),
            codes::NETWORK_ERROR
        );
        assert_eq!(
            SyncError::from(CacheError::Unavailable("quota".into())).error_code(),
            codes::CACHE_UNAVAILABLE
        );
        assert_eq!(
            SyncError::Timeout(Duration::from_secs(1)).error_code(),
            codes::TIMEOUT
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!SyncError::AuthenticationRequired.is_retryable());
        assert!(SyncError::from(RemoteError::Network("reset".into())).is_retryable());
        assert!(SyncError::from(RemoteError::Status {
            status: 503,
            message: "unavailable".into()
        })
        .is_retryable());
        assert!(!SyncError::from(RemoteError::Status {
            status: 400,
            message: "bad".into()
        })
        .is_retryable());
        assert!(!SyncError::from(RemoteError::Unauthorized("expired".into())).is_retryable());
    }

    #[test]
    fn test_remote_error_is_displayed_transparently() {
        let err = SyncError::from(RemoteError::Network("connection refused".into()));
        assert_eq!(err.to_string(), "network error: connection refused");
    }
}
