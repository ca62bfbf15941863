//! Remote data gateway: the authoritative cloud store, per record type.

mod http;

pub use http::*;

use async_trait::async_trait;

use crate::errors::RemoteError;
use crate::models::SyncRecord;

/// Result of a remote delete. A missing record counts as deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// CRUD access to one record type in the remote store.
///
/// Every call is scoped to the owning user. Implementations own transport,
/// retries and authentication headers.
#[async_trait]
pub trait RemoteGateway<T: SyncRecord>: Send + Sync {
    /// Every record the user owns.
    async fn fetch_all(&self, user_id: &str) -> Result<Vec<T>, RemoteError>;

    /// Store a new record. The returned record is authoritative (it may carry
    /// a server-assigned id or finalized image URLs).
    async fn create(&self, user_id: &str, draft: &T::Draft) -> Result<T, RemoteError>;

    /// Overwrite an existing record, returning the stored version.
    async fn update(&self, user_id: &str, record: &T) -> Result<T, RemoteError>;

    async fn remove(&self, user_id: &str, id: &str) -> Result<RemoveOutcome, RemoteError>;
}
