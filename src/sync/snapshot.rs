//! Observable state published by a record store.

use std::collections::BTreeMap;

use crate::errors::SyncError;

/// Lifecycle of a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
    /// Signed out; nothing is shown.
    Cleared,
}

/// Everything a UI container needs to render one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSnapshot<T> {
    pub phase: Phase,
    /// User the records belong to.
    pub user_id: Option<String>,
    pub records: BTreeMap<String, T>,
    pub loading: bool,
    /// Last remote or mutation failure. Does not block further operations.
    pub error: Option<SyncError>,
    /// False once the local cache has failed; the store then runs remote-only.
    pub cache_available: bool,
    /// Bumped on every change to `records`.
    pub revision: u64,
}

impl<T> Default for StoreSnapshot<T> {
    fn default() -> Self {
        Self {
            phase: Phase::Uninitialized,
            user_id: None,
            records: BTreeMap::new(),
            loading: false,
            error: None,
            cache_available: true,
            revision: 0,
        }
    }
}

impl<T> StoreSnapshot<T> {
    pub fn ids(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }
}

/// How a `load` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Remote snapshot committed to state and cache.
    Refreshed { records: usize },
    /// Remote failed; cached or previous state stays on screen.
    Degraded(SyncError),
    /// A newer load or a sign-out replaced this one; its result was dropped.
    Superseded,
    SignedOut,
}
