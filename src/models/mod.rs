//! Data models for the wardrobe journal.
//!
//! Field names serialize in camelCase to match the documents held by the
//! remote store, so cached payloads and remote payloads share one shape.

mod collection;
mod image;
mod outfit;

pub use collection::*;
pub use image::*;
pub use outfit::*;

use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The two synchronized record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Outfits,
    Collections,
}

impl RecordKind {
    /// Local table holding this record type.
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Outfits => "outfits",
            RecordKind::Collections => "collections",
        }
    }

    /// Path segment used by the remote store.
    pub fn path_segment(&self) -> &'static str {
        match self {
            RecordKind::Outfits => "outfits",
            RecordKind::Collections => "collections",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// A user-owned record kept in sync between the remote store, the local
/// cache and in-memory state.
pub trait SyncRecord:
    Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Shape sent to the remote on create; the remote answers with `Self`.
    type Draft: Serialize + Debug + Send + Sync + 'static;

    const KIND: RecordKind;

    fn id(&self) -> &str;

    /// Reject drafts that can never be saved.
    fn validate_draft(_draft: &Self::Draft) -> Result<(), String> {
        Ok(())
    }

    /// Remote image URLs backing this record.
    fn image_urls(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// Deduplicate tags in place, keeping first occurrence order and dropping blanks.
pub(crate) fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}
