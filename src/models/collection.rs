//! Collection model: a named group of outfits.
//!
//! Membership lives on the outfit side (`Outfit::collection_ids`); a
//! collection never lists its members.

use serde::{Deserialize, Serialize};

use super::{RecordKind, SyncRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SyncRecord for Collection {
    type Draft = NewCollection;

    const KIND: RecordKind = RecordKind::Collections;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate_draft(draft: &NewCollection) -> Result<(), String> {
        if draft.name.trim().is_empty() {
            return Err("Collection name is required".to_string());
        }
        Ok(())
    }
}

/// Request body for creating a collection. The remote assigns the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCollection {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_name_is_rejected() {
        assert!(Collection::validate_draft(&NewCollection::new("   ")).is_err());
        assert!(Collection::validate_draft(&NewCollection::new("Work week")).is_ok());
    }

    #[test]
    fn test_blank_description_is_dropped() {
        let draft = NewCollection::new("Summer").with_description("  ");
        assert!(draft.description.is_none());
        let json = serde_json::to_value(&draft).unwrap();
        assert!(json.get("description").is_none());
    }
}
