//! Calendar and collection views over the outfit store.

use std::collections::{BTreeMap, BTreeSet};

use super::RecordStore;
use crate::models::Outfit;

impl RecordStore<Outfit> {
    /// Outfits logged on one calendar day.
    pub fn outfits_on(&self, date_id: &str) -> Vec<Outfit> {
        self.state
            .borrow()
            .records
            .values()
            .filter(|outfit| outfit.date_id() == date_id)
            .cloned()
            .collect()
    }

    /// Days with at least one outfit, ascending.
    pub fn logged_days(&self) -> Vec<String> {
        self.state
            .borrow()
            .records
            .values()
            .map(|outfit| outfit.date_id().to_string())
            .filter(|day| !day.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn outfits_in_collection(&self, collection_id: &str) -> Vec<Outfit> {
        self.state
            .borrow()
            .records
            .values()
            .filter(|outfit| outfit.in_collection(collection_id))
            .cloned()
            .collect()
    }

    /// Memberships pointing at collections that no longer exist, keyed by
    /// outfit id.
    pub fn dangling_memberships(&self, known: &[&str]) -> BTreeMap<String, Vec<String>> {
        self.state
            .borrow()
            .records
            .values()
            .filter_map(|outfit| {
                let missing: Vec<String> = outfit
                    .collection_ids
                    .iter()
                    .filter(|id| !known.contains(&id.as_str()))
                    .cloned()
                    .collect();
                (!missing.is_empty()).then(|| (outfit.id.clone(), missing))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    use super::*;
    use crate::db::LocalStore;
    use crate::errors::RemoteError;
    use crate::models::{local_date_id, NewOutfit, SyncRecord};
    use crate::remote::{RemoteGateway, RemoveOutcome};

    struct Offline;

    #[async_trait]
    impl RemoteGateway<Outfit> for Offline {
        async fn fetch_all(&self, _user_id: &str) -> Result<Vec<Outfit>, RemoteError> {
            Err(RemoteError::Network("offline".into()))
        }

        async fn create(&self, _user_id: &str, _draft: &NewOutfit) -> Result<Outfit, RemoteError> {
            Err(RemoteError::Network("offline".into()))
        }

        async fn update(&self, _user_id: &str, _record: &Outfit) -> Result<Outfit, RemoteError> {
            Err(RemoteError::Network("offline".into()))
        }

        async fn remove(&self, _user_id: &str, _id: &str) -> Result<RemoveOutcome, RemoteError> {
            Err(RemoteError::Network("offline".into()))
        }
    }

    fn outfit(at: &str, collections: &[&str]) -> Outfit {
        let date: DateTime<Utc> = at.parse().unwrap();
        let mut draft = NewOutfit::new(date).with_image("https://img/a.jpg");
        for id in collections {
            draft = draft.in_collection(*id);
        }
        Outfit::from(draft)
    }

    fn store_with(outfits: Vec<Outfit>) -> (TempDir, RecordStore<Outfit>) {
        let temp_dir = TempDir::new().unwrap();
        let cache = LocalStore::new(temp_dir.path().join("cache.sqlite"));
        let store = RecordStore::<Outfit>::new(cache, Arc::new(Offline));
        store.state.send_modify(|state| {
            for outfit in outfits {
                state.records.insert(outfit.id().to_string(), outfit);
            }
        });
        (temp_dir, store)
    }

    #[test]
    fn test_calendar_views() {
        let first = outfit("2024-05-01T12:00:00Z", &[]);
        let second = outfit("2024-05-01T12:30:00Z", &[]);
        let third = outfit("2024-05-03T12:00:00Z", &[]);
        let day = first.date_id().to_string();
        let (_dir, store) = store_with(vec![first, second, third.clone()]);

        assert_eq!(store.outfits_on(&day).len(), 2);
        assert!(store.outfits_on("1999-01-01").is_empty());

        let days = store.logged_days();
        assert_eq!(days.len(), 2);
        assert_eq!(days[1], local_date_id(third.date().unwrap()));
    }

    #[test]
    fn test_collection_views() {
        let work = outfit("2024-05-01T12:00:00Z", &["work"]);
        let mixed = outfit("2024-05-02T12:00:00Z", &["work", "gone"]);
        let loose = outfit("2024-05-03T12:00:00Z", &[]);
        let (_dir, store) = store_with(vec![work, mixed.clone(), loose]);

        assert_eq!(store.outfits_in_collection("work").len(), 2);

        let dangling = store.dangling_memberships(&["work"]);
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[&mixed.id], vec!["gone".to_string()]);
    }
}
