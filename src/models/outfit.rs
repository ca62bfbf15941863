//! Outfit model: one logged look, bucketed by calendar day.

use std::fmt::Display;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::{dedup_tags, ImageRef, RecordKind, SyncRecord};

/// Calendar bucket (`YYYY-MM-DD`) for a capture time in the given zone.
pub fn date_id_in<Tz>(date: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    date.with_timezone(tz).format("%Y-%m-%d").to_string()
}

/// Calendar bucket for a capture time in the device's local zone.
pub fn local_date_id(date: &DateTime<Utc>) -> String {
    date_id_in(date, &Local)
}

/// A logged outfit as confirmed by the remote store.
///
/// `date_id` is only ever set together with `date`; callers change the day
/// through [`Outfit::set_date`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outfit {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<DateTime<Utc>>,
    #[serde(default)]
    date_id: String,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub tops: Vec<String>,
    #[serde(default)]
    pub bottoms: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection_ids: Vec<String>,
}

impl Outfit {
    pub fn date(&self) -> Option<&DateTime<Utc>> {
        self.date.as_ref()
    }

    pub fn date_id(&self) -> &str {
        &self.date_id
    }

    /// Move the outfit to a new capture time, re-deriving its calendar bucket.
    pub fn set_date(&mut self, date: DateTime<Utc>) {
        self.date_id = local_date_id(&date);
        self.date = Some(date);
    }

    pub fn in_collection(&self, collection_id: &str) -> bool {
        self.collection_ids.iter().any(|c| c == collection_id)
    }
}

impl From<NewOutfit> for Outfit {
    fn from(draft: NewOutfit) -> Self {
        Self {
            id: draft.id,
            date: Some(draft.date),
            date_id: draft.date_id,
            images: draft.images,
            tops: draft.tops,
            bottoms: draft.bottoms,
            tags: draft.tags,
            collection_ids: draft.collection_ids,
        }
    }
}

impl SyncRecord for Outfit {
    type Draft = NewOutfit;

    const KIND: RecordKind = RecordKind::Outfits;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate_draft(draft: &NewOutfit) -> Result<(), String> {
        if draft.images.is_empty() {
            return Err("An outfit needs at least one image".to_string());
        }
        if draft.id.trim().is_empty() {
            return Err("Outfit id is required".to_string());
        }
        Ok(())
    }

    fn image_urls(&self) -> Vec<&str> {
        self.images.iter().filter_map(ImageRef::url).collect()
    }
}

/// An outfit captured on the device and not yet saved.
///
/// The id is minted here and becomes the remote document key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOutfit {
    pub id: String,
    date: DateTime<Utc>,
    date_id: String,
    pub images: Vec<ImageRef>,
    pub tops: Vec<String>,
    pub bottoms: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub collection_ids: Vec<String>,
}

impl NewOutfit {
    pub fn new(date: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            date_id: local_date_id(&date),
            date,
            images: Vec::new(),
            tops: Vec::new(),
            bottoms: Vec::new(),
            tags: Vec::new(),
            collection_ids: Vec::new(),
        }
    }

    pub fn date(&self) -> &DateTime<Utc> {
        &self.date
    }

    pub fn date_id(&self) -> &str {
        &self.date_id
    }

    pub fn with_image(mut self, image: impl Into<ImageRef>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn with_tops<I, S>(mut self, tops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tops = dedup_tags(tops.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_bottoms<I, S>(mut self, bottoms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bottoms = dedup_tags(bottoms.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = dedup_tags(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn in_collection(mut self, collection_id: impl Into<String>) -> Self {
        let collection_id = collection_id.into();
        if !self.collection_ids.contains(&collection_id) {
            self.collection_ids.push(collection_id);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    #[test]
    fn test_date_id_truncates_in_zone() {
        let date: DateTime<Utc> = "2024-05-01T20:30:00Z".parse().unwrap();
        let hanoi = FixedOffset::east_opt(7 * 3600).unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();

        assert_eq!(date_id_in(&date, &hanoi), "2024-05-02");
        assert_eq!(date_id_in(&date, &utc), "2024-05-01");
    }

    #[test]
    fn test_new_outfit_derives_date_id_locally() {
        let date: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let draft = NewOutfit::new(date);
        assert_eq!(draft.date_id(), local_date_id(&date));
        assert!(!draft.id.is_empty());
        assert_ne!(draft.id, NewOutfit::new(date).id);
    }

    #[test]
    fn test_set_date_rederives_bucket() {
        let first: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let second: DateTime<Utc> = "2024-06-11T08:00:00Z".parse().unwrap();
        let mut outfit = Outfit::from(NewOutfit::new(first).with_image("https://img/1.jpg"));

        outfit.set_date(second);

        assert_eq!(outfit.date(), Some(&second));
        assert_eq!(outfit.date_id(), local_date_id(&second));
    }

    #[test]
    fn test_outfit_deserializes_sparse_remote_document() {
        let outfit: Outfit = serde_json::from_value(json!({
            "id": "2024-05-01",
            "dateId": "2024-05-01",
            "tops": ["Áo phông"],
            "bottoms": ["Quần jeans"],
            "tags": []
        }))
        .unwrap();

        assert_eq!(outfit.id, "2024-05-01");
        assert_eq!(outfit.date_id(), "2024-05-01");
        assert!(outfit.date().is_none());
        assert!(outfit.images.is_empty());
        assert!(outfit.collection_ids.is_empty());
        assert_eq!(outfit.tops, vec!["Áo phông"]);
    }

    #[test]
    fn test_images_serialize_as_urls_or_pending_bytes() {
        let date: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let draft = NewOutfit::new(date)
            .with_image("https://img/a.jpg")
            .with_image(ImageRef::Pending(crate::models::PendingImage {
                content_type: "image/jpeg".to_string(),
                bytes: vec![1, 2, 3],
            }));

        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["images"][0], "https://img/a.jpg");
        assert_eq!(value["images"][1]["contentType"], "image/jpeg");

        let outfit = Outfit::from(draft);
        assert_eq!(outfit.image_urls(), vec!["https://img/a.jpg"]);
    }

    #[test]
    fn test_validate_draft_requires_image() {
        let date: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let draft = NewOutfit::new(date).with_tops(["shirt"]);
        assert!(Outfit::validate_draft(&draft).is_err());
        assert!(Outfit::validate_draft(&draft.with_image("https://img/a.jpg")).is_ok());
    }

    #[test]
    fn test_collection_membership_is_a_set() {
        let date: DateTime<Utc> = "2024-05-01T08:00:00Z".parse().unwrap();
        let outfit = Outfit::from(
            NewOutfit::new(date)
                .with_image("https://img/a.jpg")
                .in_collection("work")
                .in_collection("work"),
        );
        assert_eq!(outfit.collection_ids, vec!["work"]);
        assert!(outfit.in_collection("work"));
        assert!(!outfit.in_collection("beach"));
    }
}
