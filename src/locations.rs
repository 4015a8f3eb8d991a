//! Location repository: typed access to the `locations` collection.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::KeyPolicy;
use crate::error::{Checker, Error, Result, ValidationError};
use crate::model::{Category, Coordinate, Location, LocationDraft, LocationId, LOCATIONS};
use crate::store::{to_fields, Document, DocumentStore, Fields};

/// A draft that passed validation; the only input `create` accepts for writing.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLocation {
    pub title: String,
    pub category: Category,
    pub description: String,
    pub coordinate: Coordinate,
}

impl LocationDraft {
    pub fn validate(&self) -> Result<NewLocation, ValidationError> {
        let coordinate = self.coordinate.filter(Coordinate::is_valid);
        let mut check = Checker::default();
        check
            .require_text("title", &self.title)
            .require("category", self.category.is_some())
            .require_text("description", &self.description)
            .require("coordinate", coordinate.is_some());
        match (check.finish(), self.category, coordinate) {
            (Ok(()), Some(category), Some(coordinate)) => Ok(NewLocation {
                title: self.title.trim().to_string(),
                category,
                description: self.description.trim().to_string(),
                coordinate,
            }),
            (result, _, _) => Err(result.err().unwrap_or_default()),
        }
    }
}

/// Stored document shape.
#[derive(Debug, Serialize, Deserialize)]
struct LocationDoc {
    category: Category,
    #[serde(default)]
    title: String,
    description: String,
    latitude: f64,
    longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
}

fn from_document(doc: Document) -> Result<Location> {
    let parsed: LocationDoc = serde_json::from_value(serde_json::Value::Object(doc.fields))
        .map_err(|source| Error::Decode {
            collection: LOCATIONS,
            id: doc.id.clone(),
            source,
        })?;
    // Title-keyed records may carry the title only as their key.
    let title = if parsed.title.is_empty() {
        doc.id.clone()
    } else {
        parsed.title
    };
    Ok(Location {
        id: doc.id,
        category: parsed.category,
        title,
        description: parsed.description,
        latitude: parsed.latitude,
        longitude: parsed.longitude,
        image: parsed.image,
        created_at: doc.created_at,
    })
}

/// Decode a listing, skipping documents other writers left in a shape we cannot read.
fn decode_all(docs: Vec<Document>) -> Vec<Location> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.id.clone();
            match from_document(doc) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(collection = LOCATIONS, id = %id, error = %err, "skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct LocationRepository {
    store: Arc<dyn DocumentStore>,
    key_policy: KeyPolicy,
}

impl LocationRepository {
    pub fn new(store: Arc<dyn DocumentStore>, key_policy: KeyPolicy) -> Self {
        Self { store, key_policy }
    }

    #[instrument(skip_all)]
    pub async fn list_all(&self) -> Result<Vec<Location>> {
        let docs = self.store.list(LOCATIONS).await.map_err(|err| {
            warn!(?err, "error getting locations");
            Error::BackendUnavailable(err)
        })?;
        Ok(decode_all(docs))
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn get(&self, id: &str) -> Result<Location> {
        match self.store.get(LOCATIONS, id).await {
            Ok(Some(doc)) => from_document(doc),
            Ok(None) => Err(Error::NotFound {
                collection: LOCATIONS,
                id: id.to_string(),
            }),
            Err(err) => Err(Error::BackendUnavailable(err)),
        }
    }

    /// Validate and write a new location. Nothing is written if validation fails.
    #[instrument(skip_all)]
    pub async fn create(&self, draft: &LocationDraft) -> Result<LocationId> {
        let new = draft.validate()?;
        let doc = LocationDoc {
            category: new.category,
            title: new.title.clone(),
            description: new.description,
            latitude: new.coordinate.latitude,
            longitude: new.coordinate.longitude,
            image: None,
        };
        let fields = to_fields(&doc).map_err(Error::BackendUnavailable)?;
        let id = match self.key_policy {
            KeyPolicy::Generated => self.store.add(LOCATIONS, fields).await,
            KeyPolicy::Title => self
                .store
                .set(LOCATIONS, &new.title, fields)
                .await
                .map(|_| new.title.clone()),
        }
        .map_err(|err| {
            warn!(?err, "failed to create location");
            Error::BackendUnavailable(err)
        })?;
        info!(id = %id, title = %new.title, "location created");
        Ok(id)
    }

    /// Set the image URL. Repeating the call overwrites the previous URL.
    #[instrument(skip_all, fields(id = %id))]
    pub async fn attach_image(&self, id: &str, url: &str) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert("image".into(), url.into());
        let updated = self
            .store
            .update(LOCATIONS, id, fields)
            .await
            .map_err(Error::BackendUnavailable)?;
        if !updated {
            return Err(Error::NotFound {
                collection: LOCATIONS,
                id: id.to_string(),
            });
        }
        info!("location image attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> LocationDraft {
        LocationDraft {
            title: "Tower".into(),
            category: Some(Category::Attractions),
            description: "x".into(),
            coordinate: Some(Coordinate::new(1.0, 1.0)),
        }
    }

    #[test]
    fn complete_draft_validates() {
        let new = draft().validate().unwrap();
        assert_eq!(new.title, "Tower");
        assert_eq!(new.category, Category::Attractions);
    }

    #[test]
    fn every_missing_field_is_reported() {
        let err = LocationDraft::default().validate().unwrap_err();
        assert_eq!(
            err.fields,
            vec!["title", "category", "description", "coordinate"]
        );

        let mut d = draft();
        d.coordinate = Some(Coordinate::new(91.0, 0.0));
        assert!(d.validate().unwrap_err().contains("coordinate"));
    }

    #[test]
    fn title_falls_back_to_document_key() {
        let mut fields = Fields::new();
        fields.insert("category".into(), "Shopping".into());
        fields.insert("description".into(), "mall".into());
        fields.insert("latitude".into(), 1.5.into());
        fields.insert("longitude".into(), 2.5.into());
        let loc = from_document(Document {
            id: "Mall".into(),
            fields,
            created_at: chrono::Utc::now(),
        })
        .unwrap();
        assert_eq!(loc.title, "Mall");
        assert_eq!(loc.category, Category::Shopping);
        assert!(loc.image.is_none());
    }

    #[test]
    fn listing_skips_malformed_documents() {
        let mut good = Fields::new();
        good.insert("title".into(), "Tower".into());
        good.insert("category".into(), "Attractions".into());
        good.insert("description".into(), "x".into());
        good.insert("latitude".into(), 1.0.into());
        good.insert("longitude".into(), 2.0.into());
        let mut legacy = Fields::new();
        legacy.insert("title".into(), "Old pin".into());

        let docs = vec![
            Document {
                id: "legacy".into(),
                fields: legacy,
                created_at: chrono::Utc::now(),
            },
            Document {
                id: "tower".into(),
                fields: good,
                created_at: chrono::Utc::now(),
            },
        ];
        let locations = decode_all(docs);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].id, "tower");
    }

    #[test]
    fn malformed_document_is_a_decode_error() {
        let err = from_document(Document {
            id: "bad".into(),
            fields: Fields::new(),
            created_at: chrono::Utc::now(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::Decode { id, .. } if id == "bad"));
    }
}
