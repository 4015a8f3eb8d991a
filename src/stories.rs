//! Story repository: stories live in their own collection and point at a
//! location through its denormalised title. The reference is not checked.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{Checker, Error, Result, ValidationError};
use crate::model::{Story, StoryDraft, StoryId, STORIES};
use crate::store::{to_fields, Document, DocumentStore, Fields};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStory {
    pub user_id: String,
    pub title: String,
    pub text: String,
    pub location: String,
}

impl StoryDraft {
    pub fn validate(&self) -> Result<NewStory, ValidationError> {
        Checker::default()
            .require_text("user_id", &self.user_id)
            .require_text("title", &self.title)
            .require_text("text", &self.text)
            .require_text("location", &self.location)
            .finish()?;
        Ok(NewStory {
            user_id: self.user_id.clone(),
            title: self.title.trim().to_string(),
            text: self.text.clone(),
            // Kept verbatim: lookups match it exactly.
            location: self.location.clone(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoryDoc {
    #[serde(rename = "userID")]
    user_id: String,
    title: String,
    story: String,
    location: String,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    photo_url: Option<String>,
}

fn from_document(doc: Document) -> Result<Story> {
    let parsed: StoryDoc = serde_json::from_value(serde_json::Value::Object(doc.fields))
        .map_err(|source| Error::Decode {
            collection: STORIES,
            id: doc.id.clone(),
            source,
        })?;
    Ok(Story {
        id: doc.id,
        user_id: parsed.user_id,
        title: parsed.title,
        text: parsed.story,
        location: parsed.location,
        image: parsed.photo_url,
        created_at: doc.created_at,
    })
}

/// Decode a listing, skipping documents other writers left in a shape we cannot read.
fn decode_all(docs: Vec<Document>) -> Vec<Story> {
    docs.into_iter()
        .filter_map(|doc| {
            let id = doc.id.clone();
            match from_document(doc) {
                Ok(item) => Some(item),
                Err(err) => {
                    warn!(collection = STORIES, id = %id, error = %err, "skipping malformed document");
                    None
                }
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct StoryRepository {
    store: Arc<dyn DocumentStore>,
}

impl StoryRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Stories whose location equals `location` exactly (case-sensitive).
    #[instrument(skip_all, fields(location = %location))]
    pub async fn list_by_location(&self, location: &str) -> Result<Vec<Story>> {
        let docs = self
            .store
            .find_eq(STORIES, "location", location)
            .await
            .map_err(|err| {
                warn!(?err, "error getting stories");
                Error::BackendUnavailable(err)
            })?;
        Ok(decode_all(docs))
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn get(&self, id: &str) -> Result<Story> {
        match self.store.get(STORIES, id).await {
            Ok(Some(doc)) => from_document(doc),
            Ok(None) => Err(Error::NotFound {
                collection: STORIES,
                id: id.to_string(),
            }),
            Err(err) => Err(Error::BackendUnavailable(err)),
        }
    }

    #[instrument(skip_all)]
    pub async fn create(&self, draft: &StoryDraft) -> Result<StoryId> {
        let new = draft.validate()?;
        let doc = StoryDoc {
            user_id: new.user_id,
            title: new.title,
            story: new.text,
            location: new.location,
            photo_url: None,
        };
        let fields = to_fields(&doc).map_err(Error::BackendUnavailable)?;
        let id = self.store.add(STORIES, fields).await.map_err(|err| {
            warn!(?err, "failed to create story");
            Error::BackendUnavailable(err)
        })?;
        info!(id = %id, location = %doc.location, "story created");
        Ok(id)
    }

    #[instrument(skip_all, fields(id = %id))]
    pub async fn attach_image(&self, id: &str, url: &str) -> Result<()> {
        let mut fields = Fields::new();
        fields.insert("photoURL".into(), url.into());
        let updated = self
            .store
            .update(STORIES, id, fields)
            .await
            .map_err(Error::BackendUnavailable)?;
        if !updated {
            return Err(Error::NotFound {
                collection: STORIES,
                id: id.to_string(),
            });
        }
        info!("story image attached");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_title_and_text_rejected() {
        let draft = StoryDraft {
            user_id: "u1".into(),
            title: " ".into(),
            text: String::new(),
            location: "Paris".into(),
        };
        let err = draft.validate().unwrap_err();
        assert_eq!(err.fields, vec!["title", "text"]);
    }

    #[test]
    fn listing_skips_malformed_documents() {
        let good = to_fields(&StoryDoc {
            user_id: "u1".into(),
            title: "t".into(),
            story: "body".into(),
            location: "Paris".into(),
            photo_url: None,
        })
        .unwrap();
        let mut legacy = Fields::new();
        legacy.insert("location".into(), "Paris".into());

        let stories = decode_all(vec![
            Document {
                id: "s1".into(),
                fields: good,
                created_at: chrono::Utc::now(),
            },
            Document {
                id: "s2".into(),
                fields: legacy,
                created_at: chrono::Utc::now(),
            },
        ]);
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].id, "s1");
    }

    #[test]
    fn document_uses_wire_field_names() {
        let doc = StoryDoc {
            user_id: "u1".into(),
            title: "t".into(),
            story: "body".into(),
            location: "Paris".into(),
            photo_url: None,
        };
        let fields = to_fields(&doc).unwrap();
        assert_eq!(
            serde_json::Value::Object(fields),
            json!({"userID": "u1", "title": "t", "story": "body", "location": "Paris"})
        );
    }
}
