//! Image attachment workflow.
//!
//! A submission is strictly sequential: create the record, then read the
//! picked image, upload it under the record's id, resolve its URL and patch
//! the record. A record whose image half fails stays `Pending` and a retry
//! task is queued in the outbox.
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool, SqliteDocumentStore};
use crate::error::{Error, Result};
use crate::locations::LocationRepository;
use crate::model::{AttachmentState, ImageSource, LocationDraft, ResourceKind, StoryDraft};
use crate::storage::{self, content_type_for, ObjectStorage};
use crate::store::DocumentStore;
use crate::stories::StoryRepository;

/// Outcome of a form submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub id: String,
    /// `None` when no image was supplied.
    pub attachment: Option<AttachmentState>,
    /// Non-blocking notice for the user when the image could not be attached yet.
    pub warning: Option<String>,
}

#[derive(Clone)]
pub struct AttachmentPipeline {
    locations: LocationRepository,
    stories: StoryRepository,
    storage: Arc<dyn ObjectStorage>,
    pool: Pool,
}

impl AttachmentPipeline {
    pub fn new(
        locations: LocationRepository,
        stories: StoryRepository,
        storage: Arc<dyn ObjectStorage>,
        pool: Pool,
    ) -> Self {
        Self {
            locations,
            stories,
            storage,
            pool,
        }
    }

    /// Open the database, run migrations and wire repositories and storage from `cfg`.
    pub async fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        cfg.ensure_dirs()?;
        let pool = db::init_pool(&cfg.database_url()).await?;
        db::run_migrations(&pool).await?;
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(pool.clone()));
        let storage: Arc<dyn ObjectStorage> = Arc::from(storage::from_config(cfg)?);
        Ok(Self::new(
            LocationRepository::new(store.clone(), cfg.locations.key),
            StoryRepository::new(store),
            storage,
            pool,
        ))
    }

    pub fn locations(&self) -> &LocationRepository {
        &self.locations
    }

    pub fn stories(&self) -> &StoryRepository {
        &self.stories
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    #[instrument(skip_all)]
    pub async fn submit_location(
        &self,
        draft: &LocationDraft,
        image: Option<&ImageSource>,
    ) -> Result<Submission> {
        let id = self.locations.create(draft).await?;
        Ok(self.finish(ResourceKind::Location, id, image).await)
    }

    #[instrument(skip_all)]
    pub async fn submit_story(
        &self,
        draft: &StoryDraft,
        image: Option<&ImageSource>,
    ) -> Result<Submission> {
        let id = self.stories.create(draft).await?;
        Ok(self.finish(ResourceKind::Story, id, image).await)
    }

    /// Upload `image` for an existing record and patch the record with its URL.
    #[instrument(skip_all, fields(kind = ?kind, id = %id))]
    pub async fn attach(&self, kind: ResourceKind, id: &str, image: &Path) -> Result<String> {
        let bytes = fs::read(image).await.map_err(|err| {
            Error::UploadFailure(
                anyhow::Error::new(err).context(format!("failed to read {}", image.display())),
            )
        })?;
        self.storage
            .upload(kind, id, bytes, content_type_for(image))
            .await
            .map_err(Error::UploadFailure)?;
        let url = self
            .storage
            .download_url(kind, id)
            .await
            .map_err(Error::UploadFailure)?;
        info!(url = %url, "image available");
        match kind {
            ResourceKind::Location => self.locations.attach_image(id, &url).await?,
            ResourceKind::Story => self.stories.attach_image(id, &url).await?,
        }
        Ok(url)
    }

    async fn finish(
        &self,
        kind: ResourceKind,
        id: String,
        image: Option<&ImageSource>,
    ) -> Submission {
        let Some(image) = image else {
            return Submission {
                id,
                attachment: None,
                warning: None,
            };
        };

        match self.attach(kind, &id, &image.path).await {
            Ok(url) => Submission {
                id,
                attachment: Some(AttachmentState::Attached { url }),
                warning: None,
            },
            Err(err) => {
                let reason = err.to_string();
                warn!(%id, error = %reason, "image attachment failed; queueing retry");
                let path = fs::canonicalize(&image.path)
                    .await
                    .unwrap_or_else(|_| image.path.clone());
                let warning = match db::enqueue_outbox(
                    &self.pool,
                    kind.into(),
                    &id,
                    &path.to_string_lossy(),
                    Some(&reason),
                    Utc::now(),
                )
                .await
                {
                    Ok(task_id) => {
                        info!(task_id, %id, "attachment retry queued");
                        format!("{}; the image will be retried in the background", reason)
                    }
                    Err(queue_err) => {
                        warn!(?queue_err, %id, "failed to queue attachment retry");
                        format!("{}; retry could not be queued: {:#}", reason, queue_err)
                    }
                };
                Submission {
                    id,
                    attachment: Some(AttachmentState::Pending),
                    warning: Some(warning),
                }
            }
        }
    }
}
