use crate::attach::AttachmentPipeline;
use crate::config::Config;
use crate::db;
use crate::error::Error;
use anyhow::Result;
use std::path::Path;
use tracing::{error, info, instrument, warn};

/// Retry limits for queued attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_backoff_secs: i64,
    pub max_attempts: i32,
}

impl RetryPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            max_backoff_secs: i64::try_from(cfg.app.max_backoff_seconds).unwrap_or(i64::MAX),
            max_attempts: i32::try_from(cfg.app.max_attempts).unwrap_or(i32::MAX),
        }
    }
}

/// Run the oldest due attachment task. Returns `false` when nothing was due.
#[instrument(skip_all)]
pub async fn process_next_task(pipeline: &AttachmentPipeline, policy: &RetryPolicy) -> Result<bool> {
    let pool = pipeline.pool();
    let Some(task) = db::next_due_outbox(pool).await? else {
        return Ok(false);
    };
    let kind = task.kind.as_str();
    let res = pipeline
        .attach(task.kind.resource(), &task.ref_id, Path::new(&task.image_path))
        .await;
    match res {
        Ok(url) => {
            db::delete_outbox(pool, task.id).await?;
            info!(id = task.id, kind, ref_id = %task.ref_id, url = %url, "outbox task succeeded");
        }
        Err(err @ Error::NotFound { .. }) => {
            error!(id = task.id, kind, ref_id = %task.ref_id, %err, "record gone; abandoning task");
            db::abandon_outbox(pool, task.id, task.attempt, &err.to_string()).await?;
        }
        Err(err) if task.attempt + 1 >= policy.max_attempts => {
            error!(
                id = task.id,
                kind,
                ref_id = %task.ref_id,
                attempt = task.attempt,
                %err,
                "outbox task exhausted its attempts; record stays pending"
            );
            db::abandon_outbox(pool, task.id, task.attempt, &err.to_string()).await?;
        }
        Err(err) => {
            warn!(
                id = task.id,
                kind,
                ref_id = %task.ref_id,
                attempt = task.attempt,
                %err,
                "outbox task failed; backoff"
            );
            db::backoff_outbox_with_cap(
                pool,
                task.id,
                task.attempt,
                policy.max_backoff_secs,
                &err.to_string(),
            )
            .await?;
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn example_cfg() -> Config {
        serde_yaml::from_str(config::example()).unwrap()
    }

    #[test]
    fn policy_follows_config() {
        let policy = RetryPolicy::from_config(&example_cfg());
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.max_backoff_secs, 60);
    }

    #[test]
    fn oversized_limits_saturate() {
        let mut cfg = example_cfg();
        cfg.app.max_attempts = u32::MAX;
        cfg.app.max_backoff_seconds = u64::MAX;
        let policy = RetryPolicy::from_config(&cfg);
        assert_eq!(policy.max_attempts, i32::MAX);
        assert_eq!(policy.max_backoff_secs, i64::MAX);
    }
}
