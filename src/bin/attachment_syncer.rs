use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use storymap::attach::AttachmentPipeline;
use storymap::config;
use storymap::db;
use storymap::model::OutboxState;
use storymap::outbox::{self, RetryPolicy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Retry all queued image attachments and exit when the queue is drained"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Exit as soon as only tasks waiting out a backoff remain
    #[arg(long)]
    skip_failed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let pipeline = AttachmentPipeline::from_config(&cfg).await?;
    let policy = RetryPolicy::from_config(&cfg);
    let pool = pipeline.pool().clone();

    let remaining = db::count_queued_outbox(&pool).await?;
    info!(remaining, ?policy, "starting attachment sync");
    if remaining == 0 {
        info!("no queued attachments, exiting");
        return Ok(());
    }

    let mut processed_count = 0;
    loop {
        match outbox::process_next_task(&pipeline, &policy).await {
            Ok(true) => {
                processed_count += 1;
                if processed_count % 10 == 0 {
                    let remaining = db::count_queued_outbox(&pool).await?;
                    info!(processed = processed_count, remaining, "sync progress");
                }
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                error!(?err, "error processing outbox task");
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }
        }

        // Nothing due right now.
        let queued = db::list_outbox(&pool, OutboxState::Queued).await?;
        if queued.is_empty() {
            break;
        }
        let next_due = queued.iter().map(|t| t.due_at).min();
        let max_attempt = queued.iter().map(|t| t.attempt).max().unwrap_or(0);
        warn!(
            remaining = queued.len(),
            max_attempt,
            next_due_at = ?next_due,
            "all queued attachments are waiting out a backoff"
        );
        if args.skip_failed {
            warn!("--skip-failed specified, exiting with attachments still queued");
            break;
        }
        tokio::time::sleep(Duration::from_millis(cfg.app.poll_interval_ms.max(1000))).await;
    }

    let abandoned = db::list_outbox(&pool, OutboxState::Abandoned).await?;
    for task in &abandoned {
        warn!(
            id = task.id,
            kind = task.kind.as_str(),
            ref_id = %task.ref_id,
            error = task.last_error.as_deref().unwrap_or("-"),
            "attachment abandoned; record stays pending"
        );
    }
    info!(
        processed = processed_count,
        abandoned = abandoned.len(),
        "attachment sync finished"
    );
    Ok(())
}
