use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use storymap::attach::{AttachmentPipeline, Submission};
use storymap::config;
use storymap::db;
use storymap::geo;
use storymap::model::{
    AttachmentState, Category, Coordinate, ImageSource, Location, LocationDraft, OutboxState,
    StoryDraft, Viewport,
};
use storymap::outbox::{self, RetryPolicy};
use storymap::tracker::PositionTracker;
use storymap::Error;

#[derive(Debug, Parser)]
#[command(author, version, about = "Discover places on a map and attach stories to them")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the example configuration to --config
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Browse and add locations
    #[command(subcommand)]
    Locations(LocationsCmd),
    /// Browse and add stories
    #[command(subcommand)]
    Stories(StoriesCmd),
    /// Read "lat,lng" position fixes from stdin and print what is visible around each
    Track(ViewportArgs),
    /// Retry queued image attachments until interrupted
    Worker,
    /// Show image attachments that are queued or were abandoned
    Pending,
}

#[derive(Debug, Subcommand)]
enum LocationsCmd {
    /// List locations; with --at, only those visible in that viewport
    List {
        /// Viewport center as LAT,LNG
        #[arg(long)]
        at: Option<Coordinate>,
        #[command(flatten)]
        viewport: ViewportArgs,
    },
    /// Show a single location
    Show { id: String },
    /// Add a location, optionally with a photo
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        category: Category,
        #[arg(long)]
        description: String,
        /// Position as LAT,LNG (defaults to the configured map center)
        #[arg(long)]
        at: Option<Coordinate>,
        #[arg(long)]
        image: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum StoriesCmd {
    /// List stories attached to a location
    List {
        #[arg(long)]
        location: String,
    },
    /// Add a story to a location, optionally with a photo
    Add {
        #[arg(long)]
        location: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        text: String,
        #[arg(long)]
        image: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ClapArgs)]
struct ViewportArgs {
    /// Latitude span of the viewport (defaults to the configured map)
    #[arg(long)]
    lat_delta: Option<f64>,
    /// Longitude span of the viewport (defaults to the configured map)
    #[arg(long)]
    lng_delta: Option<f64>,
}

impl ViewportArgs {
    fn resolve(&self, base: Viewport, center: Option<Coordinate>) -> Viewport {
        Viewport::new(
            center.unwrap_or_else(|| base.center()),
            self.lat_delta.unwrap_or(base.latitude_delta),
            self.lng_delta.unwrap_or(base.longitude_delta),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::InitConfig { force } = args.command {
        return init_config(&args.config, force);
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let pipeline = AttachmentPipeline::from_config(&cfg).await?;
    let map = cfg.map.viewport();

    let res = match args.command {
        Command::InitConfig { .. } => Ok(()),
        Command::Locations(cmd) => run_locations(&pipeline, map, cmd).await,
        Command::Stories(cmd) => run_stories(&pipeline, &cfg.user.id, cmd).await,
        Command::Track(viewport) => track(&pipeline, viewport.resolve(map, None)).await,
        Command::Worker => {
            worker(
                &pipeline,
                RetryPolicy::from_config(&cfg),
                Duration::from_millis(cfg.app.poll_interval_ms),
            )
            .await
        }
        Command::Pending => pending(&pipeline).await,
    };

    if let Err(err) = &res {
        if let Some(Error::Validation(validation)) = err.downcast_ref::<Error>() {
            eprintln!("Missing some field(s)! {}", validation);
            std::process::exit(2);
        }
    }
    res
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }
    std::fs::write(path, config::example())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn run_locations(pipeline: &AttachmentPipeline, map: Viewport, cmd: LocationsCmd) -> Result<()> {
    match cmd {
        LocationsCmd::List { at, viewport } => {
            let all = pipeline.locations().list_all().await?;
            if at.is_none() && viewport.lat_delta.is_none() && viewport.lng_delta.is_none() {
                print_locations(&all);
                return Ok(());
            }
            let viewport = viewport.resolve(map, at);
            let set = geo::compute_visible(&viewport, &all);
            print_locations(&set.visible);
            println!("{} of {} locations visible", set.visible.len(), all.len());
        }
        LocationsCmd::Show { id } => {
            let location = pipeline.locations().get(&id).await?;
            print_locations(std::slice::from_ref(&location));
            println!("{}", location.description);
        }
        LocationsCmd::Add {
            title,
            category,
            description,
            at,
            image,
        } => {
            let draft = LocationDraft {
                title,
                category: Some(category),
                description,
                coordinate: Some(at.unwrap_or_else(|| map.center())),
            };
            let image = image.map(ImageSource::new);
            let submission = pipeline.submit_location(&draft, image.as_ref()).await?;
            report("location", &submission);
        }
    }
    Ok(())
}

async fn run_stories(pipeline: &AttachmentPipeline, user_id: &str, cmd: StoriesCmd) -> Result<()> {
    match cmd {
        StoriesCmd::List { location } => {
            let stories = pipeline.stories().list_by_location(&location).await?;
            for story in &stories {
                println!(
                    "{}\t{}\t{}\t{}",
                    story.id,
                    story.title,
                    story.user_id,
                    story.image.as_deref().unwrap_or("-")
                );
                println!("    {}", story.text);
            }
            println!("{} stories at {}", stories.len(), location);
        }
        StoriesCmd::Add {
            location,
            title,
            text,
            image,
        } => {
            let draft = StoryDraft {
                user_id: user_id.to_string(),
                title,
                text,
                location,
            };
            let image = image.map(ImageSource::new);
            let submission = pipeline.submit_story(&draft, image.as_ref()).await?;
            report("story", &submission);
        }
    }
    Ok(())
}

fn print_locations(locations: &[Location]) {
    for l in locations {
        let image = match l.attachment_state() {
            AttachmentState::Attached { url } => url,
            AttachmentState::Pending => "-".to_string(),
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            l.id,
            l.category,
            l.title,
            l.coordinate(),
            image
        );
    }
}

fn report(what: &str, submission: &Submission) {
    println!("created {} {}", what, submission.id);
    match &submission.attachment {
        None => {}
        Some(AttachmentState::Attached { url }) => println!("image attached: {}", url),
        Some(AttachmentState::Pending) => println!("image pending"),
    }
    if let Some(warning) = &submission.warning {
        eprintln!("warning: {}", warning);
    }
}

async fn track(pipeline: &AttachmentPipeline, viewport: Viewport) -> Result<()> {
    let locations = pipeline.locations().list_all().await?;
    let tracker = Arc::new(PositionTracker::new());
    let mut rx = tracker.subscribe();

    let feed_tracker = tracker.clone();
    drop(tracker);
    let feed = tokio::spawn(async move {
        let lines = BufReader::new(tokio::io::stdin()).lines();
        let fixes = futures::stream::unfold(lines, |mut lines| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match line.parse::<Coordinate>() {
                        Ok(coordinate) => return Some((coordinate, lines)),
                        Err(err) => warn!(%err, "skipping malformed position"),
                    },
                    Ok(None) => return None,
                    Err(err) => {
                        warn!(?err, "position feed failed");
                        return None;
                    }
                }
            }
        });
        feed_tracker.run(fixes).await
    });

    while rx.changed().await.is_ok() {
        let Some(position) = *rx.borrow_and_update() else {
            continue;
        };
        let set = geo::compute_visible(&viewport.recentered(position), &locations);
        println!("@ {}: {}", position, set.visible_titles().join(", "));
    }

    let published = feed.await.context("position feed task panicked")?;
    info!(published, "position feed ended");
    Ok(())
}

async fn worker(pipeline: &AttachmentPipeline, policy: RetryPolicy, poll_sleep: Duration) -> Result<()> {
    info!(?policy, "starting attachment worker");
    loop {
        match outbox::process_next_task(pipeline, &policy).await {
            Ok(processed) => {
                if !processed {
                    tokio::time::sleep(poll_sleep).await;
                }
            }
            Err(err) => {
                error!(?err, "outbox worker error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn pending(pipeline: &AttachmentPipeline) -> Result<()> {
    for state in [OutboxState::Queued, OutboxState::Abandoned] {
        let tasks = db::list_outbox(pipeline.pool(), state).await?;
        println!("{}: {}", state.as_str(), tasks.len());
        for task in tasks {
            println!(
                "  #{} {} {} attempt={} due={} error={}",
                task.id,
                task.kind.as_str(),
                task.ref_id,
                task.attempt,
                task.due_at.format("%Y-%m-%d %H:%M:%S"),
                task.last_error.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}
