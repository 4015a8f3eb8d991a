//! Device position feed.
//!
//! Subscribers only ever see the latest coordinate; repeated identical fixes
//! are dropped so downstream handlers stay cheap.
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::debug;

use crate::model::Coordinate;

#[derive(Debug)]
pub struct PositionTracker {
    tx: watch::Sender<Option<Coordinate>>,
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Coordinate>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<Coordinate> {
        *self.tx.borrow()
    }

    /// Publish a fix. Returns `false` if it matches the current position.
    pub fn publish(&self, coordinate: Coordinate) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == Some(coordinate) {
                false
            } else {
                *current = Some(coordinate);
                true
            }
        })
    }

    /// Drain `feed`, publishing each fix. Returns how many changes were published.
    pub async fn run<S>(&self, feed: S) -> usize
    where
        S: Stream<Item = Coordinate>,
    {
        let mut feed = std::pin::pin!(feed);
        let mut published = 0;
        while let Some(coordinate) = feed.next().await {
            if !coordinate.is_valid() {
                debug!(%coordinate, "ignoring invalid fix");
                continue;
            }
            if self.publish(coordinate) {
                published += 1;
            }
        }
        published
    }
}
