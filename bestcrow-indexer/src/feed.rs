// SPDX-License-Identifier: Apache-2.0

//! Change notifications for projection consumers.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::{EscrowKey, EventKind, LogPosition};

pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// An escrow record changed because of `kind` at `position`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectionUpdate {
    pub key: EscrowKey,
    pub kind: EventKind,
    pub position: LogPosition,
}

/// Fan-out of projection changes. Slow subscribers lag and miss updates
/// rather than block the pipelines.
#[derive(Clone)]
pub struct UpdateFeed {
    tx: broadcast::Sender<ProjectionUpdate>,
}

impl UpdateFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, update: ProjectionUpdate) {
        // No subscribers is not an error.
        let _ = self.tx.send(update);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProjectionUpdate> {
        self.tx.subscribe()
    }
}

impl Default for UpdateFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}
