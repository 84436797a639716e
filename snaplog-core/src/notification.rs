//! Status notifications for event sources and snapshot operations.
//!
//! Sources publish their lifecycle (starting, started, finished, failed) on a
//! [`NotificationBus`] so that monitoring can follow snapshot loads, snapshot
//! writes and live consumption without polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::position::ChannelPosition;

/// Lifecycle status of a source or snapshot operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Starting,
    Started,
    Finished,
    Failed,
}

/// A status change of one channel's source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceNotification {
    pub channel_name: String,
    pub status: SourceStatus,
    pub message: String,
    pub position: Option<ChannelPosition>,
    pub timestamp: DateTime<Utc>,
}

impl SourceNotification {
    pub fn new(channel_name: &str, status: SourceStatus, message: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            status,
            message: message.into(),
            position: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_position(mut self, position: ChannelPosition) -> Self {
        self.position = Some(position);
        self
    }
}

/// Broadcasts notifications to any number of live subscribers.
///
/// Publishing never blocks and never fails; notifications sent while nobody
/// listens are discarded.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<SourceNotification>,
}

impl NotificationBus {
    /// Default channel capacity.
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, notification: SourceNotification) {
        // Ignore if no receivers
        let _ = self.tx.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceNotification> {
        self.tx.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Publish to an optional bus.
pub fn notify(bus: Option<&NotificationBus>, notification: SourceNotification) {
    if let Some(bus) = bus {
        bus.publish(notification);
    }
}
