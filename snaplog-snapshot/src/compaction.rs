//! Periodic compaction of a channel into a snapshot.
//!
//! ```text
//! latest snapshot ──▶ SnapshotEventSource ─┐
//!                                          ├─▶ StateRepository ──▶ SnapshotWriter ──▶ new snapshot
//! live log ────────▶ live EventSource ─────┘                                          │
//!                                                     older snapshots deleted ◀───────┘
//! ```
//!
//! At most one compaction per channel may run at a time; callers provide the
//! mutual exclusion.

use std::sync::Arc;

use chrono::Utc;
use snaplog_core::notification::notify;
use snaplog_core::{
    ChannelPosition, CompoundEventSource, EventSource, EventSourceBuilder, NotificationBus,
    Result, SourceNotification, SourceStatus, StateRepository, StopCondition,
    repository_consumer,
};
use tracing::{info, warn};

use crate::config::SnapshotConfig;
use crate::reader::SnapshotReader;
use crate::source::SnapshotEventSource;
use crate::store::BlobStore;
use crate::writer::SnapshotWriter;

/// Replays the latest snapshot plus the live log and writes a new snapshot.
pub struct CompactionService {
    store: Arc<dyn BlobStore>,
    reader: Arc<SnapshotReader>,
    writer: SnapshotWriter,
    bucket: String,
    live: Arc<dyn EventSourceBuilder>,
    notifications: Option<NotificationBus>,
}

impl CompactionService {
    pub fn new(
        store: Arc<dyn BlobStore>,
        config: SnapshotConfig,
        live: Arc<dyn EventSourceBuilder>,
    ) -> Self {
        Self {
            reader: Arc::new(SnapshotReader::new(Arc::clone(&store), config.clone())),
            writer: SnapshotWriter::new(Arc::clone(&store), config.clone()),
            bucket: config.bucket,
            store,
            live,
            notifications: None,
        }
    }

    #[must_use]
    pub fn with_notifications(mut self, bus: NotificationBus) -> Self {
        self.notifications = Some(bus);
        self
    }

    pub fn reader(&self) -> &Arc<SnapshotReader> {
        &self.reader
    }

    /// Compact `channel` and return the name of the new snapshot.
    ///
    /// Consumption stops once every shard is caught up or reaches a record
    /// that arrived after the run started. Older snapshots of the channel
    /// are deleted only after the new one is uploaded; failing to delete
    /// them does not fail the run.
    pub async fn compact(&self, channel: &str) -> Result<String> {
        notify(
            self.notifications.as_ref(),
            SourceNotification::new(channel, SourceStatus::Starting, "Compaction starting"),
        );
        match self.run(channel).await {
            Ok((name, position)) => {
                notify(
                    self.notifications.as_ref(),
                    SourceNotification::new(
                        channel,
                        SourceStatus::Finished,
                        format!("Snapshot {name} saved"),
                    )
                    .with_position(position),
                );
                Ok(name)
            }
            Err(e) => {
                warn!(channel, error = %e, "Compaction failed");
                notify(
                    self.notifications.as_ref(),
                    SourceNotification::new(channel, SourceStatus::Failed, e.to_string()),
                );
                Err(e)
            }
        }
    }

    async fn run(&self, channel: &str) -> Result<(String, ChannelPosition)> {
        let started_at = Utc::now();
        self.store.create_bucket_if_missing(&self.bucket).await?;

        let repository = Arc::new(StateRepository::new());
        let mut snapshot = SnapshotEventSource::new(channel, Arc::clone(&self.reader));
        if let Some(bus) = &self.notifications {
            snapshot = snapshot.with_notifications(bus.clone());
        }
        let source = CompoundEventSource::new(Arc::new(snapshot), self.live.build(channel))?;
        source.register(repository_consumer(Arc::clone(&repository), ".*")?);

        let position = source
            .consume_all(
                ChannelPosition::empty(),
                StopCondition::arrived_after(started_at).or_caught_up(),
            )
            .await?;
        info!(
            channel,
            position = %position,
            keys = repository.len(),
            "Channel replayed for compaction"
        );
        notify(
            self.notifications.as_ref(),
            SourceNotification::new(channel, SourceStatus::Started, "Saving snapshot")
                .with_position(position.clone()),
        );

        let name = self
            .writer
            .write_snapshot(channel, &position, &repository)
            .await?;
        self.delete_older_snapshots(channel, &name).await;
        Ok((name, position))
    }

    async fn delete_older_snapshots(&self, channel: &str, keep: &str) {
        let names = match self.reader.snapshot_names(channel).await {
            Ok(names) => names,
            Err(e) => {
                warn!(channel, error = %e, "Failed to list snapshots for retention");
                return;
            }
        };
        for name in names.iter().filter(|n| n.as_str() != keep) {
            match self.store.delete_object(&self.bucket, name).await {
                Ok(()) => info!(channel, name = %name, "Deleted superseded snapshot"),
                Err(e) => warn!(channel, name = %name, error = %e, "Failed to delete snapshot"),
            }
        }
    }
}
