//! Event source replaying the latest snapshot of a channel.

use std::sync::Arc;

use async_trait::async_trait;
use snaplog_core::notification::notify;
use snaplog_core::{
    ChannelPosition, EventSource, Header, InterceptorChain, Key, MessageConsumer,
    MessageDispatcher, NotificationBus, Result, SourceNotification, SourceStatus, StopCondition,
    TextMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SnapshotError;
use crate::format::SnapshotHandler;
use crate::reader::SnapshotReader;

/// Replays the newest snapshot of one channel as messages.
///
/// Each entry becomes a message keyed by its compaction key; `null` entries
/// become tombstones. The positions recorded in the snapshot are merged into
/// the start position and returned, so a live source can resume from them.
/// A channel without any snapshot finishes immediately at `start`.
pub struct SnapshotEventSource {
    channel: String,
    reader: Arc<SnapshotReader>,
    dispatcher: Arc<MessageDispatcher>,
    interceptors: InterceptorChain,
    shutdown: CancellationToken,
    notifications: Option<NotificationBus>,
}

impl SnapshotEventSource {
    pub fn new(channel: impl Into<String>, reader: Arc<SnapshotReader>) -> Self {
        Self {
            channel: channel.into(),
            reader,
            dispatcher: Arc::new(MessageDispatcher::new()),
            interceptors: InterceptorChain::empty(),
            shutdown: CancellationToken::new(),
            notifications: None,
        }
    }

    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, bus: NotificationBus) -> Self {
        self.notifications = Some(bus);
        self
    }

    fn notification(&self, status: SourceStatus, message: impl Into<String>) -> SourceNotification {
        SourceNotification::new(&self.channel, status, message)
    }

    async fn replay(&self, start: &ChannelPosition, stop: StopCondition) -> Result<ChannelPosition> {
        let Some(name) = self.reader.latest_snapshot_name(&self.channel).await? else {
            info!(channel = %self.channel, "No snapshot found, starting from horizon");
            return Ok(start.clone());
        };
        notify(
            self.notifications.as_ref(),
            self.notification(SourceStatus::Started, format!("Loading snapshot {name}")),
        );

        let replayer = Replayer {
            dispatcher: Arc::clone(&self.dispatcher),
            interceptors: self.interceptors.clone(),
            shutdown: self.shutdown.clone(),
            stop,
            finished: false,
            positions: ChannelPosition::empty(),
            replayed: 0,
        };
        let replayed = self.reader.read_with(&name, replayer).await?;
        info!(
            channel = %self.channel,
            name = %name,
            replayed = replayed.replayed,
            "Snapshot replayed"
        );
        Ok(start.merge(&replayed.positions))
    }
}

#[async_trait]
impl EventSource for SnapshotEventSource {
    fn channel_name(&self) -> &str {
        &self.channel
    }

    fn register(&self, consumer: Arc<dyn MessageConsumer>) {
        self.dispatcher.register(consumer);
    }

    async fn consume_all(
        &self,
        start: ChannelPosition,
        stop: StopCondition,
    ) -> Result<ChannelPosition> {
        notify(
            self.notifications.as_ref(),
            self.notification(SourceStatus::Starting, "Locating snapshot"),
        );
        match self.replay(&start, stop).await {
            Ok(position) => {
                notify(
                    self.notifications.as_ref(),
                    self.notification(SourceStatus::Finished, "Snapshot loaded")
                        .with_position(position.clone()),
                );
                Ok(position)
            }
            Err(e) => {
                notify(
                    self.notifications.as_ref(),
                    self.notification(SourceStatus::Failed, e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn stop(&self) {
        debug!(channel = %self.channel, "Stopping snapshot replay");
        self.shutdown.cancel();
    }

    fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Dispatches snapshot entries while they are parsed.
struct Replayer {
    dispatcher: Arc<MessageDispatcher>,
    interceptors: InterceptorChain,
    shutdown: CancellationToken,
    stop: StopCondition,
    finished: bool,
    positions: ChannelPosition,
    replayed: usize,
}

impl SnapshotHandler for Replayer {
    fn on_positions(&mut self, positions: ChannelPosition) -> std::result::Result<(), SnapshotError> {
        self.positions = positions;
        Ok(())
    }

    fn on_entry(
        &mut self,
        key: String,
        payload: Option<String>,
    ) -> std::result::Result<(), SnapshotError> {
        // Parsing continues to validate the document, dispatching does not.
        if self.finished || self.shutdown.is_cancelled() {
            return Ok(());
        }
        let message = TextMessage::new(Key::of(key), Header::new(), payload);
        self.finished = self.stop.is_met_by(&message);
        if let Some(message) = self.interceptors.intercept(message) {
            self.dispatcher.dispatch(&message);
            self.replayed += 1;
        }
        Ok(())
    }
}
