//! Event source and message sender capabilities.
//!
//! Every source variant (live log, queue, snapshot, compound) implements
//! [`EventSource`] on its own; shared behaviour lives in helper types such as
//! [`MessageDispatcher`](crate::consumer::MessageDispatcher) rather than in a
//! base type.

use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::MessageConsumer;
use crate::error::Result;
use crate::message::TextMessage;
use crate::position::ChannelPosition;
use crate::stop::StopCondition;

/// Lifecycle of a shard worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Started,
    Running,
    Finished,
    Failed,
}

/// Consumes one logical channel and dispatches to registered consumers.
#[async_trait]
pub trait EventSource: Send + Sync {
    fn channel_name(&self) -> &str;

    /// Add a consumer. Messages are delivered to every matching consumer.
    fn register(&self, consumer: Arc<dyn MessageConsumer>);

    /// Consume from `start` until `stop` is met for every shard, the source
    /// is exhausted, or [`stop`](Self::stop) is called. Returns the merged
    /// position reached.
    async fn consume_all(
        &self,
        start: ChannelPosition,
        stop: StopCondition,
    ) -> Result<ChannelPosition>;

    /// Consume until stopped externally.
    async fn consume(&self, start: ChannelPosition) -> Result<ChannelPosition> {
        self.consume_all(start, StopCondition::never()).await
    }

    /// Signal all workers to finish after their current record.
    fn stop(&self);

    fn is_stopping(&self) -> bool;
}

/// Creates live event sources for a channel name.
pub trait EventSourceBuilder: Send + Sync {
    fn build(&self, channel_name: &str) -> Arc<dyn EventSource>;
}

/// Publishes messages to one channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel_name(&self) -> &str;

    async fn send(&self, message: TextMessage) -> Result<()> {
        self.send_batch(vec![message]).await
    }

    async fn send_batch(&self, messages: Vec<TextMessage>) -> Result<()>;
}
