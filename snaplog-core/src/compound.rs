//! Replay a snapshot, then tail the live log from where it left off.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::consumer::MessageConsumer;
use crate::error::{Error, Result};
use crate::position::ChannelPosition;
use crate::source::EventSource;
use crate::stop::StopCondition;

/// Two sources of the same channel consumed one after the other.
///
/// The snapshot source is drained completely; its positions seed the live
/// source, which then runs with the caller's stop condition.
pub struct CompoundEventSource {
    snapshot: Arc<dyn EventSource>,
    live: Arc<dyn EventSource>,
}

impl CompoundEventSource {
    /// Compose two sources. Both must consume the same channel.
    pub fn new(snapshot: Arc<dyn EventSource>, live: Arc<dyn EventSource>) -> Result<Self> {
        if snapshot.channel_name() != live.channel_name() {
            return Err(Error::Config(format!(
                "Snapshot source channel '{}' does not match live source channel '{}'",
                snapshot.channel_name(),
                live.channel_name()
            )));
        }
        Ok(Self { snapshot, live })
    }
}

#[async_trait]
impl EventSource for CompoundEventSource {
    fn channel_name(&self) -> &str {
        self.live.channel_name()
    }

    fn register(&self, consumer: Arc<dyn MessageConsumer>) {
        self.snapshot.register(Arc::clone(&consumer));
        self.live.register(consumer);
    }

    async fn consume_all(
        &self,
        start: ChannelPosition,
        stop: StopCondition,
    ) -> Result<ChannelPosition> {
        let from_snapshot = self
            .snapshot
            .consume_all(start.clone(), StopCondition::never())
            .await?;
        let position = start.merge(&from_snapshot);
        if self.is_stopping() {
            return Ok(position);
        }
        info!(
            channel = %self.channel_name(),
            position = %position,
            "Snapshot replayed, switching to live log"
        );
        self.live.consume_all(position, stop).await
    }

    fn stop(&self) {
        self.snapshot.stop();
        self.live.stop();
    }

    fn is_stopping(&self) -> bool {
        self.snapshot.is_stopping() || self.live.is_stopping()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{MessageDispatcher, text_consumer};
    use crate::message::TextMessage;
    use crate::position::ShardPosition;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Replays fixed messages and returns a fixed position.
    struct ScriptedSource {
        channel: String,
        messages: Vec<TextMessage>,
        end: ChannelPosition,
        dispatcher: MessageDispatcher,
        stopping: AtomicBool,
        starts: Mutex<Vec<ChannelPosition>>,
    }

    impl ScriptedSource {
        fn new(channel: &str, messages: Vec<TextMessage>, end: ChannelPosition) -> Arc<Self> {
            Arc::new(Self {
                channel: channel.to_string(),
                messages,
                end,
                dispatcher: MessageDispatcher::new(),
                stopping: AtomicBool::new(false),
                starts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        fn channel_name(&self) -> &str {
            &self.channel
        }

        fn register(&self, consumer: Arc<dyn MessageConsumer>) {
            self.dispatcher.register(consumer);
        }

        async fn consume_all(
            &self,
            start: ChannelPosition,
            _stop: StopCondition,
        ) -> Result<ChannelPosition> {
            self.starts.lock().unwrap().push(start.clone());
            for message in &self.messages {
                self.dispatcher.dispatch(message);
            }
            Ok(start.merge(&self.end))
        }

        fn stop(&self) {
            self.stopping.store(true, Ordering::SeqCst);
        }

        fn is_stopping(&self) -> bool {
            self.stopping.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn rejects_mismatched_channel_names() {
        let snapshot = ScriptedSource::new("products", vec![], ChannelPosition::empty());
        let live = ScriptedSource::new("orders", vec![], ChannelPosition::empty());
        let result = CompoundEventSource::new(snapshot, live);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn replays_snapshot_before_live_and_hands_over_position() {
        let snapshot_end = ChannelPosition::of([ShardPosition::at("shard-0", "5")]);
        let live_end = ChannelPosition::of([ShardPosition::at("shard-0", "9")]);
        let snapshot = ScriptedSource::new(
            "products",
            vec![TextMessage::of("a", "from-snapshot".to_string())],
            snapshot_end.clone(),
        );
        let live = ScriptedSource::new(
            "products",
            vec![TextMessage::of("a", "from-live".to_string())],
            live_end.clone(),
        );
        let compound = CompoundEventSource::new(snapshot.clone(), live.clone()).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        compound.register(
            text_consumer(".*", move |m: &TextMessage| {
                sink.lock().unwrap().push(m.payload().cloned().unwrap_or_default());
            })
            .unwrap(),
        );

        let end = compound
            .consume_all(ChannelPosition::from_horizon(["shard-0"]), StopCondition::caught_up())
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["from-snapshot", "from-live"]);
        assert_eq!(live.starts.lock().unwrap()[0], snapshot_end);
        assert_eq!(end, live_end);
    }

    #[test]
    fn stop_reaches_both_sources_and_is_stopping_is_either() {
        let snapshot = ScriptedSource::new("c", vec![], ChannelPosition::empty());
        let live = ScriptedSource::new("c", vec![], ChannelPosition::empty());
        let compound = CompoundEventSource::new(snapshot.clone(), live.clone()).unwrap();
        assert!(!compound.is_stopping());

        live.stop();
        assert!(compound.is_stopping());

        compound.stop();
        assert!(snapshot.is_stopping());
    }
}
