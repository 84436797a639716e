//! Live event source over a shard-partitioned log.
//!
//! # Architecture
//!
//! ```text
//!                ┌────────────── LogEventSource ──────────────┐
//! describe_shards│                                            │
//!  ─────────────▶│  shard-000000 ──▶ worker ─┐                │
//!                │  shard-000001 ──▶ worker ─┼─▶ interceptors ─▶ dispatcher
//!                │  shard-000002 ──▶ worker ─┘                │
//!                └────────────────────────────────────────────┘
//! ```
//!
//! Each shard is read by its own tokio task. Records are ordered within a
//! shard only. A failing worker does not stop its siblings; the first error
//! is returned once every worker has ended.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use snaplog_core::notification::notify;
use snaplog_core::{
    ChannelDurationBehind, ChannelPosition, Direction, Error, EventSource, EventSourceBuilder,
    Header, InterceptorChain, InterceptorRegistry, MessageConsumer, MessageDispatcher,
    NotificationBus, Result, ShardPosition, SourceNotification, SourceStatus, StopCondition,
    WorkerState,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ConsumerConfig;
use crate::envelope;
use crate::traits::{RecordBatch, ShardedLog, list_shards};

/// Event source reading every shard of one channel.
pub struct LogEventSource {
    channel: String,
    log: Arc<dyn ShardedLog>,
    dispatcher: Arc<MessageDispatcher>,
    interceptors: InterceptorChain,
    config: ConsumerConfig,
    shutdown: CancellationToken,
    notifications: Option<NotificationBus>,
    behind: Arc<RwLock<ChannelDurationBehind>>,
}

impl LogEventSource {
    pub fn new(channel: impl Into<String>, log: Arc<dyn ShardedLog>) -> Self {
        Self {
            channel: channel.into(),
            log,
            dispatcher: Arc::new(MessageDispatcher::new()),
            interceptors: InterceptorChain::empty(),
            config: ConsumerConfig::default(),
            shutdown: CancellationToken::new(),
            notifications: None,
            behind: Arc::new(RwLock::new(ChannelDurationBehind::new())),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
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

    /// How far behind the newest record each shard was on its last read.
    pub fn duration_behind(&self) -> ChannelDurationBehind {
        self.behind
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn notification(&self, status: SourceStatus, message: impl Into<String>) -> SourceNotification {
        SourceNotification::new(&self.channel, status, message)
    }

    async fn run_workers(
        &self,
        start: &ChannelPosition,
        stop: &StopCondition,
    ) -> Result<ChannelPosition> {
        let shards = list_shards(self.log.as_ref(), &self.channel).await?;
        debug!(channel = %self.channel, shards = shards.len(), "Resolved shards");

        let mut workers = JoinSet::new();
        let mut shard_by_task = HashMap::new();
        for shard in shards {
            let worker = ShardWorker {
                channel: self.channel.clone(),
                shard_id: shard.shard_id.clone(),
                is_open: shard.is_open,
                log: Arc::clone(&self.log),
                dispatcher: Arc::clone(&self.dispatcher),
                interceptors: self.interceptors.clone(),
                config: self.config.clone(),
                shutdown: self.shutdown.clone(),
                behind: Arc::clone(&self.behind),
                stop: stop.clone(),
            };
            let position = start.shard(&shard.shard_id);
            let task = workers.spawn(worker.run(position));
            shard_by_task.insert(task.id(), shard.shard_id);
        }
        notify(
            self.notifications.as_ref(),
            self.notification(
                SourceStatus::Started,
                format!("Consuming {} shard(s)", workers.len()),
            ),
        );

        let mut position = start.clone();
        let mut first_error = None;
        while let Some(joined) = workers.join_next_with_id().await {
            let outcome = match joined {
                Ok((_, result)) => result,
                Err(e) => Err(Error::Worker {
                    shard: shard_by_task
                        .get(&e.id())
                        .cloned()
                        .unwrap_or_else(|| "unknown".to_string()),
                    message: e.to_string(),
                }),
            };
            match outcome {
                Ok(shard_position) => position = position.with(shard_position),
                Err(e) => {
                    error!(channel = %self.channel, error = %e, "Shard worker failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(position),
        }
    }
}

#[async_trait]
impl EventSource for LogEventSource {
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
        info!(channel = %self.channel, start = %start, ?stop, "Consuming channel");
        notify(
            self.notifications.as_ref(),
            self.notification(SourceStatus::Starting, "Resolving shards"),
        );

        match self.run_workers(&start, &stop).await {
            Ok(position) => {
                info!(channel = %self.channel, position = %position, "Channel consumption finished");
                notify(
                    self.notifications.as_ref(),
                    self.notification(SourceStatus::Finished, "Consumption finished")
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
        info!(channel = %self.channel, "Signaling shard workers to stop");
        self.shutdown.cancel();
    }

    fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Reads one shard until its stop condition is met or the source stops.
struct ShardWorker {
    channel: String,
    shard_id: String,
    is_open: bool,
    log: Arc<dyn ShardedLog>,
    dispatcher: Arc<MessageDispatcher>,
    interceptors: InterceptorChain,
    config: ConsumerConfig,
    shutdown: CancellationToken,
    behind: Arc<RwLock<ChannelDurationBehind>>,
    stop: StopCondition,
}

impl ShardWorker {
    async fn run(self, mut position: ShardPosition) -> Result<ShardPosition> {
        self.transition(WorkerState::Starting);
        self.transition(WorkerState::Started);
        self.transition(WorkerState::Running);
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            let batch = match self.fetch(&position).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(e) => {
                    self.transition(WorkerState::Failed);
                    return Err(e);
                }
            };

            if batch.is_empty() {
                // An empty page is not the tip while the backend still
                // reports records behind it.
                self.set_behind(batch.behind_latest);
                let at_tip = batch.behind_latest.is_zero();
                if at_tip && (self.stop.stops_when_caught_up() || !self.is_open) {
                    debug!(channel = %self.channel, shard = %self.shard_id, "Shard caught up");
                    break;
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_interval) => continue,
                }
            }

            let now = Utc::now();
            let mut stop_met = false;
            for record in batch.records {
                let next = ShardPosition::at(&self.shard_id, record.sequence_number.as_str());
                let header = Header::new()
                    .with_arrival_timestamp(record.arrival_timestamp)
                    .with_shard_position(next.clone());
                let message = envelope::decode(&record.data, &record.partition_key, header);
                stop_met = self.stop.is_met_by(&message);

                if let Some(message) = self.interceptors.intercept(message) {
                    let accepted = self.dispatcher.dispatch(&message);
                    trace!(
                        shard = %self.shard_id,
                        key = %message.key(),
                        consumers = accepted,
                        "Dispatched record"
                    );
                }
                self.behind
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record(&self.shard_id, record.arrival_timestamp, now);
                position = next;

                if stop_met || self.shutdown.is_cancelled() {
                    break;
                }
            }
            if stop_met {
                debug!(channel = %self.channel, shard = %self.shard_id, "Stop condition met");
                break;
            }
        }
        self.transition(WorkerState::Finished);
        Ok(position)
    }

    /// Fetch with bounded retries of transient failures. `None` when the
    /// source stopped while waiting to retry.
    async fn fetch(&self, position: &ShardPosition) -> Result<Option<RecordBatch>> {
        let mut attempt = 0;
        loop {
            match self
                .log
                .get_records(&self.channel, position, self.config.fetch_limit)
                .await
            {
                Ok(batch) => return Ok(Some(batch)),
                Err(e) if e.is_transient() && attempt < self.config.max_fetch_retries => {
                    attempt += 1;
                    if attempt == 1 {
                        debug!(shard = %self.shard_id, attempt, error = %e, "Fetch failed, retrying");
                    } else {
                        warn!(shard = %self.shard_id, attempt, error = %e, "Fetch failed, retrying");
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(self.config.fetch_retry_delay) => {}
                    }
                }
                Err(e) if e.is_transient() => {
                    error!(shard = %self.shard_id, attempt, error = %e, "Fetch retries exhausted");
                    return Err(Error::RetryLimitExceeded {
                        limit: self.config.max_fetch_retries,
                        message: format!("fetching shard {}: {e}", self.shard_id),
                    });
                }
                Err(e) => {
                    return Err(Error::Worker {
                        shard: self.shard_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn set_behind(&self, behind: std::time::Duration) {
        self.behind
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(&self.shard_id, behind);
    }

    fn transition(&self, state: WorkerState) {
        debug!(channel = %self.channel, shard = %self.shard_id, ?state, "Shard worker state");
    }
}

/// Builds live sources over one log, sharing config and interceptors.
pub struct LogEventSourceBuilder {
    log: Arc<dyn ShardedLog>,
    config: ConsumerConfig,
    interceptors: Arc<InterceptorRegistry>,
    notifications: Option<NotificationBus>,
}

impl LogEventSourceBuilder {
    pub fn new(log: Arc<dyn ShardedLog>) -> Self {
        Self {
            log,
            config: ConsumerConfig::default(),
            interceptors: Arc::new(InterceptorRegistry::new()),
            notifications: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_interceptors(mut self, registry: Arc<InterceptorRegistry>) -> Self {
        self.interceptors = registry;
        self
    }

    #[must_use]
    pub fn with_notifications(mut self, bus: NotificationBus) -> Self {
        self.notifications = Some(bus);
        self
    }
}

impl EventSourceBuilder for LogEventSourceBuilder {
    fn build(&self, channel_name: &str) -> Arc<dyn EventSource> {
        let mut source = LogEventSource::new(channel_name, Arc::clone(&self.log))
            .with_config(self.config.clone())
            .with_interceptors(
                self.interceptors
                    .chain_for(channel_name, Direction::Receive),
            );
        if let Some(bus) = &self.notifications {
            source = source.with_notifications(bus.clone());
        }
        Arc::new(source)
    }
}
