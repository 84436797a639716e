//! Point-to-point queue channels.
//!
//! A queue channel has no shards and no positions. Messages are received,
//! dispatched and then acknowledged; a message that is not acknowledged
//! within its visibility timeout is delivered again.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use snaplog_core::notification::notify;
use snaplog_core::{
    ChannelPosition, Error, EventSource, Header, InterceptorChain, MessageConsumer,
    MessageDispatcher, MessageSender, NotificationBus, Result, SourceNotification, SourceStatus,
    StopCondition, TextMessage,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::envelope;
use crate::traits::{QueueMessage, QueueService};

/// Message attribute carrying the partition key.
pub const KEY_ATTRIBUTE: &str = "snaplog_msg_key";

struct StoredMessage {
    body: String,
    attributes: HashMap<String, String>,
    sent_timestamp: chrono::DateTime<Utc>,
    visible_at: Instant,
    receipt_handle: Option<String>,
}

/// In-memory [`QueueService`] with visibility-timeout redelivery.
#[derive(Default)]
pub struct InMemoryQueueService {
    queues: Mutex<HashMap<String, VecDeque<StoredMessage>>>,
    notify: Notify,
}

impl InMemoryQueueService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue. Existing queues are left untouched.
    pub fn create_queue(&self, queue: &str) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(queue.to_string())
            .or_default();
    }

    /// Messages not yet acknowledged, visible or not.
    pub fn pending(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Take up to `max` visible messages, hiding them until `hidden_until`.
    /// Otherwise returns the instant the next message becomes visible.
    fn take_visible(
        &self,
        queue: &str,
        max: usize,
        hidden_until: Instant,
    ) -> Result<(Vec<QueueMessage>, Option<Instant>)> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| unknown_queue(queue))?;
        let now = Instant::now();
        let mut taken = Vec::new();
        for stored in messages.iter_mut() {
            if taken.len() >= max {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            let receipt_handle = Uuid::new_v4().to_string();
            stored.receipt_handle = Some(receipt_handle.clone());
            stored.visible_at = hidden_until;
            taken.push(QueueMessage {
                receipt_handle,
                body: stored.body.clone(),
                attributes: stored.attributes.clone(),
                sent_timestamp: stored.sent_timestamp,
            });
        }
        let next_visible = messages.iter().map(|m| m.visible_at).min();
        Ok((taken, next_visible))
    }
}

fn unknown_queue(queue: &str) -> Error {
    Error::Config(format!("Unknown queue '{queue}'"))
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn send(
        &self,
        queue: &str,
        body: String,
        attributes: HashMap<String, String>,
    ) -> Result<()> {
        {
            let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
            let messages = queues
                .get_mut(queue)
                .ok_or_else(|| unknown_queue(queue))?;
            messages.push_back(StoredMessage {
                body,
                attributes,
                sent_timestamp: Utc::now(),
                visible_at: Instant::now(),
                receipt_handle: None,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let (taken, next_visible) =
                self.take_visible(queue, max_messages, Instant::now() + visibility_timeout)?;
            if !taken.is_empty() {
                return Ok(taken);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            let wake = next_visible.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn acknowledge(&self, queue: &str, receipt_handle: &str) -> Result<()> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let messages = queues
            .get_mut(queue)
            .ok_or_else(|| unknown_queue(queue))?;
        let before = messages.len();
        messages.retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
        if messages.len() == before {
            debug!(queue, receipt_handle, "Acknowledged unknown or stale receipt");
        }
        Ok(())
    }
}

/// Event source draining one queue.
pub struct QueueEventSource {
    queue: String,
    service: Arc<dyn QueueService>,
    dispatcher: MessageDispatcher,
    interceptors: InterceptorChain,
    config: QueueConfig,
    shutdown: CancellationToken,
    notifications: Option<NotificationBus>,
}

impl QueueEventSource {
    pub fn new(queue: impl Into<String>, service: Arc<dyn QueueService>) -> Self {
        Self {
            queue: queue.into(),
            service,
            dispatcher: MessageDispatcher::new(),
            interceptors: InterceptorChain::empty(),
            config: QueueConfig::default(),
            shutdown: CancellationToken::new(),
            notifications: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: QueueConfig) -> Self {
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

    async fn receive(&self) -> Result<Vec<QueueMessage>> {
        let mut attempt = 0;
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(Vec::new()),
                received = self.service.receive(
                    &self.queue,
                    self.config.max_messages,
                    self.config.wait_time,
                    self.config.visibility_timeout,
                ) => received,
            };
            match received {
                Ok(messages) => return Ok(messages),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    if attempt == 1 {
                        debug!(queue = %self.queue, attempt, error = %e, "Receive failed, retrying");
                    } else {
                        warn!(queue = %self.queue, attempt, error = %e, "Receive failed, retrying");
                    }
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) if e.is_transient() => {
                    error!(queue = %self.queue, attempt, error = %e, "Receive retries exhausted");
                    return Err(Error::RetryLimitExceeded {
                        limit: self.config.max_retries,
                        message: format!("receiving from {}: {e}", self.queue),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Dispatch one received message. Returns whether it met the stop
    /// condition.
    async fn handle(&self, received: QueueMessage, stop: &StopCondition) -> Result<bool> {
        let key = received
            .attributes
            .get(KEY_ATTRIBUTE)
            .cloned()
            .unwrap_or_default();
        let header = Header::new().with_arrival_timestamp(received.sent_timestamp);
        let message = envelope::decode(received.body.as_bytes(), &key, header);
        let stop_met = stop.is_met_by(&message);

        if let Some(message) = self.interceptors.intercept(message) {
            let accepted = self.dispatcher.dispatch(&message);
            trace!(queue = %self.queue, key = %message.key(), consumers = accepted, "Dispatched message");
        }
        self.service
            .acknowledge(&self.queue, &received.receipt_handle)
            .await?;
        Ok(stop_met)
    }

    async fn drain(&self, stop: &StopCondition) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            let messages = self.receive().await?;
            if messages.is_empty() {
                if stop.stops_when_caught_up() {
                    debug!(queue = %self.queue, "Queue drained");
                    return Ok(());
                }
                continue;
            }
            for received in messages {
                if self.handle(received, stop).await? {
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl EventSource for QueueEventSource {
    fn channel_name(&self) -> &str {
        &self.queue
    }

    fn register(&self, consumer: Arc<dyn MessageConsumer>) {
        self.dispatcher.register(consumer);
    }

    /// Queues carry no positions; `start` is returned unchanged.
    async fn consume_all(
        &self,
        start: ChannelPosition,
        stop: StopCondition,
    ) -> Result<ChannelPosition> {
        info!(queue = %self.queue, ?stop, "Consuming queue");
        let bus = self.notifications.as_ref();
        notify(
            bus,
            SourceNotification::new(&self.queue, SourceStatus::Starting, "Connecting to queue"),
        );
        notify(
            bus,
            SourceNotification::new(&self.queue, SourceStatus::Started, "Receiving messages"),
        );
        match self.drain(&stop).await {
            Ok(()) => {
                notify(
                    bus,
                    SourceNotification::new(&self.queue, SourceStatus::Finished, "Consumption finished"),
                );
                Ok(start)
            }
            Err(e) => {
                error!(queue = %self.queue, error = %e, "Queue consumption failed");
                notify(
                    bus,
                    SourceNotification::new(&self.queue, SourceStatus::Failed, e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }

    fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// [`MessageSender`] writing to one queue, one message per send.
pub struct QueueSender {
    queue: String,
    service: Arc<dyn QueueService>,
    config: QueueConfig,
    interceptors: InterceptorChain,
}

impl QueueSender {
    pub fn new(queue: impl Into<String>, service: Arc<dyn QueueService>) -> Self {
        Self {
            queue: queue.into(),
            service,
            config: QueueConfig::default(),
            interceptors: InterceptorChain::empty(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }

    async fn send_one(&self, message: &TextMessage) -> Result<()> {
        let body = envelope::encode_body(message)?;
        let mut attributes = message.header().attributes().clone();
        attributes.insert(
            KEY_ATTRIBUTE.to_string(),
            message.key().partition_key().to_string(),
        );

        let mut attempt = 0;
        loop {
            match self
                .service
                .send(&self.queue, body.clone(), attributes.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(queue = %self.queue, attempt, error = %e, "Send failed, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) if e.is_transient() => {
                    return Err(Error::RetryLimitExceeded {
                        limit: self.config.max_retries,
                        message: format!("sending to {}: {e}", self.queue),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl MessageSender for QueueSender {
    fn channel_name(&self) -> &str {
        &self.queue
    }

    async fn send_batch(&self, messages: Vec<TextMessage>) -> Result<()> {
        for message in messages {
            if let Some(message) = self.interceptors.intercept(message) {
                self.send_one(&message).await?;
            }
        }
        Ok(())
    }
}
