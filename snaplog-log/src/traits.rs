//! Collaborator interfaces for shard-partitioned logs and queues.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use snaplog_core::{Result, ShardPosition};

/// A shard and whether it still accepts writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardDescription {
    pub shard_id: String,
    pub is_open: bool,
}

/// One page of a shard listing.
#[derive(Debug, Clone, Default)]
pub struct ShardPage {
    pub shards: Vec<ShardDescription>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_token: Option<String>,
}

/// A record as stored on a shard.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub data: Bytes,
    pub partition_key: String,
    pub sequence_number: String,
    pub arrival_timestamp: DateTime<Utc>,
}

/// Records read from one shard.
#[derive(Debug, Clone, Default)]
pub struct RecordBatch {
    pub records: Vec<LogRecord>,
    /// How far the newest returned record is behind the shard's tip, as
    /// reported by the backend. Zero means caught up. An empty batch with a
    /// non-zero value still has records pending.
    pub behind_latest: Duration,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// An entry to append to a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutEntry {
    pub partition_key: String,
    pub data: Bytes,
}

impl PutEntry {
    /// Size counted against the per-call byte cap.
    pub fn size_bytes(&self) -> usize {
        self.partition_key.len() + self.data.len()
    }
}

/// Per-entry outcome of a batch append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Written {
        shard_id: String,
        sequence_number: String,
    },
    Failed {
        error_code: Option<String>,
        message: String,
    },
}

impl PutOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcomes of a batch append, one per entry in request order.
#[derive(Debug, Clone, Default)]
pub struct PutBatchResult {
    pub outcomes: Vec<PutOutcome>,
}

impl PutBatchResult {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    /// Indices of failed entries, ascending.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_failed())
            .map(|(i, _)| i)
            .collect()
    }
}

/// A shard-partitioned, append-only log service.
#[async_trait]
pub trait ShardedLog: Send + Sync {
    /// One page of the channel's shards, starting after `next_token`.
    async fn describe_shards(&self, channel: &str, next_token: Option<String>)
    -> Result<ShardPage>;

    /// Up to `limit` records following `position`.
    async fn get_records(
        &self,
        channel: &str,
        position: &ShardPosition,
        limit: usize,
    ) -> Result<RecordBatch>;

    /// Append entries. Transport failures are errors; rejected entries are
    /// reported per entry.
    async fn put_records(&self, channel: &str, entries: Vec<PutEntry>) -> Result<PutBatchResult>;
}

/// All shards of a channel, following continuation tokens.
pub async fn list_shards(log: &dyn ShardedLog, channel: &str) -> Result<Vec<ShardDescription>> {
    let mut shards = Vec::new();
    let mut next_token = None;
    loop {
        let page = log.describe_shards(channel, next_token).await?;
        shards.extend(page.shards);
        match page.next_token {
            Some(token) => next_token = Some(token),
            None => return Ok(shards),
        }
    }
}

/// A message received from a queue, hidden from other receivers until it is
/// acknowledged or its visibility timeout expires.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub receipt_handle: String,
    pub body: String,
    pub attributes: HashMap<String, String>,
    pub sent_timestamp: DateTime<Utc>,
}

/// A point-to-point queue service with at-least-once delivery.
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn send(
        &self,
        queue: &str,
        body: String,
        attributes: HashMap<String, String>,
    ) -> Result<()>;

    /// Receive up to `max_messages`, waiting up to `wait` when none are ready.
    async fn receive(
        &self,
        queue: &str,
        max_messages: usize,
        wait: Duration,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>>;

    async fn acknowledge(&self, queue: &str, receipt_handle: &str) -> Result<()>;
}
