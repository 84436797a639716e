//! Sharded in-memory log for tests and local composition.
//!
//! Simulates a shard-partitioned log service:
//! - Entries are routed to shards by partition key hash
//! - Each shard has its own, zero-padded sequence tokens
//! - Shard listings are paginated with continuation tokens
//!
//! Channels are owned by the log instance. There is no process-wide
//! registry; share the instance by `Arc`.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use snaplog_core::{Error, PositionMarker, Result, ShardPosition};
use tokio::sync::RwLock;

use crate::traits::{
    LogRecord, PutBatchResult, PutEntry, PutOutcome, RecordBatch, ShardDescription, ShardPage,
    ShardedLog,
};

/// Shards returned per `describe_shards` page.
const DEFAULT_PAGE_SIZE: usize = 100;

struct ShardState {
    id: String,
    open: bool,
    records: Vec<LogRecord>,
    next_sequence: u64,
}

impl ShardState {
    fn new(id: String) -> Self {
        Self {
            id,
            open: true,
            records: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Index of the first record following `marker`.
    fn start_index(&self, marker: &PositionMarker) -> usize {
        match marker {
            PositionMarker::Horizon => 0,
            PositionMarker::At(token) => self
                .records
                .partition_point(|r| r.sequence_number.as_str() <= token.as_str()),
            PositionMarker::AtTimestamp(ts) => {
                self.records.partition_point(|r| r.arrival_timestamp < *ts)
            }
        }
    }
}

/// In-memory implementation of [`ShardedLog`].
pub struct InMemoryShardedLog {
    channels: RwLock<HashMap<String, Vec<ShardState>>>,
    page_size: usize,
    failing_fetches: AtomicUsize,
}

impl InMemoryShardedLog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
            failing_fetches: AtomicUsize::new(0),
        }
    }

    /// Use a custom listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create a channel with `shard_count` open shards named `shard-000000`,
    /// `shard-000001`, and so on. Existing channels are left untouched.
    pub async fn create_channel(&self, channel: &str, shard_count: usize) {
        let mut channels = self.channels.write().await;
        channels.entry(channel.to_string()).or_insert_with(|| {
            (0..shard_count.max(1))
                .map(|i| ShardState::new(format!("shard-{i:06}")))
                .collect()
        });
    }

    /// Mark a shard closed. Closed shards keep their records but take no
    /// new writes.
    pub async fn close_shard(&self, channel: &str, shard_id: &str) -> Result<()> {
        let mut channels = self.channels.write().await;
        let shards = channels
            .get_mut(channel)
            .ok_or_else(|| unknown_channel(channel))?;
        let shard = shards
            .iter_mut()
            .find(|s| s.id == shard_id)
            .ok_or_else(|| unknown_shard(channel, shard_id))?;
        shard.open = false;
        Ok(())
    }

    /// Make the next `count` record fetches fail with a backend error.
    pub fn fail_next_fetches(&self, count: usize) {
        self.failing_fetches.store(count, Ordering::SeqCst);
    }

    /// All records of a shard, oldest first.
    pub async fn records(&self, channel: &str, shard_id: &str) -> Result<Vec<LogRecord>> {
        let channels = self.channels.read().await;
        let shards = channels.get(channel).ok_or_else(|| unknown_channel(channel))?;
        shards
            .iter()
            .find(|s| s.id == shard_id)
            .map(|s| s.records.clone())
            .ok_or_else(|| unknown_shard(channel, shard_id))
    }

    /// Total record count across the channel's shards.
    pub async fn record_count(&self, channel: &str) -> usize {
        let channels = self.channels.read().await;
        channels
            .get(channel)
            .map_or(0, |shards| shards.iter().map(|s| s.records.len()).sum())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryShardedLog {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown_channel(channel: &str) -> Error {
    Error::Config(format!("Unknown channel '{channel}'"))
}

fn unknown_shard(channel: &str, shard_id: &str) -> Error {
    Error::Config(format!("Unknown shard '{shard_id}' in channel '{channel}'"))
}

/// Index into `open` shards for a partition key.
fn route(partition_key: &str, open: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    partition_key.hash(&mut hasher);
    (hasher.finish() as usize) % open
}

#[async_trait]
impl ShardedLog for InMemoryShardedLog {
    async fn describe_shards(
        &self,
        channel: &str,
        next_token: Option<String>,
    ) -> Result<ShardPage> {
        let channels = self.channels.read().await;
        let shards = channels.get(channel).ok_or_else(|| unknown_channel(channel))?;
        let offset = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| Error::Config(format!("Invalid continuation token '{token}'")))?,
            None => 0,
        };
        let end = (offset + self.page_size).min(shards.len());
        let page = shards
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|s| ShardDescription {
                shard_id: s.id.clone(),
                is_open: s.open,
            })
            .collect();
        Ok(ShardPage {
            shards: page,
            next_token: (end < shards.len()).then(|| end.to_string()),
        })
    }

    async fn get_records(
        &self,
        channel: &str,
        position: &ShardPosition,
        limit: usize,
    ) -> Result<RecordBatch> {
        if self.take_injected_failure() {
            return Err(Error::Backend(format!(
                "Injected fetch failure for {position}"
            )));
        }
        let channels = self.channels.read().await;
        let shards = channels.get(channel).ok_or_else(|| unknown_channel(channel))?;
        let shard = shards
            .iter()
            .find(|s| s.id == position.shard_id())
            .ok_or_else(|| unknown_shard(channel, position.shard_id()))?;

        let start = shard.start_index(position.marker());
        let end = (start + limit).min(shard.records.len());
        let records = shard.records.get(start..end).unwrap_or_default().to_vec();
        let behind_latest = match (records.last(), shard.records.last()) {
            (Some(last), Some(tip)) => (tip.arrival_timestamp - last.arrival_timestamp)
                .to_std()
                .unwrap_or_default(),
            _ => std::time::Duration::ZERO,
        };
        Ok(RecordBatch {
            records,
            behind_latest,
        })
    }

    async fn put_records(&self, channel: &str, entries: Vec<PutEntry>) -> Result<PutBatchResult> {
        let mut channels = self.channels.write().await;
        let shards = channels
            .get_mut(channel)
            .ok_or_else(|| unknown_channel(channel))?;
        let open: Vec<usize> = (0..shards.len()).filter(|&i| shards[i].open).collect();

        let outcomes = entries
            .into_iter()
            .map(|entry| {
                if open.is_empty() {
                    return PutOutcome::Failed {
                        error_code: Some("NoOpenShards".to_string()),
                        message: format!("Channel '{channel}' has no open shard"),
                    };
                }
                let shard = &mut shards[open[route(&entry.partition_key, open.len())]];
                let sequence_number = format!("{:020}", shard.next_sequence);
                shard.next_sequence += 1;
                shard.records.push(LogRecord {
                    data: entry.data,
                    partition_key: entry.partition_key,
                    sequence_number: sequence_number.clone(),
                    arrival_timestamp: Utc::now(),
                });
                PutOutcome::Written {
                    shard_id: shard.id.clone(),
                    sequence_number,
                }
            })
            .collect();
        Ok(PutBatchResult { outcomes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::list_shards;
    use bytes::Bytes;

    fn entry(key: &str, data: &str) -> PutEntry {
        PutEntry {
            partition_key: key.to_string(),
            data: Bytes::from(data.to_string()),
        }
    }

    #[tokio::test]
    async fn shard_listing_follows_continuation_tokens() {
        let log = InMemoryShardedLog::new().with_page_size(2);
        log.create_channel("products", 5).await;

        let first = log.describe_shards("products", None).await.unwrap();
        assert_eq!(first.shards.len(), 2);
        assert!(first.next_token.is_some());

        let all = list_shards(&log, "products").await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.shard_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "shard-000000",
                "shard-000001",
                "shard-000002",
                "shard-000003",
                "shard-000004"
            ]
        );
    }

    #[tokio::test]
    async fn same_partition_key_lands_on_same_shard() {
        let log = InMemoryShardedLog::new();
        log.create_channel("products", 4).await;

        let result = log
            .put_records("products", vec![entry("a", "1"), entry("a", "2")])
            .await
            .unwrap();
        let shards: Vec<_> = result
            .outcomes
            .iter()
            .map(|o| match o {
                PutOutcome::Written { shard_id, .. } => shard_id.clone(),
                PutOutcome::Failed { .. } => panic!("unexpected failure"),
            })
            .collect();
        assert_eq!(shards[0], shards[1]);
    }

    #[tokio::test]
    async fn get_records_starts_after_token() {
        let log = InMemoryShardedLog::new();
        log.create_channel("c", 1).await;
        log.put_records("c", vec![entry("a", "1"), entry("b", "2"), entry("c", "3")])
            .await
            .unwrap();

        let from_horizon = log
            .get_records("c", &ShardPosition::horizon("shard-000000"), 10)
            .await
            .unwrap();
        assert_eq!(from_horizon.len(), 3);
        assert_eq!(from_horizon.behind_latest, std::time::Duration::ZERO);

        let token = from_horizon.records[0].sequence_number.clone();
        let after = log
            .get_records("c", &ShardPosition::at("shard-000000", token), 10)
            .await
            .unwrap();
        let data: Vec<_> = after.records.iter().map(|r| r.data.clone()).collect();
        assert_eq!(data, vec![Bytes::from("2"), Bytes::from("3")]);
    }

    #[tokio::test]
    async fn get_records_respects_limit() {
        let log = InMemoryShardedLog::new();
        log.create_channel("c", 1).await;
        log.put_records("c", (0..5).map(|i| entry("k", &i.to_string())).collect())
            .await
            .unwrap();

        let batch = log
            .get_records("c", &ShardPosition::horizon("shard-000000"), 2)
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn closed_shards_take_no_writes() {
        let log = InMemoryShardedLog::new();
        log.create_channel("c", 1).await;
        log.close_shard("c", "shard-000000").await.unwrap();

        let result = log.put_records("c", vec![entry("a", "1")]).await.unwrap();
        assert_eq!(result.failed_indices(), vec![0]);

        let page = log.describe_shards("c", None).await.unwrap();
        assert!(!page.shards[0].is_open);
    }

    #[tokio::test]
    async fn injected_fetch_failures_are_transient() {
        let log = InMemoryShardedLog::new();
        log.create_channel("c", 1).await;
        log.fail_next_fetches(1);

        let position = ShardPosition::horizon("shard-000000");
        let err = log.get_records("c", &position, 10).await.unwrap_err();
        assert!(err.is_transient());
        assert!(log.get_records("c", &position, 10).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_channel_is_config_error() {
        let log = InMemoryShardedLog::new();
        let result = log.describe_shards("missing", None).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
