//! Batching, retrying publisher for shard-partitioned logs.
//!
//! Outgoing messages are encoded and packed greedily into chunks bounded by
//! entry count and aggregate bytes. Chunks are sent one after another. When
//! the backend rejects some entries of a chunk, only those entries are sent
//! again, unchanged and in their original order.

use std::sync::Arc;

use async_trait::async_trait;
use snaplog_core::{Error, InterceptorChain, MessageSender, Result, TextMessage};
use tracing::{debug, error, trace, warn};

use crate::config::PublisherConfig;
use crate::envelope;
use crate::traits::{PutEntry, PutOutcome, ShardedLog};

/// Pack entries into chunks of at most `max_entries` entries and
/// `max_bytes` aggregate bytes, preserving order.
///
/// A chunk is closed as soon as the next entry would exceed either cap. An
/// entry larger than `max_bytes` on its own can never be sent and is an
/// error.
pub fn pack_chunks(
    entries: Vec<PutEntry>,
    max_entries: usize,
    max_bytes: usize,
) -> Result<Vec<Vec<PutEntry>>> {
    let mut chunks = Vec::new();
    let mut current: Vec<PutEntry> = Vec::new();
    let mut current_bytes = 0;

    for entry in entries {
        let size = entry.size_bytes();
        if size > max_bytes {
            return Err(Error::Config(format!(
                "Entry for partition key '{}' is {size} bytes, above the {max_bytes} byte chunk cap",
                entry.partition_key
            )));
        }
        if !current.is_empty()
            && (current.len() >= max_entries || current_bytes + size > max_bytes)
        {
            chunks.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(entry);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

/// [`MessageSender`] writing to one channel of a [`ShardedLog`].
pub struct BatchingPublisher {
    channel: String,
    log: Arc<dyn ShardedLog>,
    config: PublisherConfig,
    interceptors: InterceptorChain,
}

impl BatchingPublisher {
    /// Create a publisher. Fails if the config exceeds the backend caps.
    pub fn new(
        channel: impl Into<String>,
        log: Arc<dyn ShardedLog>,
        config: PublisherConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            channel: channel.into(),
            log,
            config,
            interceptors: InterceptorChain::empty(),
        })
    }

    /// Interceptors applied to every outgoing message before encoding.
    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Send one chunk, resending failed entries until none remain or the
    /// retry limit is reached.
    async fn send_chunk(&self, chunk: Vec<PutEntry>) -> Result<()> {
        let mut pending = chunk;
        let mut attempt: u32 = 0;
        loop {
            let failure = match self.log.put_records(&self.channel, pending.clone()).await {
                Ok(result) if result.outcomes.len() != pending.len() => format!(
                    "backend answered {} outcomes for {} entries",
                    result.outcomes.len(),
                    pending.len()
                ),
                Ok(result) => {
                    let failed = result.failed_indices();
                    if failed.is_empty() {
                        trace!(channel = %self.channel, count = pending.len(), "Chunk written");
                        return Ok(());
                    }
                    let first_code = result.outcomes.iter().find_map(|o| match o {
                        PutOutcome::Failed { error_code, .. } => error_code.clone(),
                        PutOutcome::Written { .. } => None,
                    });
                    let message = format!(
                        "{} of {} entries rejected (first error code: {})",
                        failed.len(),
                        pending.len(),
                        first_code.as_deref().unwrap_or("none")
                    );
                    pending = failed
                        .into_iter()
                        .filter_map(|i| pending.get(i).cloned())
                        .collect();
                    message
                }
                Err(e) if e.is_transient() => e.to_string(),
                Err(e) => return Err(e),
            };

            if attempt >= self.config.max_retries {
                error!(
                    channel = %self.channel,
                    attempt,
                    remaining = pending.len(),
                    error = %failure,
                    "Publish retries exhausted"
                );
                return Err(Error::RetryLimitExceeded {
                    limit: self.config.max_retries,
                    message: failure,
                });
            }
            attempt += 1;
            if attempt == 1 {
                debug!(channel = %self.channel, attempt, remaining = pending.len(), error = %failure, "Retrying publish");
            } else {
                warn!(channel = %self.channel, attempt, remaining = pending.len(), error = %failure, "Retrying publish");
            }
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

#[async_trait]
impl MessageSender for BatchingPublisher {
    fn channel_name(&self) -> &str {
        &self.channel
    }

    async fn send_batch(&self, messages: Vec<TextMessage>) -> Result<()> {
        let entries = messages
            .into_iter()
            .filter_map(|m| self.interceptors.intercept(m))
            .map(|m| envelope::encode(&m))
            .collect::<Result<Vec<_>>>()?;
        if entries.is_empty() {
            return Ok(());
        }

        let chunks = pack_chunks(entries, self.config.max_entries, self.config.max_bytes)?;
        debug!(channel = %self.channel, chunks = chunks.len(), "Publishing batch");
        for chunk in chunks {
            self.send_chunk(chunk).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{PutBatchResult, RecordBatch, ShardPage};
    use bytes::Bytes;
    use snaplog_core::ShardPosition;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Response to one `put_records` call.
    enum Reply {
        Accept,
        Reject(Vec<usize>),
        Unavailable,
    }

    /// Answers puts from a script and records every request.
    #[derive(Default)]
    struct ScriptedLog {
        replies: Mutex<VecDeque<Reply>>,
        requests: Mutex<Vec<Vec<PutEntry>>>,
    }

    impl ScriptedLog {
        fn with_replies(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<Vec<PutEntry>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ShardedLog for ScriptedLog {
        async fn describe_shards(&self, _: &str, _: Option<String>) -> Result<ShardPage> {
            Ok(ShardPage::default())
        }

        async fn get_records(&self, _: &str, _: &ShardPosition, _: usize) -> Result<RecordBatch> {
            Ok(RecordBatch::default())
        }

        async fn put_records(&self, _: &str, entries: Vec<PutEntry>) -> Result<PutBatchResult> {
            let reply = self.replies.lock().unwrap().pop_front().unwrap_or(Reply::Accept);
            let count = entries.len();
            self.requests.lock().unwrap().push(entries);
            let written = |i: usize| PutOutcome::Written {
                shard_id: "shard-000000".to_string(),
                sequence_number: i.to_string(),
            };
            match reply {
                Reply::Accept => Ok(PutBatchResult {
                    outcomes: (0..count).map(written).collect(),
                }),
                Reply::Reject(indices) => Ok(PutBatchResult {
                    outcomes: (0..count)
                        .map(|i| {
                            if indices.contains(&i) {
                                PutOutcome::Failed {
                                    error_code: Some("ProvisionedThroughputExceeded".to_string()),
                                    message: "slow down".to_string(),
                                }
                            } else {
                                written(i)
                            }
                        })
                        .collect(),
                }),
                Reply::Unavailable => Err(Error::backend("connection reset")),
            }
        }
    }

    fn entry(key: &str, bytes: usize) -> PutEntry {
        PutEntry {
            partition_key: key.to_string(),
            data: Bytes::from(vec![b'x'; bytes]),
        }
    }

    fn messages(count: usize) -> Vec<TextMessage> {
        (0..count)
            .map(|i| TextMessage::of(format!("key-{i}"), format!("{i}")))
            .collect()
    }

    fn config() -> PublisherConfig {
        PublisherConfig::default()
            .with_max_retries(3)
            .with_retry_delay(Duration::from_millis(1))
    }

    #[test]
    fn count_cap_bounds_chunks() {
        let entries: Vec<_> = (0..1200).map(|i| entry(&i.to_string(), 10)).collect();
        let chunks = pack_chunks(entries.clone(), 500, usize::MAX).unwrap();

        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![500, 500, 200]);
        assert_eq!(chunks.concat(), entries);
    }

    #[test]
    fn byte_cap_closes_chunks_early() {
        // key "k" (1 byte) + 99 bytes of data = 100 bytes per entry
        let entries: Vec<_> = (0..10).map(|_| entry("k", 99)).collect();
        let chunks = pack_chunks(entries.clone(), 500, 250).unwrap();

        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 2, 2, 2]);
        assert_eq!(chunks.concat(), entries);
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let result = pack_chunks(vec![entry("k", 1000)], 500, 100);
        assert!(result.is_err());
    }

    #[test]
    fn empty_input_has_no_chunks() {
        assert!(pack_chunks(Vec::new(), 500, 100).unwrap().is_empty());
    }

    #[test]
    fn config_above_backend_caps_is_rejected() {
        let log = ScriptedLog::with_replies(vec![]);
        let result = BatchingPublisher::new("c", log, PublisherConfig::default().with_max_entries(600));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn only_failed_entries_are_resent_in_order() {
        let log = ScriptedLog::with_replies(vec![Reply::Reject(vec![2, 5])]);
        let publisher = BatchingPublisher::new("c", log.clone(), config()).unwrap();

        publisher.send_batch(messages(8)).await.unwrap();

        let requests = log.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], vec![requests[0][2].clone(), requests[0][5].clone()]);
    }

    #[tokio::test]
    async fn transport_errors_resend_the_whole_chunk() {
        let log = ScriptedLog::with_replies(vec![Reply::Unavailable]);
        let publisher = BatchingPublisher::new("c", log.clone(), config()).unwrap();

        publisher.send_batch(messages(4)).await.unwrap();

        let requests = log.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
    }

    #[tokio::test]
    async fn exhausted_retries_report_the_configured_limit() {
        let log = ScriptedLog::with_replies(vec![
            Reply::Reject(vec![0]),
            Reply::Reject(vec![0]),
            Reply::Reject(vec![0]),
            Reply::Reject(vec![0]),
        ]);
        let publisher = BatchingPublisher::new("c", log.clone(), config()).unwrap();

        let result = publisher.send_batch(messages(2)).await;

        assert!(matches!(
            result,
            Err(Error::RetryLimitExceeded { limit: 3, .. })
        ));
        assert_eq!(log.requests().len(), 4);
    }

    #[tokio::test]
    async fn chunks_are_sent_sequentially_in_order() {
        let log = ScriptedLog::with_replies(vec![]);
        let publisher =
            BatchingPublisher::new("c", log.clone(), config().with_max_entries(3)).unwrap();

        publisher.send_batch(messages(7)).await.unwrap();

        let requests = log.requests();
        let sizes: Vec<_> = requests.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let keys: Vec<_> = requests
            .concat()
            .into_iter()
            .map(|e| e.partition_key)
            .collect();
        let expected: Vec<_> = (0..7).map(|i| format!("key-{i}")).collect();
        assert_eq!(keys, expected);
    }

    #[tokio::test]
    async fn send_interceptors_can_drop_messages() {
        let log = ScriptedLog::with_replies(vec![]);
        let drop_odd: Arc<dyn snaplog_core::Interceptor> =
            Arc::new(|m: TextMessage| -> Option<TextMessage> {
                let n: usize = m.payload()?.parse().ok()?;
                (n % 2 == 0).then_some(m)
            });
        let publisher = BatchingPublisher::new("c", log.clone(), config())
            .unwrap()
            .with_interceptors(InterceptorChain::of(vec![drop_odd]));

        publisher.send_batch(messages(4)).await.unwrap();

        let keys: Vec<_> = log.requests()[0]
            .iter()
            .map(|e| e.partition_key.clone())
            .collect();
        assert_eq!(keys, vec!["key-0", "key-2"]);
    }

    #[tokio::test]
    async fn single_send_goes_through_batch_path() {
        let log = ScriptedLog::with_replies(vec![]);
        let publisher = BatchingPublisher::new("c", log.clone(), config()).unwrap();

        publisher
            .send(TextMessage::tombstone("gone"))
            .await
            .unwrap();

        let sent = &log.requests()[0][0];
        assert_eq!(sent.partition_key, "gone");
    }
}
