//! Shard-partitioned log and queue channels for snaplog.
//!
//! This crate provides:
//! - [`ShardedLog`] / [`QueueService`] - the backend collaborator interfaces
//! - [`InMemoryShardedLog`] / [`InMemoryQueueService`] - in-memory backends
//! - [`LogEventSource`] - one tokio task per shard, dispatching to consumers
//! - [`BatchingPublisher`] - chunked puts with selective retry of rejected entries
//! - [`QueueEventSource`] / [`QueueSender`] - the point-to-point channel kind

pub mod config;
pub mod envelope;
pub mod memory;
pub mod publisher;
pub mod queue;
pub mod source;
pub mod traits;

pub use config::{ConsumerConfig, MAX_BYTES_PER_PUT, MAX_ENTRIES_PER_PUT, PublisherConfig, QueueConfig};
pub use memory::InMemoryShardedLog;
pub use publisher::{BatchingPublisher, pack_chunks};
pub use queue::{InMemoryQueueService, KEY_ATTRIBUTE, QueueEventSource, QueueSender};
pub use snaplog_core::{Error, Result};
pub use source::{LogEventSource, LogEventSourceBuilder};
pub use traits::{
    LogRecord, PutBatchResult, PutEntry, PutOutcome, QueueMessage, QueueService, RecordBatch,
    ShardDescription, ShardPage, ShardedLog, list_shards,
};
