//! Compacting an in-memory sharded log into snapshots on an in-memory store.
//!
//! These tests exercise the full compaction cycle:
//! - First compaction from an empty store
//! - Incremental compaction resuming from the previous snapshot positions
//! - Tombstones removing keys from the next snapshot
//! - Retention keeping exactly one snapshot per channel

use std::sync::Arc;

use object_store::memory::InMemory;
use snaplog_core::{
    ChannelPosition, EventSource, MessageSender, NotificationBus, SourceStatus, StateRepository,
    StopCondition, TextMessage, repository_consumer,
};
use snaplog_log::{
    BatchingPublisher, InMemoryShardedLog, LogEventSourceBuilder, PublisherConfig,
};
use snaplog_snapshot::{
    BlobStore, CollectedSnapshot, CompactionService, ObjectBlobStore, SnapshotConfig,
    SnapshotEventSource, snapshot_timestamp,
};
use tempfile::TempDir;

const CHANNEL: &str = "products";
const SHARDS: usize = 3;

struct Harness {
    dir: TempDir,
    log: Arc<InMemoryShardedLog>,
    store: Arc<ObjectBlobStore>,
    publisher: BatchingPublisher,
    service: CompactionService,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(InMemoryShardedLog::new());
    log.create_channel(CHANNEL, SHARDS).await;
    let publisher =
        BatchingPublisher::new(CHANNEL, log.clone(), PublisherConfig::default()).unwrap();
    let store = Arc::new(ObjectBlobStore::new(Arc::new(InMemory::new()), 1 << 30, 1 << 20));
    let service = CompactionService::new(
        store.clone(),
        SnapshotConfig::default().with_temp_dir(dir.path()),
        Arc::new(LogEventSourceBuilder::new(log.clone())),
    );
    Harness {
        dir,
        log,
        store,
        publisher,
        service,
    }
}

impl Harness {
    async fn publish(&self, entries: &[(&str, Option<&str>)]) {
        let messages = entries
            .iter()
            .map(|(key, payload)| match payload {
                Some(payload) => TextMessage::of(*key, payload.to_string()),
                None => TextMessage::tombstone(*key),
            })
            .collect();
        self.publisher.send_batch(messages).await.unwrap();
    }

    async fn compact(&self) -> (String, CollectedSnapshot) {
        let name = self.service.compact(CHANNEL).await.unwrap();
        let snapshot = self.service.reader().read(&name).await.unwrap();
        (name, snapshot)
    }

    async fn snapshot_names(&self) -> Vec<String> {
        self.store
            .list_objects("snaplog-snapshots", "compaction-products-")
            .await
            .unwrap()
    }

    /// The newest token of every shard, horizon for empty shards.
    async fn tips(&self) -> ChannelPosition {
        let mut tips = ChannelPosition::empty();
        for shard in 0..SHARDS {
            let shard_id = format!("shard-{shard:06}");
            let records = self.log.records(CHANNEL, &shard_id).await.unwrap();
            let position = match records.last() {
                Some(last) => snaplog_core::ShardPosition::at(&shard_id, &last.sequence_number),
                None => snaplog_core::ShardPosition::horizon(&shard_id),
            };
            tips = tips.with(position);
        }
        tips
    }
}

fn payload_of<'a>(snapshot: &'a CollectedSnapshot, key: &str) -> Option<&'a str> {
    snapshot
        .entries
        .iter()
        .find(|(k, _)| k == key)
        .and_then(|(_, payload)| payload.as_deref())
}

fn initial_entries() -> Vec<(String, String)> {
    (0..10)
        .map(|i| (format!("key-{i}"), format!("value-{i}-v1")))
        .collect()
}

async fn publish_initial(harness: &Harness) {
    let entries = initial_entries();
    let borrowed: Vec<(&str, Option<&str>)> = entries
        .iter()
        .map(|(k, v)| (k.as_str(), Some(v.as_str())))
        .collect();
    harness.publish(&borrowed).await;
}

#[tokio::test]
async fn first_compaction_captures_every_key_and_shard_tip() {
    let harness = harness().await;
    publish_initial(&harness).await;

    let (name, snapshot) = harness.compact().await;

    assert!(snapshot_timestamp(CHANNEL, &name).is_some());
    assert_eq!(snapshot.entries.len(), 10);
    for (key, value) in initial_entries() {
        assert_eq!(payload_of(&snapshot, &key), Some(value.as_str()));
    }
    let tips = harness.tips().await;
    for shard in tips.positions() {
        assert_eq!(&snapshot.positions.shard(shard.shard_id()), shard);
    }
}

#[tokio::test]
async fn second_compaction_resumes_and_keeps_newest_payloads() {
    let harness = harness().await;
    publish_initial(&harness).await;
    let (first, _) = harness.compact().await;

    harness
        .publish(&[
            ("key-10", Some("value-10-v1")),
            ("key-11", Some("value-11-v1")),
            ("key-12", Some("value-12-v1")),
            ("key-2", Some("value-2-v2")),
            ("key-7", Some("value-7-v2")),
        ])
        .await;
    let (second, snapshot) = harness.compact().await;

    assert_ne!(first, second);
    assert_eq!(snapshot.entries.len(), 13);
    assert_eq!(payload_of(&snapshot, "key-2"), Some("value-2-v2"));
    assert_eq!(payload_of(&snapshot, "key-7"), Some("value-7-v2"));
    assert_eq!(payload_of(&snapshot, "key-0"), Some("value-0-v1"));
    assert_eq!(payload_of(&snapshot, "key-12"), Some("value-12-v1"));
    assert_eq!(snapshot.positions, harness.tips().await);
}

#[tokio::test]
async fn tombstone_removes_key_from_next_snapshot() {
    let harness = harness().await;
    publish_initial(&harness).await;
    harness.compact().await;

    harness.publish(&[("key-4", None)]).await;
    let (_, snapshot) = harness.compact().await;

    assert_eq!(snapshot.entries.len(), 9);
    assert!(snapshot.entries.iter().all(|(k, _)| k != "key-4"));
}

#[tokio::test]
async fn only_the_newest_snapshot_is_retained() {
    let harness = harness().await;
    publish_initial(&harness).await;

    let (first, _) = harness.compact().await;
    assert_eq!(harness.snapshot_names().await, vec![first]);

    harness.publish(&[("key-1", Some("value-1-v2"))]).await;
    let (second, _) = harness.compact().await;
    assert_eq!(harness.snapshot_names().await, vec![second]);
}

#[tokio::test]
async fn empty_channel_compacts_to_an_empty_snapshot() {
    let harness = harness().await;
    let bus = NotificationBus::default();
    let mut rx = bus.subscribe();
    let service = CompactionService::new(
        harness.store.clone(),
        SnapshotConfig::default().with_temp_dir(harness.dir.path()),
        Arc::new(LogEventSourceBuilder::new(harness.log.clone())),
    )
    .with_notifications(bus);

    let name = service.compact(CHANNEL).await.unwrap();
    let snapshot = service.reader().read(&name).await.unwrap();

    assert!(snapshot.entries.is_empty());
    assert!(snapshot.positions.positions().all(|p| p.is_horizon()));
    let mut statuses = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        statuses.push(notification.status);
    }
    assert_eq!(statuses.first(), Some(&SourceStatus::Starting));
    assert_eq!(statuses.last(), Some(&SourceStatus::Finished));
    assert!(!statuses.contains(&SourceStatus::Failed));
}

#[tokio::test]
async fn snapshot_source_replays_compacted_state() {
    let harness = harness().await;
    publish_initial(&harness).await;
    harness.publish(&[("key-9", None)]).await;
    harness.compact().await;

    let source = SnapshotEventSource::new(CHANNEL, harness.service.reader().clone());
    let repository = Arc::new(StateRepository::new());
    source.register(repository_consumer(repository.clone(), "key-.*").unwrap());
    let end = source
        .consume_all(ChannelPosition::empty(), StopCondition::never())
        .await
        .unwrap();

    assert_eq!(repository.len(), 9);
    assert_eq!(repository.get("key-3"), Some("value-3-v1".to_string()));
    assert_eq!(end, harness.tips().await);
}
