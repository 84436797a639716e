//! Reading snapshots from the blob store.

use std::sync::Arc;

use snaplog_core::{ChannelPosition, StateRepository};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::SnapshotConfig;
use crate::error::Result;
use crate::format::{CollectedSnapshot, SnapshotHandler, read_archive};
use crate::naming::{latest_snapshot_name, snapshot_prefix};
use crate::store::BlobStore;

/// Locates, downloads and parses snapshots.
pub struct SnapshotReader {
    store: Arc<dyn BlobStore>,
    config: SnapshotConfig,
}

impl SnapshotReader {
    pub fn new(store: Arc<dyn BlobStore>, config: SnapshotConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// All snapshot names of `channel`, oldest first.
    pub async fn snapshot_names(&self, channel: &str) -> Result<Vec<String>> {
        let names = self
            .store
            .list_objects(&self.config.bucket, &snapshot_prefix(channel))
            .await?;
        Ok(names
            .into_iter()
            .filter(|n| crate::naming::is_snapshot_of(channel, n))
            .collect())
    }

    /// The newest snapshot of `channel`, if any.
    pub async fn latest_snapshot_name(&self, channel: &str) -> Result<Option<String>> {
        let names = self.snapshot_names(channel).await?;
        Ok(latest_snapshot_name(channel, names))
    }

    /// Download `name` and feed it to `handler` in document order.
    ///
    /// The local copy is removed once parsing ends, whatever the outcome.
    pub async fn read_with<H>(&self, name: &str, mut handler: H) -> Result<H>
    where
        H: SnapshotHandler + Send + 'static,
    {
        let local = self.download(name).await?;
        tokio::task::spawn_blocking(move || -> Result<H> {
            let file = local.reopen()?;
            read_archive(file, &mut handler)?;
            Ok(handler)
        })
        .await?
    }

    /// Apply snapshot `name` to `repository` and return its positions.
    ///
    /// Entries are applied in order: payloads are put, tombstones remove.
    pub async fn read_into(
        &self,
        name: &str,
        repository: Arc<StateRepository<String>>,
    ) -> Result<ChannelPosition> {
        let applied = self
            .read_with(
                name,
                RepositoryHandler {
                    repository,
                    positions: ChannelPosition::empty(),
                    entries: 0,
                },
            )
            .await?;
        info!(name, entries = applied.entries, "Snapshot loaded");
        Ok(applied.positions)
    }

    /// Stream the entries of snapshot `name` to `sink` without building a
    /// repository. Returns the snapshot positions.
    pub async fn export_entries<F>(&self, name: &str, sink: F) -> Result<ChannelPosition>
    where
        F: FnMut(String, Option<String>) -> Result<()> + Send + 'static,
    {
        let exported = self
            .read_with(
                name,
                ExportHandler {
                    sink,
                    positions: ChannelPosition::empty(),
                },
            )
            .await?;
        Ok(exported.positions)
    }

    /// Read snapshot `name` fully into memory.
    pub async fn read(&self, name: &str) -> Result<CollectedSnapshot> {
        self.read_with(name, CollectedSnapshot::default()).await
    }

    async fn download(&self, name: &str) -> Result<NamedTempFile> {
        let dir = self.config.resolved_temp_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let local = tempfile::Builder::new()
            .prefix("snaplog-")
            .suffix(".json.zip")
            .tempfile_in(&dir)?;
        self.store
            .download(&self.config.bucket, name, local.path())
            .await?;
        debug!(name, path = %local.path().display(), "Snapshot downloaded");
        Ok(local)
    }
}

struct RepositoryHandler {
    repository: Arc<StateRepository<String>>,
    positions: ChannelPosition,
    entries: usize,
}

impl SnapshotHandler for RepositoryHandler {
    fn on_positions(&mut self, positions: ChannelPosition) -> Result<()> {
        self.positions = positions;
        Ok(())
    }

    fn on_entry(&mut self, key: String, payload: Option<String>) -> Result<()> {
        match payload {
            Some(payload) => {
                self.repository.put(key, payload);
            }
            None => {
                self.repository.remove(&key);
            }
        }
        self.entries += 1;
        Ok(())
    }
}

struct ExportHandler<F> {
    sink: F,
    positions: ChannelPosition,
}

impl<F> SnapshotHandler for ExportHandler<F>
where
    F: FnMut(String, Option<String>) -> Result<()>,
{
    fn on_positions(&mut self, positions: ChannelPosition) -> Result<()> {
        self.positions = positions;
        Ok(())
    }

    fn on_entry(&mut self, key: String, payload: Option<String>) -> Result<()> {
        (self.sink)(key, payload)
    }
}
