//! Writing snapshots to the blob store.

use std::sync::Arc;

use chrono::Utc;
use snaplog_core::{ChannelPosition, StateRepository};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::config::SnapshotConfig;
use crate::error::Result;
use crate::format::write_archive;
use crate::naming::snapshot_name;
use crate::store::BlobStore;

/// Drains a repository and positions into a snapshot object.
pub struct SnapshotWriter {
    store: Arc<dyn BlobStore>,
    config: SnapshotConfig,
}

impl SnapshotWriter {
    pub fn new(store: Arc<dyn BlobStore>, config: SnapshotConfig) -> Self {
        Self { store, config }
    }

    /// Write a snapshot of `repository` at `positions` and return its name.
    ///
    /// The archive is generated into a local temp file before anything is
    /// sent, and the temp file is removed on every exit path. The name is
    /// only returned once the upload succeeded.
    pub async fn write_snapshot(
        &self,
        channel: &str,
        positions: &ChannelPosition,
        repository: &StateRepository<String>,
    ) -> Result<String> {
        let name = snapshot_name(channel, Utc::now());
        let entries: Vec<(String, Option<String>)> = repository
            .entries()
            .into_iter()
            .map(|(key, payload)| (key, Some(payload)))
            .collect();
        let count = entries.len();

        let temp = self.generate(&name, positions.clone(), entries).await?;
        let size = temp.as_file().metadata()?.len();
        debug!(channel, name = %name, count, size, "Snapshot generated");

        self.store.create_bucket_if_missing(&self.config.bucket).await?;
        self.store
            .upload(&self.config.bucket, &name, temp.path())
            .await?;

        info!(channel, name = %name, count, size, "Snapshot written");
        Ok(name)
    }

    async fn generate(
        &self,
        name: &str,
        positions: ChannelPosition,
        entries: Vec<(String, Option<String>)>,
    ) -> Result<NamedTempFile> {
        let dir = self.config.resolved_temp_dir();
        let entry_name = name.trim_end_matches(".zip").to_string();
        tokio::task::spawn_blocking(move || -> Result<NamedTempFile> {
            std::fs::create_dir_all(&dir)?;
            let mut temp = tempfile::Builder::new()
                .prefix("snaplog-")
                .suffix(".json.zip")
                .tempfile_in(&dir)?;
            write_archive(temp.as_file_mut(), &entry_name, &positions, entries)?;
            temp.as_file().sync_all()?;
            Ok(temp)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SnapshotError;
    use crate::store::ObjectBlobStore;
    use async_trait::async_trait;
    use object_store::memory::InMemory;
    use std::path::Path;

    /// Fails every upload.
    struct BrokenStore;

    #[async_trait]
    impl BlobStore for BrokenStore {
        async fn create_bucket_if_missing(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn list_objects(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn upload(&self, _: &str, _: &str, _: &Path) -> Result<()> {
            Err(SnapshotError::Io(std::io::Error::other("connection refused")))
        }
        async fn download(&self, _: &str, _: &str, _: &Path) -> Result<()> {
            Ok(())
        }
        async fn delete_object(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn delete_objects_with_prefix(&self, _: &str, _: &str) -> Result<usize> {
            Ok(0)
        }
    }

    fn temp_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).map_or(0, |entries| entries.count())
    }

    #[tokio::test]
    async fn uploads_snapshot_and_cleans_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ObjectBlobStore::new(Arc::new(InMemory::new()), 1 << 30, 1 << 20));
        let writer = SnapshotWriter::new(
            store.clone(),
            SnapshotConfig::default().with_temp_dir(dir.path()),
        );
        let repository = StateRepository::new();
        repository.put("a", "1".to_string());

        let name = writer
            .write_snapshot("products", &ChannelPosition::empty(), &repository)
            .await
            .unwrap();

        assert!(name.starts_with("compaction-products-snapshot-"));
        let listed = store.list_objects("snaplog-snapshots", "").await.unwrap();
        assert_eq!(listed, vec![name]);
        assert_eq!(temp_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn failed_upload_still_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(
            Arc::new(BrokenStore),
            SnapshotConfig::default().with_temp_dir(dir.path()),
        );

        let result = writer
            .write_snapshot("products", &ChannelPosition::empty(), &StateRepository::new())
            .await;

        assert!(matches!(result, Err(SnapshotError::Io(_))));
        assert_eq!(temp_files(dir.path()), 0);
    }
}
