//! Blob storage for snapshot files.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayload};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::Result;

/// Object storage collaborator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn create_bucket_if_missing(&self, bucket: &str) -> Result<()>;

    /// Names of the objects in `bucket` starting with `prefix`, sorted.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Upload a local file, in parts once it is large enough.
    async fn upload(&self, bucket: &str, name: &str, file: &Path) -> Result<()>;

    async fn download(&self, bucket: &str, name: &str, destination: &Path) -> Result<()>;

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()>;

    /// Delete every object starting with `prefix`. Returns how many were
    /// deleted.
    async fn delete_objects_with_prefix(&self, bucket: &str, prefix: &str) -> Result<usize>;
}

/// [`BlobStore`] over any `object_store` backend. Buckets map to the first
/// path segment.
pub struct ObjectBlobStore {
    store: Arc<dyn ObjectStore>,
    multipart_threshold: u64,
    part_size: usize,
}

impl ObjectBlobStore {
    pub fn new(store: Arc<dyn ObjectStore>, multipart_threshold: u64, part_size: usize) -> Self {
        Self {
            store,
            multipart_threshold,
            part_size: part_size.max(1),
        }
    }

    fn path(bucket: &str, name: &str) -> ObjectPath {
        ObjectPath::from(format!("{bucket}/{name}"))
    }

    async fn upload_in_parts(&self, path: &ObjectPath, file: &Path) -> Result<usize> {
        let mut source = tokio::fs::File::open(file).await?;
        let mut upload = self.store.put_multipart(path).await?;
        let mut parts = 0;
        loop {
            let mut buffer = Vec::with_capacity(self.part_size);
            let read = (&mut source)
                .take(self.part_size as u64)
                .read_to_end(&mut buffer)
                .await;
            let read = match read {
                Ok(read) => read,
                Err(e) => {
                    abort(&mut upload, path).await;
                    return Err(e.into());
                }
            };
            if read == 0 {
                break;
            }
            if let Err(e) = upload.put_part(PutPayload::from(Bytes::from(buffer))).await {
                abort(&mut upload, path).await;
                return Err(e.into());
            }
            parts += 1;
        }
        upload.complete().await?;
        Ok(parts)
    }
}

async fn abort(upload: &mut Box<dyn MultipartUpload>, path: &ObjectPath) {
    if let Err(e) = upload.abort().await {
        warn!(path = %path, error = %e, "Failed to abort multipart upload");
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn create_bucket_if_missing(&self, bucket: &str) -> Result<()> {
        // Buckets are path prefixes and exist implicitly.
        debug!(bucket, "Using bucket");
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let bucket_path = ObjectPath::from(bucket);
        let objects: Vec<_> = self.store.list(Some(&bucket_path)).try_collect().await?;
        let mut names: Vec<String> = objects
            .into_iter()
            .filter_map(|meta| meta.location.filename().map(str::to_string))
            .filter(|name| name.starts_with(prefix))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn upload(&self, bucket: &str, name: &str, file: &Path) -> Result<()> {
        let path = Self::path(bucket, name);
        let size = tokio::fs::metadata(file).await?.len();
        if size >= self.multipart_threshold {
            let parts = self.upload_in_parts(&path, file).await?;
            debug!(path = %path, size, parts, "Uploaded in parts");
        } else {
            let data = tokio::fs::read(file).await?;
            self.store.put(&path, PutPayload::from(Bytes::from(data))).await?;
            debug!(path = %path, size, "Uploaded");
        }
        Ok(())
    }

    async fn download(&self, bucket: &str, name: &str, destination: &Path) -> Result<()> {
        let path = Self::path(bucket, name);
        let mut stream = self.store.get(&path).await?.into_stream();
        let mut out = tokio::fs::File::create(destination).await?;
        while let Some(chunk) = stream.next().await {
            out.write_all(&chunk?).await?;
        }
        out.flush().await?;
        debug!(path = %path, destination = %destination.display(), "Downloaded");
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<()> {
        self.store.delete(&Self::path(bucket, name)).await?;
        Ok(())
    }

    async fn delete_objects_with_prefix(&self, bucket: &str, prefix: &str) -> Result<usize> {
        let names = self.list_objects(bucket, prefix).await?;
        for name in &names {
            self.delete_object(bucket, name).await?;
        }
        Ok(names.len())
    }
}
