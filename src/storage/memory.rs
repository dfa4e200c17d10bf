//! In-memory storage backend.
//!
//! Buckets and objects are held in `tokio::sync::RwLock` maps.  Nothing is
//! persisted; the backend exists for tests and local experiments where a
//! real bucket is not available.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};

use super::backend::{ObjectAttrs, ObjectStore, ObjectStream, StorageError, StoreFuture};

/// A stored object: raw bytes plus an optional content type.
#[derive(Debug, Clone)]
struct MemoryObject {
    data: Bytes,
    content_type: Option<String>,
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    /// Known bucket names.
    buckets: tokio::sync::RwLock<HashSet<String>>,
    /// Object store: (bucket, key) -> object.
    objects: tokio::sync::RwLock<HashMap<(String, String), MemoryObject>>,
}

impl MemoryBackend {
    /// Create an empty backend with no buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `bucket` if it does not exist yet.
    pub async fn create_bucket(&self, bucket: &str) {
        self.buckets.write().await.insert(bucket.to_string());
    }

    /// Store `data` under `bucket/key`, creating the bucket if needed.
    pub async fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) {
        self.insert_with_type(bucket, key, data, None).await;
    }

    /// Store `data` under `bucket/key` with an explicit content type.
    pub async fn insert_with_type(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        content_type: Option<&str>,
    ) {
        self.create_bucket(bucket).await;
        self.objects.write().await.insert(
            (bucket.to_string(), key.to_string()),
            MemoryObject {
                data: data.into(),
                content_type: content_type.map(str::to_string),
            },
        );
    }

    async fn lookup(&self, bucket: &str, key: &str) -> Result<MemoryObject, StorageError> {
        if !self.buckets.read().await.contains(bucket) {
            return Err(StorageError::BucketNotExist);
        }
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or(StorageError::ObjectNotExist)
    }
}

fn single_chunk(data: Bytes) -> ObjectStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

impl ObjectStore for MemoryBackend {
    fn stat<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectAttrs> {
        Box::pin(async move {
            let obj = self.lookup(bucket, key).await?;
            Ok(ObjectAttrs {
                size: obj.data.len() as u64,
                content_type: obj.content_type,
            })
        })
    }

    fn read<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectStream> {
        Box::pin(async move {
            let obj = self.lookup(bucket, key).await?;
            Ok(single_chunk(obj.data))
        })
    }

    fn read_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'a, ObjectStream> {
        Box::pin(async move {
            let obj = self.lookup(bucket, key).await?;
            let len = obj.data.len() as u64;
            if start > end || end >= len {
                return Err(StorageError::Other(anyhow::anyhow!(
                    "range {start}-{end} out of bounds for object of {len} bytes"
                )));
            }
            Ok(single_chunk(obj.data.slice(start as usize..=end as usize)))
        })
    }
}
