//! Local filesystem storage backend.
//!
//! Buckets are directories directly under a configurable root and objects
//! are files below them, so `bucket/key` maps to `{root}/{bucket}/{key}`.
//! Useful for serving a directory tree with the same routing rules as a
//! real bucket.

use bytes::Bytes;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::backend::{ObjectAttrs, ObjectStore, ObjectStream, StorageError, StoreFuture};

/// Read buffer size for streamed file bodies.
const CHUNK_SIZE: usize = 64 * 1024;

/// Serves objects from the local filesystem.
#[derive(Debug)]
pub struct LocalBackend {
    /// Root directory; each child directory is a bucket.
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The root must already exist; this backend never writes.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            anyhow::bail!("local storage root {} is not a directory", root.display());
        }
        Ok(Self { root })
    }

    /// Resolve a bucket directory, rejecting names that are not a single
    /// plain path component.
    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(bucket).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(bucket)),
            _ => Err(StorageError::BucketNotExist),
        }
    }

    /// Resolve `bucket/key` to a file path inside the root.
    ///
    /// Keys containing `..`, absolute components or prefixes are treated as
    /// missing objects so nothing outside the bucket directory is reachable.
    async fn resolve(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(StorageError::BucketNotExist);
        }
        if key.is_empty()
            || Path::new(key)
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StorageError::ObjectNotExist);
        }
        Ok(dir.join(key))
    }

    async fn open(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(tokio::fs::File, u64), StorageError> {
        let path = self.resolve(bucket, key).await?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::ObjectNotExist)
            }
            Err(e) => return Err(anyhow::Error::from(e).into()),
        };
        let meta = file.metadata().await.map_err(anyhow::Error::from)?;
        if !meta.is_file() {
            return Err(StorageError::ObjectNotExist);
        }
        Ok((file, meta.len()))
    }
}

/// Stream at most `remaining` bytes from `file` in [`CHUNK_SIZE`] chunks.
fn file_stream(file: tokio::fs::File, remaining: u64) -> ObjectStream {
    Box::pin(futures::stream::try_unfold(
        (file, remaining),
        |(mut file, remaining)| async move {
            if remaining == 0 {
                return Ok(None);
            }
            let want = remaining.min(CHUNK_SIZE as u64) as usize;
            let mut buf = vec![0u8; want];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "object truncated while reading",
                ));
            }
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), (file, remaining - n as u64))))
        },
    ))
}

impl ObjectStore for LocalBackend {
    fn stat<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectAttrs> {
        Box::pin(async move {
            let (_, size) = self.open(bucket, key).await?;
            Ok(ObjectAttrs {
                size,
                content_type: None,
            })
        })
    }

    fn read<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectStream> {
        Box::pin(async move {
            let (file, size) = self.open(bucket, key).await?;
            Ok(file_stream(file, size))
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
            let (mut file, size) = self.open(bucket, key).await?;
            if start > end || end >= size {
                return Err(StorageError::Other(anyhow::anyhow!(
                    "range {start}-{end} out of bounds for object of {size} bytes"
                )));
            }
            file.seek(SeekFrom::Start(start))
                .await
                .map_err(anyhow::Error::from)?;
            Ok(file_stream(file, end - start + 1))
        })
    }
}

// -- Tests -------------------------------------------------------------------
