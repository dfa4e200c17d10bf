//! Abstract object store trait.
//!
//! Every storage backend must implement [`ObjectStore`].  Objects are
//! addressed by bucket + key and read back as opaque byte streams, so
//! handlers never need to know where the bytes physically live.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// A stream of object bytes as returned by [`ObjectStore::read`] and
/// [`ObjectStore::read_range`].
pub type ObjectStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Boxed future returned by every [`ObjectStore`] operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Object attributes reported by [`ObjectStore::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttrs {
    /// Object size in bytes.
    pub size: u64,
    /// MIME type recorded by the backend, if any.
    pub content_type: Option<String>,
}

/// Errors reported by storage backends.
///
/// The two not-found kinds are kept apart from [`StorageError::Other`] so
/// callers can tell a missing object from a failing backend.  Their display
/// text is what clients see in 404 bodies.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The bucket does not exist.
    #[error("storage: bucket doesn't exist")]
    BucketNotExist,

    /// The object does not exist in an existing bucket.
    #[error("storage: object doesn't exist")]
    ObjectNotExist,

    /// Transport, authentication or decoding failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    /// Whether this error means the addressed object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::BucketNotExist | StorageError::ObjectNotExist
        )
    }
}

/// Async read-only object storage contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch the attributes of `bucket/key`.
    fn stat<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectAttrs>;

    /// Open the full contents of `bucket/key`.
    fn read<'a>(&'a self, bucket: &'a str, key: &'a str) -> StoreFuture<'a, ObjectStream>;

    /// Open bytes `start..=end` of `bucket/key`.
    ///
    /// Callers resolve the range against the object size first, so `end` is
    /// always below the size reported by [`ObjectStore::stat`].
    fn read_range<'a>(
        &'a self,
        bucket: &'a str,
        key: &'a str,
        start: u64,
        end: u64,
    ) -> StoreFuture<'a, ObjectStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        assert_eq!(
            StorageError::ObjectNotExist.to_string(),
            "storage: object doesn't exist"
        );
        assert_eq!(
            StorageError::BucketNotExist.to_string(),
            "storage: bucket doesn't exist"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(StorageError::ObjectNotExist.is_not_found());
        assert!(StorageError::BucketNotExist.is_not_found());
        assert!(!StorageError::Other(anyhow::anyhow!("connection reset")).is_not_found());
    }
}
