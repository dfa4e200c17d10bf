//! Request path to object reference mapping.
//!
//! The proxy endpoint either serves a fixed bucket, taking the whole path
//! below its prefix as the object key, or takes the bucket from the first
//! path segment.  The map endpoint always does the latter.

use crate::errors::ProxyError;

/// The object a request addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Bucket name.
    pub bucket: String,
    /// Object key inside the bucket.
    pub key: String,
}

/// How a mount point determines the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketSource {
    /// Every request is served from this bucket.
    Fixed(String),
    /// The first path segment names the bucket.
    Path,
}

impl BucketSource {
    /// Resolve a path (already stripped of its endpoint prefix) to an
    /// object reference.
    pub fn resolve(&self, path: &str) -> Result<ObjectRef, ProxyError> {
        let resolved = match self {
            BucketSource::Fixed(bucket) => {
                let key = path.trim_start_matches('/');
                (!key.is_empty()).then(|| ObjectRef {
                    bucket: bucket.clone(),
                    key: key.to_string(),
                })
            }
            BucketSource::Path => split_bucket(path),
        };
        resolved.ok_or_else(|| ProxyError::InvalidPath {
            path: path.to_string(),
        })
    }
}

/// Split `bucket/key...` into its bucket and key.
///
/// Leading slashes are ignored.  Returns `None` unless both the bucket and
/// the key are non-empty; the key keeps any further slashes.
pub fn split_bucket(path: &str) -> Option<ObjectRef> {
    let (bucket, key) = path.trim_start_matches('/').split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some(ObjectRef {
        bucket: bucket.to_string(),
        key: key.to_string(),
    })
}

/// Percent-decode a raw URI path.
///
/// Invalid UTF-8 sequences are replaced rather than rejected.
pub fn decode_path(raw: &str) -> String {
    percent_encoding::percent_decode_str(raw)
        .decode_utf8_lossy()
        .into_owned()
}
