//! gcsproxy library: an HTTP front end for object storage buckets.
//!
//! Objects are served read-only over GET and HEAD with single byte-range
//! support. The bucket is either fixed by configuration or taken from the
//! request path, and the storage itself sits behind the pluggable
//! [`storage::backend::ObjectStore`] trait.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod mapper;
pub mod metrics;
pub mod range;
pub mod server;
pub mod storage;

use crate::config::Config;
use crate::storage::backend::ObjectStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Object storage backend (GCS, local directory or memory).
    pub storage: Arc<dyn ObjectStore>,
}
