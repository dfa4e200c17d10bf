//! Object storage backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over where bytes
//! physically live.  Implementations include a Google Cloud Storage
//! gateway, a local directory tree and an in-memory store.

pub mod backend;
pub mod gcs;
pub mod local;
pub mod memory;

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use backend::ObjectStore;

/// Build the storage backend selected by `config.backend`.
pub fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.backend.as_str() {
        "gcs" => {
            let backend = gcs::GcsBackend::new(&config.gcs)?;
            info!(
                "GCS storage backend initialized: endpoint={} anonymous={}",
                config.gcs.endpoint, config.gcs.anonymous
            );
            Ok(Arc::new(backend))
        }
        "local" => {
            let backend = local::LocalBackend::new(&config.local.root_dir)?;
            info!(
                "Local storage backend initialized at {}",
                config.local.root_dir
            );
            Ok(Arc::new(backend))
        }
        "memory" => {
            info!("Memory storage backend initialized (empty)");
            Ok(Arc::new(memory::MemoryBackend::new()))
        }
        other => anyhow::bail!("unknown storage backend '{other}' (expected gcs, local or memory)"),
    }
}
