//! Storage backends.
//!
//! A backend owns the bytes: it is the only system of record. Two variants exist behind the
//! [`FileStorage`] trait, and one is chosen at startup from [`StorageConfig`]:
//!
//! - [`LocalFileStorage`]: a flat directory, file name = key. Serves content in-process.
//! - [`RemoteFileStorage`]: an S3-compatible bucket, object key = key. Depending on
//!   [`RemoteRetrieval`] it either proxies reads through the application or hands clients the
//!   object's public URL.
//!
//! Uploads are staged locally first (see [`staging`]); `commit` turns a staged file into a
//! durable object.

pub mod errors;
pub mod local;
pub mod remote;
pub mod staging;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

pub use errors::{Result, StorageError};
pub use local::LocalFileStorage;
pub use remote::RemoteFileStorage;
pub use staging::{StagedFile, StagingFile};

use crate::config::{RemoteRetrieval, StorageConfig};
use crate::types::StoredKey;

/// The externally visible result of a successful commit.
///
/// A view, not a record: nothing persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageReference {
    pub stored_key: StoredKey,
    /// Only set by the remote backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<Url>,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Trait for file storage backends
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Directory uploads for this backend are staged in
    fn staging_dir(&self) -> &Path;

    /// Durably store a staged upload under `key`
    async fn commit(&self, key: &StoredKey, staged: StagedFile, mime_type: &str) -> Result<StorageReference>;

    /// Retrieve the full content stored under `key`
    async fn retrieve(&self, key: &StoredKey) -> Result<Bytes>;

    /// Remove any local staging copy left behind by a successful commit
    async fn cleanup_staging(&self, _key: &StoredKey) -> Result<()> {
        Ok(())
    }

    /// Public address of the object, for backends that have one
    fn public_url(&self, _key: &StoredKey) -> Option<Url> {
        None
    }

    /// Whether clients should be sent to [`FileStorage::public_url`] instead of this service
    fn delegates_retrieval(&self) -> bool {
        false
    }
}

/// Create a file storage backend based on configuration
pub async fn create_file_storage(config: &StorageConfig) -> Result<Arc<dyn FileStorage>> {
    match config {
        StorageConfig::Local { path } => {
            tracing::info!("Creating local file storage backend (path: {:?})", path);
            let storage = LocalFileStorage::new(path.clone()).await?;
            Ok(Arc::new(storage))
        }
        StorageConfig::Remote(remote) => {
            tracing::info!(
                bucket = %remote.bucket.as_deref().unwrap_or_default(),
                region = %remote.region.as_deref().unwrap_or_default(),
                retrieval = ?remote.retrieval,
                "Creating remote file storage backend"
            );
            if remote.retrieval == RemoteRetrieval::PublicUrl {
                tracing::info!("Remote objects will be served from their public URL, not by this service");
            }
            let storage = RemoteFileStorage::new(remote).await?;
            Ok(Arc::new(storage))
        }
    }
}
