use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use super::errors::{Result, StorageError};
use super::staging::StagedFile;
use super::{FileStorage, StorageReference};
use crate::types::StoredKey;

/// Name of the staging subdirectory inside the storage directory.
///
/// Dot-prefixed, so no key can ever address it.
pub const STAGING_DIR_NAME: &str = ".staging";

/// Local filesystem storage backend - stores files flat in one directory
///
/// Uploads are staged in `<base>/.staging` and published with a rename, so a file only
/// appears under its key once it is complete.
pub struct LocalFileStorage {
    base_path: PathBuf,
    staging_path: PathBuf,
}

impl LocalFileStorage {
    /// Open (creating if necessary) the storage directory at `base_path`
    pub async fn new(base_path: PathBuf) -> Result<Self> {
        let staging_path = base_path.join(STAGING_DIR_NAME);
        fs::create_dir_all(&staging_path).await.map_err(|e| StorageError::Configuration {
            message: format!("Failed to create local storage directory {:?}: {}", base_path, e),
        })?;
        Ok(Self { base_path, staging_path })
    }

    fn object_path(&self, key: &StoredKey) -> PathBuf {
        self.base_path.join(key.as_str())
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    fn staging_dir(&self) -> &Path {
        &self.staging_path
    }

    async fn commit(&self, key: &StoredKey, staged: StagedFile, mime_type: &str) -> Result<StorageReference> {
        let size_bytes = staged.size();
        let dest = self.object_path(key);

        staged.publish(&dest)?;
        debug!(key = %key, path = ?dest, size_bytes, "Published file to local storage");

        Ok(StorageReference {
            stored_key: key.clone(),
            public_url: None,
            mime_type: mime_type.to_string(),
            size_bytes,
        })
    }

    async fn retrieve(&self, key: &StoredKey) -> Result<Bytes> {
        let path = self.object_path(key);
        match fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            // A directory under a key is not a stored file
            Err(e) if e.kind() == ErrorKind::IsADirectory => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }
}
