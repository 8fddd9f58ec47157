//! Upload intake pipeline.
//!
//! Turns a multipart request into committed files:
//!
//! 1. Each matching file field gets its [`StoredKey`] from the [`KeyGenerator`] before any of
//!    its bytes are read.
//! 2. The field is streamed into a [`StagingFile`], enforcing the per-file size limit.
//! 3. Only once the whole request has been read and every file is staged does anything get
//!    committed. A malformed request, a file over the limit or one file too many therefore
//!    commits nothing; the staged temp files are deleted when dropped.
//! 4. Each staged file is committed to the [`FileStorage`] backend, followed by a best-effort
//!    cleanup of the backend's staging copy.
//!
//! In single mode the request must carry exactly one file and any failure fails the request.
//! In multi mode up to `max_files` files are committed concurrently and each outcome is
//! reported on its own.

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{UploadMode, UploadsConfig};
use crate::errors::{Error, Result};
use crate::naming::KeyGenerator;
use crate::storage::{FileStorage, StagedFile, StagingFile, StorageError, StorageReference};
use crate::types::{DEFAULT_MIME_TYPE, StoredKey, UploadedFile};

/// A named, fully staged file that has not been committed yet
#[derive(Debug)]
pub struct PendingUpload {
    pub original_name: String,
    pub stored_key: StoredKey,
    pub mime_type: String,
    staged: StagedFile,
}

/// A committed file and where it ended up
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub file: UploadedFile,
    pub reference: StorageReference,
}

/// Outcome of committing one file of a multi-file upload
#[derive(Debug)]
pub enum CommitOutcome {
    Stored(StoredUpload),
    Failed { original_name: String, error: StorageError },
}

/// Drives one upload request through naming, staging and commit
pub struct Intake<'a> {
    storage: &'a dyn FileStorage,
    keys: &'a KeyGenerator,
    uploads: &'a UploadsConfig,
    /// 0 = unlimited
    max_file_size: u64,
}

fn multipart_error(e: MultipartError, what: &str) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: format!("Request body too large: {}", e.body_text()),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to {what}: {}", e.body_text()),
        }
    }
}

impl<'a> Intake<'a> {
    pub fn new(storage: &'a dyn FileStorage, keys: &'a KeyGenerator, uploads: &'a UploadsConfig, max_file_size: u64) -> Self {
        Self {
            storage,
            keys,
            uploads,
            max_file_size,
        }
    }

    fn file_cap(&self) -> usize {
        match self.uploads.mode {
            UploadMode::Single => 1,
            UploadMode::Multi => self.uploads.max_files,
        }
    }

    /// Read the whole request, staging every matching file field.
    ///
    /// Fails without committing anything if the request is malformed, carries no file, carries
    /// more files than the mode allows, or any file exceeds the size limit.
    pub async fn stage_all(&self, multipart: &mut Multipart) -> Result<Vec<PendingUpload>> {
        let cap = self.file_cap();
        let mut pending = Vec::new();

        while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, "parse multipart data"))? {
            if field.name() != Some(self.uploads.field_name.as_str()) {
                debug!(field = ?field.name(), "Ignoring unrelated multipart field");
                continue;
            }
            // Text fields carry no file name; an unfilled file input sends an empty one
            let Some(original_name) = field.file_name().filter(|name| !name.is_empty()).map(str::to_string) else {
                debug!(field = %self.uploads.field_name, "Ignoring file field without a file");
                continue;
            };

            if pending.len() == cap {
                return Err(Error::BadRequest {
                    message: match self.uploads.mode {
                        UploadMode::Single => format!("Expected a single file in field '{}'", self.uploads.field_name),
                        UploadMode::Multi => format!("Too many files: at most {cap} files can be uploaded at once"),
                    },
                });
            }

            pending.push(self.stage_field(field, original_name).await?);
        }

        if pending.is_empty() {
            return Err(Error::BadRequest {
                message: format!("No file provided in field '{}'", self.uploads.field_name),
            });
        }

        Ok(pending)
    }

    async fn stage_field(&self, mut field: Field<'_>, original_name: String) -> Result<PendingUpload> {
        let mime_type = field.content_type().unwrap_or(DEFAULT_MIME_TYPE).to_string();

        // The key is fixed before a single byte is staged
        let stored_key = self.keys.generate(&original_name).await?;

        let mut staging = StagingFile::create(self.storage.staging_dir())
            .await
            .map_err(StorageError::from)?;

        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, "read file chunk"))? {
            if self.max_file_size > 0 && staging.written() + chunk.len() as u64 > self.max_file_size {
                warn!(
                    key = %stored_key,
                    original_name = %original_name,
                    max_file_size = self.max_file_size,
                    "File size limit exceeded, aborting upload"
                );
                return Err(Error::PayloadTooLarge {
                    message: format!(
                        "File size exceeds maximum allowed size of {} bytes ({} MB)",
                        self.max_file_size,
                        self.max_file_size / (1024 * 1024)
                    ),
                });
            }
            staging.write_chunk(&chunk).await.map_err(StorageError::from)?;
        }

        let staged = staging.finish().await.map_err(StorageError::from)?;
        debug!(key = %stored_key, original_name = %original_name, size_bytes = staged.size(), "Staged upload");

        Ok(PendingUpload {
            original_name,
            stored_key,
            mime_type,
            staged,
        })
    }

    /// Commit one staged file, then clean up the backend's staging copy.
    ///
    /// Cleanup failures are logged and otherwise ignored: the file is already stored.
    pub async fn commit(&self, pending: PendingUpload) -> std::result::Result<StoredUpload, StorageError> {
        let PendingUpload {
            original_name,
            stored_key,
            mime_type,
            staged,
        } = pending;

        let reference = match self.storage.commit(&stored_key, staged, &mime_type).await {
            Ok(reference) => reference,
            Err(e) => {
                warn!(key = %stored_key, original_name = %original_name, error = %e, "Failed to commit upload");
                return Err(e);
            }
        };
        info!(
            key = %stored_key,
            original_name = %original_name,
            size_bytes = reference.size_bytes,
            mime_type = %mime_type,
            "Upload committed"
        );

        if let Err(e) = self.storage.cleanup_staging(&stored_key).await {
            warn!(key = %stored_key, error = %e, "Failed to remove staging copy after commit");
        }

        Ok(StoredUpload {
            file: UploadedFile {
                original_name,
                stored_key,
                mime_type,
                size_bytes: reference.size_bytes,
            },
            reference,
        })
    }

    /// Single mode: exactly one file, all-or-nothing
    pub async fn accept_single(&self, multipart: &mut Multipart) -> Result<StoredUpload> {
        let mut pending = self.stage_all(multipart).await?;
        // stage_all caps single mode at one file and never returns an empty list
        let Some(upload) = pending.pop() else {
            return Err(Error::BadRequest {
                message: format!("No file provided in field '{}'", self.uploads.field_name),
            });
        };
        Ok(self.commit(upload).await?)
    }

    /// Multi mode: every staged file is committed concurrently; outcomes in request order
    pub async fn accept_multi(&self, multipart: &mut Multipart) -> Result<Vec<CommitOutcome>> {
        let pending = self.stage_all(multipart).await?;
        debug!(files = pending.len(), "Committing multi-file upload");

        let outcomes = join_all(pending.into_iter().map(|upload| async move {
            let original_name = upload.original_name.clone();
            match self.commit(upload).await {
                Ok(stored) => CommitOutcome::Stored(stored),
                Err(error) => CommitOutcome::Failed { original_name, error },
            }
        }))
        .await;

        Ok(outcomes)
    }
}
