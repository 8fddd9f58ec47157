use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::intake::StoredUpload;

/// A successfully stored file of a multi-file upload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct UploadedFileResponse {
    /// Where the file can be retrieved
    pub url: String,
    /// Original file name as sent by the client
    pub name: String,
    /// Content type declared by the client
    #[serde(rename = "type")]
    pub mime_type: String,
    /// Size in bytes
    pub size: u64,
}

impl UploadedFileResponse {
    pub fn new(stored: &StoredUpload, url: String) -> Self {
        Self {
            url,
            name: stored.file.original_name.clone(),
            mime_type: stored.file.mime_type.clone(),
            size: stored.file.size_bytes,
        }
    }
}

/// A file of a multi-file upload that could not be stored
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct FailedUploadResponse {
    /// Original file name as sent by the client
    pub name: String,
    /// Why the file was not stored
    pub error: String,
}

/// Response for a multi-file upload
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct MultiUploadResponse {
    pub message: String,
    /// Stored files, in the order they were sent
    pub urls: Vec<UploadedFileResponse>,
    /// Files that failed, in the order they were sent
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<FailedUploadResponse>,
}
