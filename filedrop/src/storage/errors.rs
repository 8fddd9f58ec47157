use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Errors from storage backends.
///
/// Remote failures are split by cause so callers can tell credentials problems, transport
/// problems and payload problems apart.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Nothing is stored under the requested key
    #[error("Object not found")]
    NotFound,

    /// The backend does not serve content in-process; the object lives at `url`
    #[error("Retrieval is delegated to {url}")]
    RetrievalDelegated { url: Url },

    /// Credentials were missing, invalid or lacked permission
    #[error("Storage backend rejected credentials: {message}")]
    Auth { message: String },

    /// The request never completed (connection, DNS, TLS, malformed response)
    #[error("Storage backend unreachable: {message}")]
    Network { message: String },

    /// The remote call did not finish within the configured bound
    #[error("Storage backend did not respond within {after:?}")]
    Timeout { after: Duration },

    /// The backend refused the write for another reason (quota, server error, ...)
    #[error("Storage backend rejected the request: {message}")]
    Rejected { message: String },

    /// The payload or request itself was invalid
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    /// Backend is misconfigured
    #[error("Storage configuration error: {message}")]
    Configuration { message: String },

    /// Deleting a staging copy failed; logged, never returned to clients
    #[error("Failed to clean up staging file {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
