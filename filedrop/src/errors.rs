use crate::naming::NamingError;
use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data, e.g. a missing or duplicated file field
    #[error("{message}")]
    BadRequest { message: String },

    /// A file or request body exceeded the configured size limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// Too many concurrent uploads, and the waiting queue is full or timed out
    #[error("{message}")]
    TooManyRequests { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Key generation error
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// Storage backend error
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Naming(naming_err) => match naming_err {
                NamingError::UnusableName { .. } => StatusCode::BAD_REQUEST,
                NamingError::Entropy(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Storage(storage_err) => match storage_err {
                StorageError::NotFound => StatusCode::NOT_FOUND,
                StorageError::RetrievalDelegated { .. } => StatusCode::TEMPORARY_REDIRECT,
                StorageError::Auth { .. }
                | StorageError::Network { .. }
                | StorageError::Timeout { .. }
                | StorageError::Rejected { .. } => StatusCode::BAD_GATEWAY,
                StorageError::InvalidPayload { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                StorageError::Configuration { .. } | StorageError::Cleanup { .. } | StorageError::Io(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::PayloadTooLarge { message } | Error::TooManyRequests { message } => message.clone(),
            Error::NotFound { resource, id } => {
                format!("{resource} with ID {id} not found")
            }
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Naming(naming_err) => match naming_err {
                NamingError::UnusableName { name, reason } => format!("File name {name:?} cannot be stored: {reason}"),
                NamingError::Entropy(_) => "Could not generate a file name".to_string(),
            },
            Error::Storage(storage_err) => match storage_err {
                StorageError::NotFound => "File not found".to_string(),
                StorageError::RetrievalDelegated { url } => url.to_string(),
                StorageError::Auth { .. } => "Storage backend refused the upload credentials".to_string(),
                StorageError::Network { .. } => "Storage backend is unreachable".to_string(),
                StorageError::Timeout { .. } => "Storage backend timed out".to_string(),
                StorageError::Rejected { .. } => "Storage backend rejected the upload".to_string(),
                StorageError::InvalidPayload { .. } => "Storage backend rejected the file contents".to_string(),
                StorageError::Configuration { .. } | StorageError::Cleanup { .. } | StorageError::Io(_) => {
                    "Storage error occurred".to_string()
                }
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Storage(StorageError::RetrievalDelegated { url }) => {
                tracing::debug!("Redirecting retrieval to {}", url);
            }
            Error::Storage(StorageError::NotFound) => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Storage(StorageError::InvalidPayload { .. }) => {
                tracing::warn!("Storage rejected payload: {:#}", self);
            }
            Error::Storage(_) | Error::Naming(NamingError::Entropy(_)) | Error::Internal { .. } => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::PayloadTooLarge { .. } | Error::TooManyRequests { .. } => {
                tracing::info!("Upload limit reached: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } | Error::Naming(NamingError::UnusableName { .. }) => {
                tracing::debug!("Client error: {}", self);
            }
        }

        match self {
            Error::Storage(StorageError::RetrievalDelegated { url }) => Redirect::temporary(url.as_str()).into_response(),
            _ => {
                let status = self.status_code();
                (status, self.user_message()).into_response()
            }
        }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::EntropyError;
    use std::time::Duration;

    #[test]
    fn test_storage_commit_failures_are_bad_gateway() {
        let errors = [
            StorageError::Auth { message: "denied".into() },
            StorageError::Network { message: "refused".into() },
            StorageError::Timeout { after: Duration::from_secs(1) },
            StorageError::Rejected { message: "quota".into() },
        ];
        for err in errors {
            assert_eq!(Error::from(err).status_code(), StatusCode::BAD_GATEWAY);
        }
        let invalid = Error::from(StorageError::InvalidPayload { message: "bad".into() });
        assert_eq!(invalid.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_entropy_failure_is_internal_and_sanitized() {
        let err = Error::from(NamingError::from(EntropyError {
            message: "getrandom: device not configured".into(),
        }));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_message().contains("getrandom"));
    }

    #[test]
    fn test_user_messages_do_not_leak_backend_details() {
        let err = Error::from(StorageError::Auth {
            message: "InvalidAccessKeyId: AKIDEXAMPLE".into(),
        });
        assert!(!err.user_message().contains("AKIDEXAMPLE"));
    }

    #[test]
    fn test_delegated_retrieval_becomes_redirect() {
        let url = url::Url::parse("https://bucket.s3.us-east-1.amazonaws.com/abc.png").unwrap();
        let response = Error::from(StorageError::RetrievalDelegated { url }).into_response();
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response.headers().get(axum::http::header::LOCATION).unwrap(),
            "https://bucket.s3.us-east-1.amazonaws.com/abc.png"
        );
    }
}
