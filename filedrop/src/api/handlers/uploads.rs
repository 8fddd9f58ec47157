use crate::AppState;
use crate::api::models::uploads::{FailedUploadResponse, MultiUploadResponse, UploadedFileResponse};
use crate::config::{ContentTypePolicy, UploadMode};
use crate::errors::{Error, Result};
use crate::intake::{CommitOutcome, Intake, StoredUpload};
use crate::types::StoredKey;
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::instrument;
use url::Url;

/// Path under which this service serves `key`, percent-encoded as a single segment
fn retrieval_path(key: &StoredKey) -> Result<String> {
    let mut url = Url::parse("http://localhost/uploads").map_err(|e| Error::Internal {
        operation: format!("build retrieval path: {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| Error::Internal {
            operation: "build retrieval path".to_string(),
        })?
        .push(key.as_str());
    Ok(url.path().to_string())
}

/// Where clients should fetch a stored file from
fn retrieval_url(state: &AppState, stored: &StoredUpload) -> Result<String> {
    if state.storage.delegates_retrieval()
        && let Some(url) = &stored.reference.public_url
    {
        return Ok(url.to_string());
    }
    retrieval_path(&stored.file.stored_key)
}

#[utoipa::path(
    post,
    path = "/upload",
    tag = "uploads",
    summary = "Upload files",
    description = "Upload files as multipart/form-data in the `upload` field.

In single mode the request must carry exactly one file and the response redirects to it. In multi mode up to `max_files` files are accepted and the outcome of each is reported.",
    request_body(
        content_type = "multipart/form-data",
        description = "One or more files in the configured file field"
    ),
    responses(
        (status = 302, description = "Single mode: file stored, `Location` points at it"),
        (status = 200, description = "Multi mode: at least one file stored", body = MultiUploadResponse),
        (status = 400, description = "No file, too many files, or a malformed request"),
        (status = 413, description = "Payload too large"),
        (status = 422, description = "Storage backend rejected the file contents"),
        (status = 429, description = "Too many uploads in progress"),
        (status = 500, description = "Internal server error"),
        (status = 502, description = "Storage backend failed")
    )
)]
#[instrument(skip_all)]
pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response> {
    let _slot = state.limiters.upload_slot().await?;

    let intake = Intake::new(
        state.storage.as_ref(),
        &state.keys,
        &state.config.uploads,
        state.config.limits.files.max_file_size,
    );

    match state.config.uploads.mode {
        UploadMode::Single => {
            let stored = intake.accept_single(&mut multipart).await?;
            let location = retrieval_url(&state, &stored)?;
            Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
        }
        UploadMode::Multi => {
            let outcomes = intake.accept_multi(&mut multipart).await?;
            let total = outcomes.len();

            let mut urls = Vec::new();
            let mut failed = Vec::new();
            let mut first_error = None;
            for outcome in outcomes {
                match outcome {
                    CommitOutcome::Stored(stored) => {
                        urls.push(UploadedFileResponse::new(&stored, retrieval_url(&state, &stored)?));
                    }
                    CommitOutcome::Failed { original_name, error } => {
                        let error = Error::from(error);
                        failed.push(FailedUploadResponse {
                            name: original_name,
                            error: error.user_message(),
                        });
                        first_error.get_or_insert(error);
                    }
                }
            }

            // Nothing was stored: the request failed as its first file did
            if urls.is_empty()
                && let Some(error) = first_error
            {
                return Err(error);
            }

            let message = if failed.is_empty() {
                "Files uploaded successfully".to_string()
            } else {
                format!("{} of {} files uploaded", urls.len(), total)
            };
            Ok(Json(MultiUploadResponse { message, urls, failed }).into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/uploads/{key}",
    tag = "uploads",
    summary = "Retrieve file",
    description = "Returns the stored file's content. When the storage backend serves files itself, responds with a redirect to the file's public URL instead.",
    params(
        ("key" = String, Path, description = "Stored key returned at upload time")
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 307, description = "File is served from the storage backend's public URL"),
        (status = 404, description = "No file stored under this key"),
        (status = 502, description = "Storage backend failed")
    )
)]
#[instrument(skip(state))]
pub async fn retrieve_upload(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response> {
    let Ok(stored_key) = StoredKey::parse(&key) else {
        return Err(Error::NotFound { resource: "File".to_string(), id: key });
    };

    let content = state.storage.retrieve(&stored_key).await?;

    let content_type = match state.config.retrieval.content_type {
        ContentTypePolicy::Fixed => state.config.retrieval.fixed_content_type.clone(),
        ContentTypePolicy::FromExtension => mime_guess::from_path(stored_key.as_str()).first_or_octet_stream().to_string(),
    };

    Ok(([(header::CONTENT_TYPE, content_type)], content).into_response())
}
