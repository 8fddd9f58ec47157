//! OpenAPI document for the upload API, served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "filedrop",
        description = "Upload files, get back a stable address, fetch them again."
    ),
    paths(
        api::handlers::form::upload_form,
        api::handlers::uploads::upload_file,
        api::handlers::uploads::retrieve_upload,
    ),
    components(schemas(
        api::models::uploads::MultiUploadResponse,
        api::models::uploads::UploadedFileResponse,
        api::models::uploads::FailedUploadResponse,
    )),
    tags(
        (name = "uploads", description = "File intake and retrieval")
    )
)]
pub struct ApiDoc;
