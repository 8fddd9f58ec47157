use crate::AppState;
use crate::config::UploadMode;
use axum::{extract::State, response::Html};

const UPLOAD_FORM: &str = include_str!("upload_form.html");

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render the upload form for the configured field name and mode
pub fn render_form(field_name: &str, mode: UploadMode) -> String {
    let multiple = match mode {
        UploadMode::Single => "",
        UploadMode::Multi => " multiple",
    };
    UPLOAD_FORM
        .replace("{{field_name}}", &escape_attribute(field_name))
        .replace("{{multiple}}", multiple)
}

#[utoipa::path(
    get,
    path = "/",
    tag = "uploads",
    summary = "Upload form",
    responses(
        (status = 200, description = "HTML form posting to /upload", body = String, content_type = "text/html")
    )
)]
pub async fn upload_form(State(state): State<AppState>) -> Html<String> {
    Html(render_form(&state.config.uploads.field_name, state.config.uploads.mode))
}
