pub mod utils;

use crate::api::models::uploads::MultiUploadResponse;
use crate::config::{ContentTypePolicy, RemoteRetrieval};
use crate::naming::{EntropyError, EntropySource};
use axum::http::StatusCode;
use axum_test::multipart::MultipartForm;
use std::sync::Arc;
use std::time::Duration;
use utils::{
    create_multi_config, create_remote_config, create_test_app, create_test_app_with_entropy, create_test_config, file_part,
    is_random_key, stored_files, upload_form,
};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn location(response: &axum_test::TestResponse) -> String {
    response
        .header("location")
        .to_str()
        .expect("ASCII location header")
        .to_string()
}

#[test_log::test(tokio::test)]
async fn test_single_upload_redirects_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(dir.path())).await;
    let content = b"\x89PNG\r\n\x1a\nnot really a png";

    let response = server
        .post("/upload")
        .multipart(upload_form(&[("photo.JPG", "image/jpeg", content)]))
        .await;

    assert_eq!(response.status_code(), StatusCode::FOUND);
    let location = location(&response);
    let key = location.strip_prefix("/uploads/").expect("redirect to the stored file");
    assert!(is_random_key(key, ".JPG"), "unexpected key {key}");
    assert_eq!(stored_files(dir.path()), vec![key.to_string()]);

    let retrieved = server.get(&location).await;
    assert_eq!(retrieved.status_code(), StatusCode::OK);
    assert_eq!(retrieved.header("content-type"), "image/png");
    assert_eq!(retrieved.as_bytes().as_ref(), content);
}

#[test_log::test(tokio::test)]
async fn test_upload_without_file_field_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(dir.path())).await;

    let form = MultipartForm::new()
        .add_text("upload", "not a file")
        .add_part("attachment", file_part("a.txt", "text/plain", b"wrong field"));
    let response = server.post("/upload").multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(response.text().contains("No file provided"));
    assert!(stored_files(dir.path()).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_multi_upload_reports_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_multi_config(dir.path())).await;

    let response = server
        .post("/upload")
        .multipart(upload_form(&[
            ("a.txt", "text/plain", b"alpha"),
            ("b.gif", "image/gif", b"GIF89a"),
        ]))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body: MultiUploadResponse = response.json();
    assert_eq!(body.message, "Files uploaded successfully");
    assert!(body.failed.is_empty());
    assert_eq!(body.urls.len(), 2);
    assert_eq!(body.urls[0].name, "a.txt");
    assert_eq!(body.urls[0].mime_type, "text/plain");
    assert_eq!(body.urls[0].size, 5);
    assert_eq!(body.urls[1].name, "b.gif");
    assert_eq!(body.urls[1].size, 6);

    let fetched = server.get(&body.urls[0].url).await;
    assert_eq!(fetched.as_bytes().as_ref(), b"alpha");
    assert_eq!(stored_files(dir.path()).len(), 2);

    // The JSON uses the short field names
    let raw: serde_json::Value = response.json();
    assert_eq!(raw["urls"][1]["type"], "image/gif");
    assert!(raw.get("failed").is_none());
}

#[test_log::test(tokio::test)]
async fn test_multi_upload_over_limit_stores_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_multi_config(dir.path())).await;

    let names: Vec<String> = (0..26).map(|i| format!("f{i}.txt")).collect();
    let files: Vec<(&str, &str, &[u8])> = names.iter().map(|name| (name.as_str(), "text/plain", &b"x"[..])).collect();
    let response = server.post("/upload").multipart(upload_form(&files)).await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(stored_files(dir.path()).is_empty());

    // Exactly at the limit is fine
    let response = server.post("/upload").multipart(upload_form(&files[..25])).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(stored_files(dir.path()).len(), 25);
}

#[test_log::test(tokio::test)]
async fn test_single_mode_rejects_two_files() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(dir.path())).await;

    let response = server
        .post("/upload")
        .multipart(upload_form(&[("a.txt", "text/plain", b"a"), ("b.txt", "text/plain", b"b")]))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(stored_files(dir.path()).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_oversized_upload_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.limits.files.max_file_size = 1024;
    let server = create_test_app(config).await;

    let big = vec![7u8; 4096];
    let response = server.post("/upload").multipart(upload_form(&[("big.bin", "application/octet-stream", &big)])).await;

    assert_eq!(response.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(stored_files(dir.path()).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_retrieve_missing_or_invalid_key_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_test_config(dir.path())).await;

    let response = server.get("/uploads/00000000000000000000000000000000.png").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // The staging directory is never addressable
    let response = server.get("/uploads/.staging").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = server.get("/uploads/..%2Fetc%2Fpasswd").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[test_log::test(tokio::test)]
async fn test_content_type_from_extension() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = create_test_config(dir.path());
    config.retrieval.content_type = ContentTypePolicy::FromExtension;
    let server = create_test_app(config).await;

    let response = server.post("/upload").multipart(upload_form(&[("notes.txt", "text/plain", b"hi")])).await;
    let text = server.get(&location(&response)).await;
    assert!(text.header("content-type").to_str().unwrap().starts_with("text/plain"));

    let response = server.post("/upload").multipart(upload_form(&[("blob", "application/x-custom", b"??")])).await;
    let blob = server.get(&location(&response)).await;
    assert_eq!(blob.header("content-type"), "application/octet-stream");
}

struct BrokenEntropy;

impl EntropySource for BrokenEntropy {
    fn fill(&self, _buf: &mut [u8]) -> Result<(), EntropyError> {
        Err(EntropyError {
            message: "entropy pool unavailable".to_string(),
        })
    }
}

#[test_log::test(tokio::test)]
async fn test_entropy_failure_is_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app_with_entropy(create_test_config(dir.path()), Arc::new(BrokenEntropy)).await;

    let response = server.post("/upload").multipart(upload_form(&[("a.png", "image/png", b"a")])).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.text().contains("entropy pool unavailable"));
    assert!(stored_files(dir.path()).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_remote_public_url_upload_redirects_to_bucket() {
    let s3 = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/test-bucket/[0-9a-f]{32}\.png$"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&s3)
        .await;

    let staging = tempfile::tempdir().unwrap();
    let server = create_test_app(create_remote_config(&s3.uri(), staging.path(), RemoteRetrieval::PublicUrl)).await;

    let response = server.post("/upload").multipart(upload_form(&[("cat.png", "image/png", b"meow")])).await;

    assert_eq!(response.status_code(), StatusCode::FOUND);
    let location = location(&response);
    let prefix = format!("{}/test-bucket/", s3.uri());
    let key = location.strip_prefix(&prefix).expect("redirect to the bucket");
    assert!(is_random_key(key, ".png"));

    // Retrieval through the service is redirected too, without touching the bucket
    let retrieved = server.get(&format!("/uploads/{key}")).await;
    assert_eq!(retrieved.status_code(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(retrieved.header("location"), location.as_str());

    // Only the staging temp area remains
    assert!(stored_files(staging.path()).is_empty());
}

#[test_log::test(tokio::test)]
async fn test_remote_proxy_round_trip() {
    let s3 = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&s3)
        .await;
    Mock::given(method("GET"))
        .and(path("/test-bucket/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
        .mount(&s3)
        .await;

    let staging = tempfile::tempdir().unwrap();
    let mut config = create_remote_config(&s3.uri(), staging.path(), RemoteRetrieval::Proxy);
    config.uploads.naming = crate::naming::NamingPolicy::OriginalName;
    config.retrieval.content_type = ContentTypePolicy::FromExtension;
    let server = create_test_app(config).await;

    let response = server.post("/upload").multipart(upload_form(&[("report.pdf", "application/pdf", b"%PDF-1.7")])).await;
    assert_eq!(response.status_code(), StatusCode::FOUND);
    assert_eq!(location(&response), "/uploads/report.pdf");

    let retrieved = server.get("/uploads/report.pdf").await;
    assert_eq!(retrieved.status_code(), StatusCode::OK);
    assert_eq!(retrieved.header("content-type"), "application/pdf");
    assert_eq!(retrieved.as_bytes().as_ref(), b"%PDF-1.7");
}

#[test_log::test(tokio::test)]
async fn test_remote_auth_failure_is_bad_gateway_and_keeps_staging_copy() {
    let s3 = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("Content-Type", "application/xml")
                .set_body_string(
                    r#"<?xml version="1.0" encoding="UTF-8"?><Error><Code>SignatureDoesNotMatch</Code><Message>bad signature</Message></Error>"#,
                ),
        )
        .mount(&s3)
        .await;

    let staging = tempfile::tempdir().unwrap();
    let server = create_test_app(create_remote_config(&s3.uri(), staging.path(), RemoteRetrieval::PublicUrl)).await;

    let response = server.post("/upload").multipart(upload_form(&[("cat.png", "image/png", b"meow")])).await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    let retained = stored_files(staging.path());
    assert_eq!(retained.len(), 1);
    assert!(is_random_key(&retained[0], ".png"));
    assert_eq!(std::fs::read(staging.path().join(&retained[0])).unwrap(), b"meow");
}

#[test_log::test(tokio::test)]
async fn test_remote_timeout_keeps_staging_copy() {
    let s3 = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
        .mount(&s3)
        .await;

    let staging = tempfile::tempdir().unwrap();
    let mut config = create_remote_config(&s3.uri(), staging.path(), RemoteRetrieval::PublicUrl);
    if let crate::config::StorageConfig::Remote(remote) = &mut config.storage {
        remote.timeout = Duration::from_millis(200);
    }
    let server = create_test_app(config).await;

    let response = server.post("/upload").multipart(upload_form(&[("slow.txt", "text/plain", b"zzz")])).await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(stored_files(staging.path()).len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_service_routes() {
    let dir = tempfile::tempdir().unwrap();
    let server = create_test_app(create_multi_config(dir.path())).await;

    let health = server.get("/healthz").await;
    assert_eq!(health.status_code(), StatusCode::OK);
    assert_eq!(health.text(), "OK");

    let form = server.get("/").await;
    assert_eq!(form.status_code(), StatusCode::OK);
    assert!(form.text().contains(r#"name="upload" multiple"#));

    let docs = server.get("/api-docs/openapi.json").await;
    assert_eq!(docs.status_code(), StatusCode::OK);
    let doc: serde_json::Value = docs.json();
    assert!(doc["paths"]["/upload"]["post"].is_object());

    // Metrics are off by default
    let metrics = server.get("/internal/metrics").await;
    assert_eq!(metrics.status_code(), StatusCode::NOT_FOUND);
}
