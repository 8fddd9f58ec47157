//! Test utilities for HTTP-level tests
use crate::config::{Config, RemoteRetrieval, RemoteStorageConfig, StorageConfig, UploadMode};
use crate::naming::{EntropySource, KeyGenerator};
use crate::storage::create_file_storage;
use crate::{AppState, Application};
use axum_test::TestServer;
use axum_test::multipart::{MultipartForm, Part};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Config storing files in `dir` on local disk
pub fn create_test_config(dir: &Path) -> Config {
    Config {
        storage: StorageConfig::Local { path: dir.to_path_buf() },
        ..Default::default()
    }
}

pub fn create_multi_config(dir: &Path) -> Config {
    let mut config = create_test_config(dir);
    config.uploads.mode = UploadMode::Multi;
    config
}

/// Config pointing the remote backend at a stand-in S3 endpoint
pub fn create_remote_config(endpoint: &str, staging_dir: &Path, retrieval: RemoteRetrieval) -> Config {
    Config {
        storage: StorageConfig::Remote(RemoteStorageConfig {
            bucket: Some("test-bucket".to_string()),
            region: Some("us-east-1".to_string()),
            access_key: Some("AKIDEXAMPLE".to_string()),
            secret_key: Some("wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string()),
            endpoint: Some(Url::parse(endpoint).expect("valid endpoint")),
            force_path_style: true,
            public_url_base: None,
            retrieval,
            staging_dir: staging_dir.to_path_buf(),
            timeout: Duration::from_secs(5),
            max_attempts: 1,
        }),
        ..Default::default()
    }
}

pub async fn create_test_app(config: Config) -> TestServer {
    config.validate().expect("Test config should be valid");
    Application::new(config)
        .await
        .expect("Failed to create application")
        .into_test_server()
}

/// Test app whose key generator draws from `entropy`
pub async fn create_test_app_with_entropy(config: Config, entropy: Arc<dyn EntropySource>) -> TestServer {
    let storage = create_file_storage(&config.storage).await.expect("Failed to create storage");
    let state = AppState::builder()
        .storage(storage)
        .keys(KeyGenerator::with_entropy(config.uploads.naming, entropy))
        .config(config)
        .build();
    Application::from_state(state)
        .expect("Failed to create application")
        .into_test_server()
}

/// One file in the `upload` field
pub fn file_part(name: &str, mime_type: &str, content: &[u8]) -> Part {
    Part::bytes(content.to_vec()).file_name(name.to_string()).mime_type(mime_type.to_string())
}

pub fn upload_form(files: &[(&str, &str, &[u8])]) -> MultipartForm {
    files
        .iter()
        .fold(MultipartForm::new(), |form, (name, mime_type, content)| {
            form.add_part("upload", file_part(name, mime_type, content))
        })
}

/// Names of stored files in a local storage directory, excluding the staging area
pub fn stored_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("storage directory exists")
        .map(|entry| entry.expect("readable entry").file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// Whether `key` looks like 32 lowercase hex characters followed by `extension`
pub fn is_random_key(key: &str, extension: &str) -> bool {
    key.len() == 32 + extension.len()
        && key.ends_with(extension)
        && key[..32].chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}
