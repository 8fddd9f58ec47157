//! S3-compatible object storage backend.
//!
//! Uploads are staged on local disk, renamed to `<staging_dir>/<key>` and then sent with a
//! single `PutObject` whose body is streamed from that copy. The staging copy is only removed after the
//! PUT succeeded (see [`FileStorage::cleanup_staging`]); on any failure it stays on disk so the
//! upload can be recovered by hand.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;

use super::errors::{Result, StorageError};
use super::staging::StagedFile;
use super::{FileStorage, StorageReference};
use crate::config::{RemoteRetrieval, RemoteStorageConfig};
use crate::types::StoredKey;

/// Service error codes meaning the credentials are wrong or insufficient
const AUTH_ERROR_CODES: &[&str] = &[
    "AccessDenied",
    "AccountProblem",
    "AuthorizationHeaderMalformed",
    "ExpiredToken",
    "InvalidAccessKeyId",
    "InvalidToken",
    "SignatureDoesNotMatch",
];

/// Service error codes meaning the request or payload itself was unacceptable
const PAYLOAD_ERROR_CODES: &[&str] = &[
    "BadDigest",
    "EntityTooLarge",
    "EntityTooSmall",
    "InvalidArgument",
    "InvalidDigest",
    "InvalidRequest",
    "KeyTooLongError",
    "MissingContentLength",
];

/// Remote storage backend
pub struct RemoteFileStorage {
    client: Client,
    bucket: String,
    public_base: Url,
    retrieval: RemoteRetrieval,
    staging_path: PathBuf,
    timeout: Duration,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(StorageError::Configuration {
            message: format!("{name} must be set for remote storage"),
        }),
    }
}

impl RemoteFileStorage {
    /// Build the bucket client from configuration.
    ///
    /// The client is created once and shared by all requests. Missing credentials fail here,
    /// before any network call is attempted.
    pub async fn new(config: &RemoteStorageConfig) -> Result<Self> {
        let access_key = required(&config.access_key, "STORAGE_ACCESS_KEY")?;
        let secret_key = required(&config.secret_key, "STORAGE_SECRET_KEY")?;
        let bucket = required(&config.bucket, "STORAGE_BUCKET")?.to_string();
        let region = required(&config.region, "STORAGE_REGION")?.to_string();

        let credentials = Credentials::new(access_key, secret_key, None, None, "filedrop-config");

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style)
            .retry_config(RetryConfig::standard().with_max_attempts(config.max_attempts));

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.as_str().trim_end_matches('/'));
        }

        let client = Client::from_conf(builder.build());

        let public_base = match (&config.public_url_base, &config.endpoint) {
            (Some(base), _) => base.clone(),
            (None, Some(endpoint)) => {
                let mut base = endpoint.clone();
                if let Ok(mut segments) = base.path_segments_mut() {
                    segments.pop_if_empty().push(&bucket).push("");
                }
                base
            }
            (None, None) => Url::parse(&format!("https://{bucket}.s3.{region}.amazonaws.com/")).map_err(|e| StorageError::Configuration {
                message: format!("Cannot build public URL for bucket {bucket:?}: {e}"),
            })?,
        };
        if public_base.cannot_be_a_base() {
            return Err(StorageError::Configuration {
                message: format!("Public URL base {public_base} cannot hold object paths"),
            });
        }

        fs::create_dir_all(&config.staging_dir).await.map_err(|e| StorageError::Configuration {
            message: format!("Failed to create staging directory {:?}: {}", config.staging_dir, e),
        })?;

        info!(
            bucket = %bucket,
            region = %region,
            public_base = %public_base,
            staging_dir = ?config.staging_dir,
            "Remote file storage initialized"
        );

        Ok(Self {
            client,
            bucket,
            public_base,
            retrieval: config.retrieval,
            staging_path: config.staging_dir.clone(),
            timeout: config.timeout,
        })
    }

    /// Staging copies are addressed by stored key alone. Under [`NamingPolicy::OriginalName`]
    /// concurrent uploads of the same name share one copy, so a successful request's cleanup
    /// can remove the copy another request's failed PUT left behind for recovery.
    ///
    /// [`NamingPolicy::OriginalName`]: crate::naming::NamingPolicy::OriginalName
    fn staging_copy_path(&self, key: &StoredKey) -> PathBuf {
        self.staging_path.join(key.as_str())
    }

    fn object_url(&self, key: &StoredKey) -> Url {
        let mut url = self.public_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(key.as_str());
        }
        url
    }

    async fn put(&self, key: &StoredKey, source: &Path, size_bytes: u64, mime_type: &str) -> Result<()> {
        let body = ByteStream::from_path(source).await.map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        let content_length = i64::try_from(size_bytes).map_err(|_| StorageError::InvalidPayload {
            message: format!("Object of {size_bytes} bytes is too large to upload"),
        })?;
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(mime_type)
            .content_length(content_length)
            .body(body)
            .send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(StorageError::Timeout { after: self.timeout }),
        }
    }

    async fn get(&self, key: &StoredKey) -> Result<Bytes> {
        let fetch = async {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key.as_str())
                .send()
                .await
                .map_err(|e| {
                    let missing = match &e {
                        SdkError::ServiceError(service) => service.err().is_no_such_key() || service.raw().status().as_u16() == 404,
                        _ => false,
                    };
                    if missing { StorageError::NotFound } else { classify(e) }
                })?;

            let body = output.body.collect().await.map_err(|e| StorageError::Network {
                message: format!("Failed to read object body: {e}"),
            })?;
            Ok::<_, StorageError>(body.into_bytes())
        };

        match tokio::time::timeout(self.timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout { after: self.timeout }),
        }
    }
}

/// Map an SDK failure onto the storage error taxonomy
fn classify<E>(err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let message = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ConstructionFailure(_) => StorageError::InvalidPayload { message },
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => StorageError::Network { message },
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            match err.code() {
                Some(code) if AUTH_ERROR_CODES.contains(&code) => StorageError::Auth { message },
                Some(code) if PAYLOAD_ERROR_CODES.contains(&code) => StorageError::InvalidPayload { message },
                _ if status == 401 || status == 403 => StorageError::Auth { message },
                _ => StorageError::Rejected { message },
            }
        }
        _ => StorageError::Network { message },
    }
}

#[async_trait]
impl FileStorage for RemoteFileStorage {
    fn staging_dir(&self) -> &Path {
        &self.staging_path
    }

    async fn commit(&self, key: &StoredKey, staged: StagedFile, mime_type: &str) -> Result<StorageReference> {
        let size_bytes = staged.size();
        let staging_copy = self.staging_copy_path(key);

        // Keep a named copy until the bucket confirms the write
        staged.publish(&staging_copy)?;

        debug!(key = %key, bucket = %self.bucket, size_bytes, "Uploading object");
        if let Err(e) = self.put(key, &staging_copy, size_bytes, mime_type).await {
            warn!(
                key = %key,
                staging_copy = ?staging_copy,
                error = %e,
                "Remote commit failed, staging copy retained for recovery"
            );
            return Err(e);
        }

        Ok(StorageReference {
            stored_key: key.clone(),
            public_url: Some(self.object_url(key)),
            mime_type: mime_type.to_string(),
            size_bytes,
        })
    }

    async fn retrieve(&self, key: &StoredKey) -> Result<Bytes> {
        match self.retrieval {
            RemoteRetrieval::PublicUrl => Err(StorageError::RetrievalDelegated { url: self.object_url(key) }),
            RemoteRetrieval::Proxy => self.get(key).await,
        }
    }

    async fn cleanup_staging(&self, key: &StoredKey) -> Result<()> {
        let path = self.staging_copy_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Cleanup { path, source }),
        }
    }

    fn public_url(&self, key: &StoredKey) -> Option<Url> {
        Some(self.object_url(key))
    }

    fn delegates_retrieval(&self) -> bool {
        self.retrieval == RemoteRetrieval::PublicUrl
    }
}
