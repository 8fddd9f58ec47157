//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `FILEDROP_CONFIG`
//! environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `FILEDROP_` override YAML values
//! 3. **STORAGE_\*** - The remote backend's credentials and addressing: `STORAGE_ACCESS_KEY`,
//!    `STORAGE_SECRET_KEY`, `STORAGE_BUCKET`, `STORAGE_REGION`, `STORAGE_ENDPOINT`, plus
//!    `STORAGE_BACKEND` (`local` or `remote`) to pick the backend
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `FILEDROP_UPLOADS__MODE=multi` sets the `uploads.mode` field.
//!
//! ## Example
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 7000
//! storage:
//!   type: remote
//!   bucket: my-uploads
//!   region: eu-west-1
//!   retrieval: public_url
//!   staging_dir: ./staging
//!   timeout: 30s
//! uploads:
//!   mode: multi
//!   max_files: 25
//!   naming: random_hex
//! ```
//!
//! Remote credentials are best kept out of the file:
//!
//! ```bash
//! STORAGE_ACCESS_KEY=AKIA... STORAGE_SECRET_KEY=... filedrop -f config.yaml
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::Error;
use crate::naming::NamingPolicy;

/// Raw environment variables mapped into `storage.*`
const STORAGE_ENV_VARS: &[&str] = &[
    "STORAGE_ACCESS_KEY",
    "STORAGE_SECRET_KEY",
    "STORAGE_BUCKET",
    "STORAGE_REGION",
    "STORAGE_ENDPOINT",
];

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "FILEDROP_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// All fields have sensible defaults defined in the `Default` implementation; an empty config
/// file stores uploads in `./uploads` and serves them on port 7000.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Where uploaded files are stored
    pub storage: StorageConfig,
    /// How uploads are received and named
    pub uploads: UploadsConfig,
    /// How stored files are served back
    pub retrieval: RetrievalConfig,
    /// Resource limits for protecting system capacity
    pub limits: LimitsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7000,
            storage: StorageConfig::default(),
            uploads: UploadsConfig::default(),
            retrieval: RetrievalConfig::default(),
            limits: LimitsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

/// Storage backend selection.
///
/// Chosen once at startup; every request uses the same backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Flat directory on local disk
    Local {
        /// Directory files are stored in (default: ./uploads)
        #[serde(default = "default_local_path")]
        path: PathBuf,
    },
    /// S3-compatible object storage bucket
    Remote(RemoteStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Local { path: default_local_path() }
    }
}

fn default_local_path() -> PathBuf {
    PathBuf::from("./uploads")
}

/// How content stored in a bucket reaches clients.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteRetrieval {
    /// Clients are sent to the object's public URL; this service never reads the bucket
    #[default]
    PublicUrl,
    /// This service reads the object and streams it back
    Proxy,
}

/// Remote (S3-compatible) backend settings.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteStorageConfig {
    /// Bucket name (STORAGE_BUCKET)
    pub bucket: Option<String>,
    /// Bucket region (STORAGE_REGION)
    pub region: Option<String>,
    /// Access key ID (STORAGE_ACCESS_KEY)
    #[serde(skip_serializing)]
    pub access_key: Option<String>,
    /// Secret access key (STORAGE_SECRET_KEY)
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    /// Custom endpoint for S3-compatible services (STORAGE_ENDPOINT)
    pub endpoint: Option<Url>,
    /// Use path-style addressing (`<endpoint>/<bucket>/<key>`); usually needed with `endpoint`
    pub force_path_style: bool,
    /// Base URL objects are publicly reachable under. Defaults to the bucket's own URL.
    pub public_url_base: Option<Url>,
    /// Serve via public URL or proxy through this service
    pub retrieval: RemoteRetrieval,
    /// Local directory uploads are staged in before the PUT
    pub staging_dir: PathBuf,
    /// Upper bound on each remote call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Total attempts per remote call, including the first
    pub max_attempts: u32,
}

impl std::fmt::Debug for RemoteStorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("RemoteStorageConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &redacted(&self.access_key))
            .field("secret_key", &redacted(&self.secret_key))
            .field("endpoint", &self.endpoint)
            .field("force_path_style", &self.force_path_style)
            .field("public_url_base", &self.public_url_base)
            .field("retrieval", &self.retrieval)
            .field("staging_dir", &self.staging_dir)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl Default for RemoteStorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            region: None,
            access_key: None,
            secret_key: None,
            endpoint: None,
            force_path_style: false,
            public_url_base: None,
            retrieval: RemoteRetrieval::default(),
            staging_dir: PathBuf::from("./uploads/.staging"),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

/// Whether a request carries one file or a batch.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Exactly one file; answered with a redirect to the stored file
    #[default]
    Single,
    /// Up to `max_files` files; answered with a JSON summary
    Multi,
}

/// Upload intake settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadsConfig {
    pub mode: UploadMode,
    /// Multipart field name carrying files
    pub field_name: String,
    /// Maximum files per request in multi mode
    pub max_files: usize,
    /// How stored keys are derived
    pub naming: NamingPolicy,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            mode: UploadMode::Single,
            field_name: "upload".to_string(),
            max_files: 25,
            naming: NamingPolicy::RandomHex,
        }
    }
}

/// Content type sent with retrieved files.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentTypePolicy {
    /// Always send `fixed_content_type`. Non-image files are mislabelled.
    #[default]
    Fixed,
    /// Guess from the key's extension
    FromExtension,
}

/// Retrieval endpoint settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    pub content_type: ContentTypePolicy,
    pub fixed_content_type: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            content_type: ContentTypePolicy::Fixed,
            fixed_content_type: "image/png".to_string(),
        }
    }
}

/// Resource limits for protecting system capacity.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub files: FileLimitsConfig,
}

/// File upload limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileLimitsConfig {
    /// Maximum size of a single file in bytes.
    /// Set to 0 for unlimited (not recommended for production).
    /// Default: 100MB
    pub max_file_size: u64,
    /// Maximum number of concurrent uploads allowed system-wide.
    /// Default: 0 (unlimited)
    pub max_concurrent_uploads: usize,
    /// Maximum number of uploads that can wait in queue for a slot.
    /// When this limit is reached, new uploads receive HTTP 429 immediately.
    /// Set to 0 for an unbounded queue.
    /// Default: 20
    pub max_waiting_uploads: usize,
    /// Maximum time in seconds to wait for an upload slot before returning HTTP 429.
    /// Set to 0 to reject immediately when no slot is available.
    /// Default: 60
    pub max_upload_wait_secs: u64,
}

impl Default for FileLimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024, // 100MB
            max_concurrent_uploads: 0,
            max_waiting_uploads: 20,
            max_upload_wait_secs: 60,
        }
    }
}

fn missing(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if let StorageConfig::Remote(remote) = &self.storage {
            let required = [
                ("STORAGE_ACCESS_KEY", &remote.access_key),
                ("STORAGE_SECRET_KEY", &remote.secret_key),
                ("STORAGE_BUCKET", &remote.bucket),
                ("STORAGE_REGION", &remote.region),
            ];
            let absent: Vec<&str> = required.iter().filter(|(_, value)| missing(value)).map(|(name, _)| *name).collect();
            if !absent.is_empty() {
                return Err(Error::Internal {
                    operation: format!(
                        "Config validation: remote storage requires {} to be set and non-empty",
                        absent.join(", ")
                    ),
                });
            }

            if remote.timeout.is_zero() {
                return Err(Error::Internal {
                    operation: "Config validation: storage.timeout must be greater than zero".to_string(),
                });
            }

            if remote.max_attempts == 0 {
                return Err(Error::Internal {
                    operation: "Config validation: storage.max_attempts must be at least 1".to_string(),
                });
            }
        }

        if self.uploads.field_name.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: uploads.field_name cannot be empty".to_string(),
            });
        }

        if self.uploads.max_files == 0 {
            return Err(Error::Internal {
                operation: "Config validation: uploads.max_files must be at least 1".to_string(),
            });
        }

        if self.retrieval.content_type == ContentTypePolicy::Fixed && self.retrieval.fixed_content_type.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: retrieval.fixed_content_type cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        // Storage variables alone never select a backend
        Figment::from(Serialized::default("storage.type", "local"))
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("FILEDROP_").ignore(&["CONFIG"]).split("__"))
            // Remote backend credentials and addressing
            .merge(Env::raw().only(STORAGE_ENV_VARS).map(|key| {
                let field = key.as_str().to_ascii_lowercase();
                format!("storage.{}", field.trim_start_matches("storage_")).into()
            }))
            .merge(Env::raw().only(&["STORAGE_BACKEND"]).map(|_| "storage.type".into()))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Largest request body accepted on the upload route, or `None` for unlimited
    pub fn upload_body_limit(&self) -> Option<usize> {
        let per_file = self.limits.files.max_file_size;
        if per_file == 0 {
            return None;
        }
        let files = match self.uploads.mode {
            UploadMode::Single => 1,
            UploadMode::Multi => self.uploads.max_files as u64,
        };
        // Leave room for multipart framing and small text fields
        let limit = per_file.saturating_mul(files).saturating_add(64 * 1024);
        Some(usize::try_from(limit).unwrap_or(usize::MAX))
    }
}
