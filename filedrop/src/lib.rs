//! # filedrop: a small file upload service
//!
//! `filedrop` accepts file uploads over HTTP, gives every file a collision-resistant name,
//! stores it on local disk or in an S3-compatible bucket, and serves it back by that name.
//!
//! ## Request Flow
//!
//! 1. `POST /upload` with a `multipart/form-data` body. The [`limits`] module may make the
//!    request wait for an upload slot, or turn it away with 429.
//! 2. The [`intake`] pipeline reads the file fields. Each file is named by the
//!    [`naming::KeyGenerator`] *before* its bytes are read, then streamed into a staging file
//!    ([`storage::staging`]) while the size limit is enforced.
//! 3. Once the whole request is read, each staged file is committed to the configured
//!    [`storage::FileStorage`] backend. The local backend publishes it with an atomic rename; the
//!    remote backend sends a single `PutObject` and keeps a staging copy until that succeeds.
//! 4. Single mode answers with a redirect to the stored file; multi mode with a JSON summary of
//!    every file's outcome.
//! 5. `GET /uploads/{key}` serves the bytes back, or redirects to the bucket's public URL.
//!
//! ## Configuration
//!
//! See [`config`]. Everything has a default: with no config file at all the service listens on
//! port 7000 and stores files in `./uploads`.
//!
//! ## Running
//!
//! ```bash
//! filedrop -f config.yaml
//! filedrop -f config.yaml --validate   # check configuration and exit
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod intake;
pub mod limits;
pub mod naming;
mod openapi;
pub mod storage;
pub mod telemetry;
pub mod types;

#[cfg(test)]
mod test;

use crate::{limits::Limiters, naming::KeyGenerator, openapi::ApiDoc, storage::FileStorage};
use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};
use utoipa::OpenApi;

/// Application state shared across all request handlers.
///
/// Built once at startup. Cloning is cheap: the backend is behind an `Arc` and the key generator
/// shares its entropy source.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .storage(storage)
///     .keys(KeyGenerator::new(NamingPolicy::RandomHex))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn FileStorage>,
    pub keys: KeyGenerator,
    #[builder(default)]
    pub limiters: Limiters,
}

/// Build the application router
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let body_limit = match state.config.upload_body_limit() {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    let mut router = Router::new()
        .route("/", get(api::handlers::form::upload_form))
        .route("/upload", post(api::handlers::uploads::upload_file).layer(body_limit))
        .route("/uploads/{key}", get(api::handlers::uploads::retrieve_upload))
        .route("/healthz", get(|| async { "OK" }))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone());

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The upload service: state plus router, ready to serve.
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create the storage backend and key generator from configuration
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting filedrop with configuration: {:#?}", config);

        let storage = storage::create_file_storage(&config.storage).await?;
        let state = AppState::builder()
            .storage(storage)
            .keys(KeyGenerator::new(config.uploads.naming))
            .limiters(Limiters::new(&config.limits))
            .config(config)
            .build();

        Self::from_state(state)
    }

    /// Build around already constructed state
    pub fn from_state(state: AppState) -> anyhow::Result<Self> {
        let router = build_router(&state)?;
        Ok(Self {
            router,
            config: state.config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "filedrop listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
