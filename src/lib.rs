//! cb-relay - a CORS-guarded relay in front of the OpenAI Responses API
//!
//! Browsers on the allow-listed front-end origins post a JSON payload to `/api/relay`. The
//! relay resolves the server-side API key, fills in a couple of defaults, forwards the payload
//! upstream and hands back the upstream status and body untouched.

use axum::Router;
use axum::routing::any;
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

pub mod client;
pub mod cors;
pub mod credentials;
pub mod env;
pub mod errors;
pub mod fs;
pub mod handlers;
pub mod payload;
pub mod upstream;

use client::{HttpClient, HyperClient, PoolSettings};
use credentials::CredentialResolver;
use env::{ReadEnv, SystemEnv};
use fs::{ReadFile, SystemFs};
use handlers::relay_handler;
use upstream::UpstreamConfig;

/// Path the relay is served on.
pub const RELAY_PATH: &str = "/api/relay";

/// The main application state. Everything in here is read-only; per-request values (the API
/// key, the payload) never live in it.
#[derive(Clone)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub upstream: UpstreamConfig,
    pub credentials: Arc<CredentialResolver>,
    pub env: Arc<dyn ReadEnv + Send + Sync>,
    pub fs: Arc<dyn ReadFile + Send + Sync>,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client, reading the process environment
    /// and the real filesystem.
    pub fn new(upstream: UpstreamConfig, credentials: CredentialResolver, pool: PoolSettings) -> Self {
        Self::with_client(client::create_hyper_client(pool), upstream, credentials)
    }
}

impl<T: HttpClient> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing)
    pub fn with_client(http_client: T, upstream: UpstreamConfig, credentials: CredentialResolver) -> Self {
        Self {
            http_client,
            upstream,
            credentials: Arc::new(credentials),
            env: Arc::new(SystemEnv),
            fs: Arc::new(SystemFs),
        }
    }

    /// Replace the environment the relay reads its variables from.
    pub fn with_env(mut self, env: impl ReadEnv + Send + Sync + 'static) -> Self {
        self.env = Arc::new(env);
        self
    }

    /// Replace the filesystem secret files are read from.
    pub fn with_fs(mut self, fs: impl ReadFile + Send + Sync + 'static) -> Self {
        self.fs = Arc::new(fs);
        self
    }
}

// env and fs are left out: a snapshot environment may hold the key itself.
impl<T: HttpClient> fmt::Debug for AppState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("http_client", &self.http_client)
            .field("upstream", &self.upstream)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

/// Build the main router for the relay
/// This creates routes for:
/// - `/api/relay` - The relay endpoint, all methods (the handler does its own method gating)
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    Router::new()
        .route(RELAY_PATH, any(relay_handler::<T>))
        .with_state(state)
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// # Parameters
/// - `prefix`: A string prefix for the metrics, which can be either a string literal or an owned string.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}
