//! The single outbound call: building the request for the OpenAI Responses API and relaying
//! its answer back to the browser.
use crate::client::{HttpClient, error_chain};
use crate::credentials::ApiKey;
use crate::env::{ReadEnv, var_non_blank};
use crate::errors::RelayError;
use axum::body::Body;
use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use axum::response::Response;
use bon::Builder;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

pub const ORGANIZATION_ENV_VAR: &str = "CB_OPENAI_ORG";
pub const PROJECT_ENV_VAR: &str = "CB_OPENAI_PROJECT";

const ORGANIZATION_HEADER: HeaderName = HeaderName::from_static("openai-organization");
const PROJECT_HEADER: HeaderName = HeaderName::from_static("openai-project");

/// Upstream tracing id, forwarded under [`UPSTREAM_REQUEST_ID_HEADER`].
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const UPSTREAM_REQUEST_ID_HEADER: HeaderName =
    HeaderName::from_static("x-upstream-request-id");
/// Headers with this prefix are forwarded under their own name.
pub const RATE_LIMIT_PREFIX: &str = "x-ratelimit-";

/// Where and how long to wait.
#[derive(Debug, Clone, Builder)]
pub struct UpstreamConfig {
    #[builder(default = default_upstream_url())]
    pub url: Url,
    /// Covers sending the request and reading the whole response body.
    #[builder(default = DEFAULT_UPSTREAM_TIMEOUT)]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

fn default_upstream_url() -> Url {
    DEFAULT_UPSTREAM_URL
        .parse()
        .expect("DEFAULT_UPSTREAM_URL should be a valid URL")
}

/// Optional OpenAI account scoping headers, taken from the environment per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountHeaders {
    pub organization: Option<String>,
    pub project: Option<String>,
}

impl AccountHeaders {
    pub fn from_env(env: &dyn ReadEnv) -> Self {
        Self {
            organization: var_non_blank(env, ORGANIZATION_ENV_VAR),
            project: var_non_blank(env, PROJECT_ENV_VAR),
        }
    }
}

/// Builds the `POST` to the upstream URL carrying `body` as JSON.
pub fn build_request(
    config: &UpstreamConfig,
    api_key: &ApiKey,
    account: &AccountHeaders,
    body: Vec<u8>,
) -> Result<Request<Body>, RelayError> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(config.url.as_str())
        .header(AUTHORIZATION, format!("Bearer {}", api_key.expose()))
        .header(CONTENT_TYPE, "application/json");

    if let Some(organization) = &account.organization {
        builder = builder.header(ORGANIZATION_HEADER, organization.as_str());
    }
    if let Some(project) = &account.project {
        builder = builder.header(PROJECT_HEADER, project.as_str());
    }

    // http::Error only says which part was invalid, never the value itself.
    builder
        .body(Body::from(body))
        .map_err(|e| RelayError::Internal(format!("failed to build upstream request: {e}")))
}

/// The subset of upstream response headers passed back to the caller: the request id (renamed)
/// and every `x-ratelimit-*` header. Everything else is dropped.
pub fn forwarded_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for (name, value) in upstream {
        if name.as_str() == REQUEST_ID_HEADER {
            if let Some(trimmed) = trimmed_value(value) {
                forwarded.insert(UPSTREAM_REQUEST_ID_HEADER, trimmed);
            }
        } else if name.as_str().starts_with(RATE_LIMIT_PREFIX) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

fn trimmed_value(value: &HeaderValue) -> Option<HeaderValue> {
    let bytes = value.as_bytes().trim_ascii();
    (!bytes.is_empty())
        .then(|| HeaderValue::from_bytes(bytes).ok())
        .flatten()
}

/// Sends `request` and relays the upstream status, filtered headers and body verbatim.
///
/// Any upstream status, including 4xx/5xx, is a successful relay. Only a transport failure or
/// running past `config.timeout` is an error. There is no retry.
#[instrument(skip(client, config, request), fields(url = %config.url))]
pub async fn forward<T: HttpClient + Sync>(
    client: &T,
    config: &UpstreamConfig,
    request: Request<Body>,
) -> Result<Response, RelayError> {
    let exchange = async {
        let response = client
            .request(request)
            .await
            .map_err(|e| RelayError::UpstreamUnreachable(error_chain(&*e)))?;
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| RelayError::UpstreamUnreachable(format!("failed to read response body: {e}")))?;
        Ok::<_, RelayError>((parts, body))
    };

    let (parts, body) = tokio::time::timeout(config.timeout, exchange)
        .await
        .map_err(|_| {
            RelayError::UpstreamUnreachable(format!(
                "upstream timed out after {}s",
                config.timeout.as_secs_f64()
            ))
        })??;

    info!(status = %parts.status, bytes = body.len(), "Upstream responded");

    let headers = forwarded_headers(&parts.headers);
    debug!(forwarded = headers.len(), "Forwarding upstream headers");

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = parts.status;
    *response.headers_mut() = headers;
    Ok(response)
}
