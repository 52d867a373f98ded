/// Axum handler for the relay endpoint
use crate::AppState;
use crate::client::HttpClient;
use crate::cors;
use crate::credentials::ApiKey;
use crate::env::var_non_blank;
use crate::errors::RelayError;
use crate::payload::{self, DEFAULT_MODEL_ENV_VAR};
use crate::upstream::{self, AccountHeaders};
use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Largest inbound body the relay will buffer. Anything bigger is rejected as an invalid body.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Handles every method on the relay path. CORS headers are set on whatever comes back,
/// including errors.
#[instrument(skip(state, req), fields(method = %req.method()))]
pub async fn relay_handler<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    req: Request,
) -> Response {
    let origin = cors::allowed_origin(req.headers());

    let mut response = relay(&state, req)
        .await
        .unwrap_or_else(IntoResponse::into_response);

    cors::apply_cors_headers(origin, response.headers_mut());
    response
}

async fn relay<T: HttpClient + Clone + Send + Sync + 'static>(
    state: &AppState<T>,
    req: Request,
) -> Result<Response, RelayError> {
    match *req.method() {
        Method::OPTIONS => {
            debug!("Answering CORS preflight");
            return Ok(StatusCode::NO_CONTENT.into_response());
        }
        Method::POST => {}
        _ => return Err(RelayError::MethodNotAllowed),
    }

    let api_key = resolve_api_key(state).await?;

    let body = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| RelayError::InvalidBody(e.to_string()))?;
    debug!("Received request body of size: {}", body.len());

    let mut payload = payload::decode(&body)?;
    payload::apply_defaults(
        &mut payload,
        var_non_blank(&*state.env, DEFAULT_MODEL_ENV_VAR),
    );

    let account = AccountHeaders::from_env(&*state.env);
    let upstream_body =
        serde_json::to_vec(&payload).map_err(|e| RelayError::Internal(e.to_string()))?;
    let upstream_request =
        upstream::build_request(&state.upstream, &api_key, &account, upstream_body)?;

    upstream::forward(&state.http_client, &state.upstream, upstream_request).await
}

/// Runs the credential chain off the async runtime, since secret files are read with
/// blocking IO.
async fn resolve_api_key<T: HttpClient>(state: &AppState<T>) -> Result<ApiKey, RelayError> {
    let credentials = Arc::clone(&state.credentials);
    let env = Arc::clone(&state.env);
    let fs = Arc::clone(&state.fs);

    let resolved = tokio::task::spawn_blocking(move || credentials.resolve(&*env, &*fs))
        .await
        .map_err(|e| RelayError::Internal(format!("credential lookup task failed: {e}")))?;

    Ok(resolved?)
}
