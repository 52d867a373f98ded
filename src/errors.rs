use crate::credentials::CredentialError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

/// Wire shape of every relay-generated error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ErrorBody {
    fn new(error: &'static str) -> Self {
        Self {
            error,
            detail: None,
        }
    }

    fn with_detail(error: &'static str, detail: impl Into<String>) -> Self {
        Self {
            error,
            detail: Some(detail.into()),
        }
    }
}

/// Every way a relay request can fail. Each one ends the request with a single JSON body of
/// the form `{"error": ..., "detail"?: ...}`.
///
/// Non-2xx responses from upstream are not errors here; they are passed through as-is.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Failed to read request body: {0}")]
    InvalidBody(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("JSON payload must be an object, found {found}")]
    InvalidPayloadShape { found: &'static str },

    /// The detail is logged; the client only ever sees a generic message.
    #[error("Server API key not configured: {0}")]
    Configuration(#[from] CredentialError),

    #[error("Upstream request failed: {0}")]
    UpstreamUnreachable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::InvalidBody(_)
            | RelayError::InvalidJson(_)
            | RelayError::InvalidPayloadShape { .. } => StatusCode::BAD_REQUEST,
            RelayError::Configuration(_) | RelayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            RelayError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            RelayError::MethodNotAllowed => ErrorBody::new("Method not allowed"),
            RelayError::InvalidBody(_) => ErrorBody::new("Invalid request body"),
            RelayError::InvalidJson(e) => ErrorBody::with_detail("Invalid JSON", e.to_string()),
            RelayError::InvalidPayloadShape { found } => {
                ErrorBody::with_detail("JSON payload must be an object", format!("found {found}"))
            }
            RelayError::Configuration(_) => ErrorBody::new("Server API key not configured."),
            RelayError::UpstreamUnreachable(detail) => {
                ErrorBody::with_detail("Upstream request failed", detail.as_str())
            }
            RelayError::Internal(_) => ErrorBody::new("Internal server error"),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match &self {
            RelayError::Configuration(_) => error!(error = %self, "Relay misconfigured"),
            RelayError::UpstreamUnreachable(_) | RelayError::Internal(_) => {
                error!(error = %self, "Relay error")
            }
            RelayError::InvalidBody(_) => warn!(error = %self, "Rejected request"),
            _ => {}
        }

        (self.status(), Json(self.body())).into_response()
    }
}
