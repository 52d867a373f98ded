//! CORS headers for the relay endpoint.
//!
//! Unlike a generic CORS layer, a non-matching origin is not rejected: the response names the
//! canonical site origin instead, so the browser blocks the read on its side.
use axum::http::{
    HeaderMap, HeaderValue,
    header::{
        ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
        CONTENT_TYPE, ORIGIN,
    },
};

/// Front-end origins allowed to call the relay.
pub const ALLOWED_ORIGINS: [&str; 3] = [
    "https://custodybuddy.com",
    "https://www.custodybuddy.com",
    "https://app.custodybuddy.com",
];

/// Origin announced for callers outside the allow-list.
pub const DEFAULT_ORIGIN: &str = "https://custodybuddy.com";

pub const ALLOW_METHODS: &str = "POST, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, X-Requested-With";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// The `Access-Control-Allow-Origin` value for a request: its own `Origin` when allow-listed,
/// [`DEFAULT_ORIGIN`] otherwise.
pub fn allowed_origin(request_headers: &HeaderMap) -> HeaderValue {
    let requested = request_headers
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok());

    let origin = requested
        .and_then(|requested| {
            ALLOWED_ORIGINS
                .iter()
                .copied()
                .find(|allowed| *allowed == requested)
        })
        .unwrap_or(DEFAULT_ORIGIN);

    HeaderValue::from_static(origin)
}

/// Sets the CORS headers and the JSON content type, replacing any existing values.
pub fn apply_cors_headers(origin: HeaderValue, response_headers: &mut HeaderMap) {
    response_headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    response_headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    response_headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
}
