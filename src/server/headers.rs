//! Response header helpers shared by every proxy response.

use axum::{
    http::{HeaderMap, HeaderName, HeaderValue, header},
    response::Response,
};

pub const ALLOW_METHODS: &str = "GET, HEAD, POST, OPTIONS";
pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
/// Preflight cache lifetime in seconds
pub const PREFLIGHT_MAX_AGE: &str = "86400";

/// Upstream headers never forwarded to the client
const SKIPPED_UPSTREAM_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "content-encoding",
    "upgrade",
];

/// Set the wildcard CORS headers, replacing any upstream values
pub fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}

pub fn with_cors(mut response: Response) -> Response {
    apply_cors(response.headers_mut());
    response
}

pub fn cache_control(ttl_secs: u64) -> HeaderValue {
    // Digits only, always a valid header value
    HeaderValue::from_str(&format!("public, max-age={}", ttl_secs))
        .unwrap_or_else(|_| HeaderValue::from_static("public"))
}

/// Copy forwardable upstream headers into `target`
pub fn forward_upstream<'a>(
    target: &mut HeaderMap,
    upstream: impl IntoIterator<Item = (&'a String, &'a String)>,
) {
    for (name, value) in upstream {
        if SKIPPED_UPSTREAM_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            target.insert(name, value);
        }
    }
}
