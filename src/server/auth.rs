//! Optional password-hash gate in front of the proxy routes.
//!
//! Clients present the hex SHA-256 of the configured password, either as
//! `?auth=<hash>[&t=<unix millis>]` or in `X-Password-Hash`.

use crate::{error::RelayError, server::state::AppState};
use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use tracing::debug;

/// How long an `auth` link stays valid when it carries a `t` timestamp
pub const AUTH_LINK_MAX_AGE_MS: i64 = 10 * 60 * 1000;

pub const PASSWORD_HASH_HEADER: &str = "x-password-hash";

/// Lowercase hex SHA-256 of a password
pub fn password_hash(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Check request credentials against the expected hash.
///
/// The query string takes precedence over the header.
pub fn check_access(
    expected: &str,
    query: Option<&str>,
    header: Option<&str>,
    now_ms: i64,
) -> Result<(), RelayError> {
    let mut auth = None;
    let mut timestamp = None;
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
        match key.as_ref() {
            "auth" => auth = Some(value.into_owned()),
            "t" => timestamp = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(auth) = auth {
        if auth != expected {
            debug!("Access denied: auth hash mismatch");
            return Err(RelayError::Unauthorized);
        }
        if let Some(t) = timestamp {
            let issued: i64 = t.parse().map_err(|_| RelayError::Unauthorized)?;
            if now_ms - issued > AUTH_LINK_MAX_AGE_MS {
                debug!("Access denied: auth link expired");
                return Err(RelayError::Unauthorized);
            }
        }
        return Ok(());
    }

    match header {
        Some(hash) if hash == expected => Ok(()),
        Some(_) => {
            debug!("Access denied: header hash mismatch");
            Err(RelayError::Unauthorized)
        }
        None => {
            debug!("Access denied: no credentials");
            Err(RelayError::Unauthorized)
        }
    }
}

/// Re-serialize the `auth` / `t` query credentials so they can be carried
/// on rewritten proxy links. `None` when the request did not authenticate
/// through the query string.
pub fn link_query(query: Option<&str>) -> Option<String> {
    let mut auth = None;
    let mut timestamp = None;
    for (key, value) in url::form_urlencoded::parse(query?.as_bytes()) {
        match key.as_ref() {
            "auth" => auth = Some(value),
            "t" => timestamp = Some(value),
            _ => {}
        }
    }

    let mut out = url::form_urlencoded::Serializer::new(String::new());
    out.append_pair("auth", &auth?);
    if let Some(t) = timestamp {
        out.append_pair("t", &t);
    }
    Some(out.finish())
}

/// Axum middleware: reject proxy requests without valid credentials.
/// Preflight requests always pass.
pub async fn access_gate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(expected) = state.password_hash.as_deref()
        && req.method() != Method::OPTIONS
    {
        let header = req
            .headers()
            .get(PASSWORD_HASH_HEADER)
            .and_then(|v| v.to_str().ok());
        let now_ms = chrono::Utc::now().timestamp_millis();
        if let Err(e) = check_access(expected, req.uri().query(), header, now_ms) {
            return e.into_response();
        }
    }

    next.run(req).await
}
