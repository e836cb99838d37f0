//! Target codec: maps an absolute upstream URL to and from a single
//! `/proxy/<percent-encoded URL>` path.

use crate::error::{RelayError, Result};
use tracing::debug;

/// Route prefix every rewritten link points at
pub const PROXY_PREFIX: &str = "/proxy/";

/// Build the proxy path for an absolute upstream URL.
pub fn encode(url: &str) -> String {
    format!("{}{}", PROXY_PREFIX, urlencoding::encode(url))
}

/// Recover the upstream URL from the path segment following `/proxy/`.
///
/// The decoded value must start with `http://` or `https://`. A segment
/// that fails to decode but is already a plain URL is accepted as-is.
///
/// # Errors
/// Returns [`RelayError::InvalidTarget`] for empty, undecodable or
/// non-http(s) input.
pub fn decode(segment: &str) -> Result<String> {
    if segment.is_empty() {
        return Err(RelayError::InvalidTarget("empty target".to_string()));
    }

    match urlencoding::decode(segment) {
        Ok(decoded) if has_http_scheme(&decoded) => Ok(decoded.into_owned()),
        _ if has_http_scheme(segment) => {
            debug!("Proxy path was not encoded but looks like a URL: {}", segment);
            Ok(segment.to_string())
        }
        Ok(decoded) => {
            debug!("Decoded proxy target is not http(s): {}", decoded);
            Err(RelayError::InvalidTarget(decoded.into_owned()))
        }
        Err(e) => {
            debug!("Failed to decode proxy target {}: {}", segment, e);
            Err(RelayError::InvalidTarget(segment.to_string()))
        }
    }
}

/// Extract and decode the target from a full request path
/// (`/proxy/<segment>[/<more segments>...]`).
pub fn decode_path(path: &str) -> Result<String> {
    let segment = path
        .strip_prefix(PROXY_PREFIX)
        .ok_or_else(|| RelayError::InvalidTarget(path.to_string()))?;
    decode(segment)
}

/// Case-insensitive `^https?://` check
pub fn has_http_scheme(s: &str) -> bool {
    let lower = |n: usize| s.get(..n).map(|p| p.to_ascii_lowercase());
    lower(7).as_deref() == Some("http://") || lower(8).as_deref() == Some("https://")
}
