//! Base-URL derivation and relative reference resolution for playlist entries.

use crate::target::has_http_scheme;
use tracing::debug;
use url::Url;

/// Directory of a playlist URL: origin + path without its last segment,
/// always ending in `/`. Query and fragment are dropped.
pub fn base_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let origin = parsed.origin().ascii_serialization();
            let path = parsed.path();
            if path.is_empty() || path == "/" {
                return format!("{}/", origin);
            }
            let dir = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
            format!("{}{}/", origin, dir)
        }
        Err(e) => {
            debug!("Failed to parse base URL {}: {}", url, e);
            let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
            match url.rfind('/') {
                Some(idx) if idx >= scheme_end => format!("{}/", &url[..idx]),
                _ => format!("{}/", url),
            }
        }
    }
}

/// Resolve a playlist reference against `base`.
///
/// Absolute http(s) references pass through untouched. Everything else goes
/// through RFC 3986 resolution, falling back to an origin-relative join for
/// `/`-rooted references and plain concatenation otherwise.
pub fn resolve(base: &str, reference: &str) -> String {
    if has_http_scheme(reference) {
        return reference.to_string();
    }

    match Url::parse(base).and_then(|b| b.join(reference)) {
        Ok(joined) => joined.to_string(),
        Err(e) => {
            debug!(
                "Failed to resolve URL: base={}, reference={}, error={}",
                base, reference, e
            );
            if reference.starts_with('/')
                && let Ok(parsed) = Url::parse(base)
            {
                return format!("{}{}", parsed.origin().ascii_serialization(), reference);
            }
            let dir = base.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(base);
            format!("{}/{}", dir, reference.trim_start_matches('/'))
        }
    }
}
