use crate::{
    error::Result,
    hls::media::with_link_query,
    metrics,
    relay::Relayed,
    server::{
        auth,
        headers::{
            HLS_CONTENT_TYPE, PREFLIGHT_MAX_AGE, apply_cors, cache_control, forward_upstream,
        },
        state::AppState,
    },
    target,
    upstream::ClientHints,
};
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use std::time::Instant;
use tracing::info;

/// Relay `/proxy/<percent-encoded URL>`.
///
/// The target is decoded from the raw request path, so routers that split
/// it on `/` make no difference.
pub async fn proxy(State(state): State<AppState>, uri: Uri, headers: HeaderMap) -> Response {
    let start = Instant::now();

    match relay(&state, &uri, &headers).await {
        Ok(relayed) => {
            let kind = match relayed {
                Relayed::Manifest(_) => "manifest",
                Relayed::Passthrough { .. } => "passthrough",
            };
            metrics::record_request(kind, 200);
            metrics::record_duration(kind, start);
            // Query credentials ride along on rewritten links
            let link_query = state
                .password_hash
                .as_ref()
                .and_then(|_| auth::link_query(uri.query()));
            render(relayed, link_query.as_deref(), state.config.cache_ttl_secs)
        }
        Err(e) => {
            let status = e.status_code();
            metrics::record_request("error", status.as_u16());
            metrics::record_duration("error", start);
            e.into_response()
        }
    }
}

async fn relay(state: &AppState, uri: &Uri, headers: &HeaderMap) -> Result<Relayed> {
    let target = target::decode_path(uri.path())?;
    info!("Proxy request: {}", target);

    let hints = ClientHints {
        accept_language: header_str(headers, header::ACCEPT_LANGUAGE),
        referer: header_str(headers, header::REFERER),
    };
    state.relay.handle(&target, &hints).await
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn render(relayed: Relayed, link_query: Option<&str>, ttl_secs: u64) -> Response {
    let mut response = match relayed {
        Relayed::Manifest(text) => {
            let text = match link_query {
                Some(query) => with_link_query(&text, query),
                None => text,
            };
            let mut response = (StatusCode::OK, text).into_response();
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(HLS_CONTENT_TYPE),
            );
            response
        }
        Relayed::Passthrough { body, headers } => {
            let mut response = Response::new(Body::from(body));
            forward_upstream(response.headers_mut(), &headers);
            response
        }
    };

    let out = response.headers_mut();
    out.insert(header::CACHE_CONTROL, cache_control(ttl_secs));
    apply_cors(out);
    response
}

/// CORS preflight
pub async fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    apply_cors(headers);
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}
