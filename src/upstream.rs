//! Outbound fetches to the origin host.
//!
//! One attempt per call, no retries. Every request carries a User-Agent
//! drawn from the configured pool plus a best-effort `Referer` and
//! `Accept-Language`, so the origin sees something that looks like a player
//! embedded on its own site.

use crate::{
    config::Config,
    error::{RelayError, Result},
    metrics,
};
use async_trait::async_trait;
use bytes::Bytes;
use rand::seq::IndexedRandom;
use reqwest::{Client, header};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Maximum number of characters of an error body kept in [`RelayError::Upstream`]
pub const ERROR_SNIPPET_CHARS: usize = 150;

/// Chooses one User-Agent from a non-empty pool
pub type UserAgentPicker = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

/// Uniform random pick; falls back to the built-in agent on an empty pool
pub fn random_user_agent(pool: &[String]) -> String {
    pool.choose(&mut rand::rng())
        .cloned()
        .unwrap_or_else(|| crate::config::DEFAULT_USER_AGENT.to_string())
}

/// Inbound request headers worth forwarding upstream
#[derive(Debug, Clone, Default)]
pub struct ClientHints {
    pub accept_language: Option<String>,
    pub referer: Option<String>,
}

/// A successful (2xx) upstream response, fully buffered
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    /// `Content-Type` header value, empty when absent
    pub content_type: String,
    /// Response headers with lower-cased names; repeated headers joined by `, `
    pub headers: BTreeMap<String, String>,
}

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Fetch `url`, following redirects.
    ///
    /// # Errors
    /// [`RelayError::Upstream`] for a non-2xx status,
    /// [`RelayError::Network`] for transport failures.
    async fn fetch(&self, url: &str, hints: &ClientHints) -> Result<Fetched>;
}

/// [`Fetch`] over a shared pooled `reqwest` client
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agents: Vec<String>,
    default_accept_language: String,
    pick: UserAgentPicker,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| RelayError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agents: config.user_agents.clone(),
            default_accept_language: config.default_accept_language.clone(),
            pick: Arc::new(random_user_agent),
        })
    }

    /// Replace the User-Agent selection strategy
    pub fn with_picker(mut self, pick: UserAgentPicker) -> Self {
        self.pick = pick;
        self
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, hints: &ClientHints) -> Result<Fetched> {
        let start = Instant::now();
        let user_agent = (self.pick)(&self.user_agents);
        let accept_language = hints
            .accept_language
            .clone()
            .unwrap_or_else(|| self.default_accept_language.clone());
        let referer = hints.referer.clone().or_else(|| origin_of(url));

        debug!("Fetching upstream: {}", url);

        let mut request = self
            .client
            .get(url)
            .header(header::USER_AGENT, user_agent)
            .header(header::ACCEPT, "*/*")
            .header(header::ACCEPT_LANGUAGE, accept_language);
        if let Some(referer) = referer {
            request = request.header(header::REFERER, referer);
        }

        let response = request.send().await.map_err(|e| {
            warn!("Upstream request failed for {}: {}", url, e);
            metrics::record_upstream("network_error", start);
            RelayError::Network {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Upstream returned {} for {}", status, url);
            metrics::record_upstream("http_error", start);
            return Err(RelayError::Upstream {
                url: url.to_string(),
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("").to_string(),
                body_snippet: body.chars().take(ERROR_SNIPPET_CHARS).collect(),
            });
        }

        let headers = flatten_headers(response.headers());
        let content_type = headers.get("content-type").cloned().unwrap_or_default();

        let body = response.bytes().await.map_err(|e| {
            metrics::record_upstream("network_error", start);
            RelayError::Network {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;

        metrics::record_upstream("ok", start);
        debug!(
            "Fetched {}: content-type={:?}, {} bytes",
            url,
            content_type,
            body.len()
        );

        Ok(Fetched {
            body,
            content_type,
            headers,
        })
    }
}

/// `scheme://host[:port]` of a URL, used as the synthesized Referer
fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

fn flatten_headers(map: &header::HeaderMap) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else { continue };
        headers
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}
