use crate::{
    cache::Cache,
    config::{CacheBackendType, Config},
    error::Result,
    metrics,
    relay::Relay,
    server::auth::password_hash,
    upstream::{Fetch, HttpFetcher},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Relay engine (fetcher + cache)
    pub relay: Arc<Relay>,
    /// Expected access hash when a password is configured
    pub password_hash: Option<Arc<str>>,
    /// Process start, for the health endpoint
    pub started_at: Instant,
    pub metrics: PrometheusHandle,
}

impl AppState {
    /// Build state with the real HTTP fetcher and the configured cache store
    pub async fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(&config)?;
        let cache = build_cache(&config).await;
        Ok(Self::with_parts(config, Arc::new(fetcher), cache))
    }

    /// Build state around an explicit fetcher and cache
    pub fn with_parts(config: Config, fetcher: Arc<dyn Fetch>, cache: Cache) -> Self {
        let config = Arc::new(config);
        let password_hash = config
            .password
            .as_deref()
            .map(|p| Arc::from(password_hash(p)));

        Self {
            relay: Arc::new(Relay::new(config.clone(), fetcher, cache)),
            config,
            password_hash,
            started_at: Instant::now(),
            metrics: metrics::init(),
        }
    }
}

/// Select the cache store. An unreachable store degrades to no caching.
async fn build_cache(config: &Config) -> Cache {
    match config.cache_backend {
        CacheBackendType::Memory => Cache::new_memory(),
        CacheBackendType::Disabled => Cache::disabled(),
        #[cfg(feature = "valkey")]
        CacheBackendType::Valkey => {
            let url = config.valkey_url.as_deref().unwrap_or_default();
            match Cache::new_valkey(url).await {
                Ok(cache) => cache,
                Err(e) => {
                    warn!("Failed to connect to Valkey ({}), caching disabled", e);
                    Cache::disabled()
                }
            }
        }
        #[cfg(not(feature = "valkey"))]
        CacheBackendType::Valkey => {
            warn!("CACHE_BACKEND=valkey but built without the `valkey` feature, caching disabled");
            Cache::disabled()
        }
    }
}
