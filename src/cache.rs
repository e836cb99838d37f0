//! TTL key-value cache for fetched and processed manifests.
//!
//! Two namespaces share one keyspace: `proxy_raw:<url>` holds the verbatim
//! upstream body plus headers as JSON, `m3u8_processed:<url>` holds the
//! final rewritten text of a resolved variant. Reads and writes are
//! best-effort: a failing store looks like a miss, a failing write is
//! logged and dropped.

use crate::{
    error::{RelayError, Result},
    metrics,
};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[cfg(feature = "valkey")]
use redis::aio::ConnectionManager;
#[cfg(feature = "valkey")]
use tracing::info;

/// Namespace for verbatim upstream responses
pub const RAW_NAMESPACE: &str = "proxy_raw";
/// Namespace for rewritten variant playlists
pub const PROCESSED_NAMESPACE: &str = "m3u8_processed";

pub fn raw_key(url: &str) -> String {
    format!("{}:{}", RAW_NAMESPACE, url)
}

pub fn processed_key(url: &str) -> String {
    format!("{}:{}", PROCESSED_NAMESPACE, url)
}

fn namespace_of(key: &str) -> &'static str {
    if key.starts_with(PROCESSED_NAMESPACE) {
        PROCESSED_NAMESPACE
    } else {
        RAW_NAMESPACE
    }
}

/// A cached upstream response in the `proxy_raw` namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub body: String,
    /// Lower-cased header names
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl RawEntry {
    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Internal(format!("failed to encode cache entry: {e}")))
    }

    /// # Errors
    /// [`RelayError::CacheCorrupt`] when the stored value is not a valid entry.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RelayError::CacheCorrupt(e.to_string()))
    }
}

#[derive(Clone, Debug)]
struct CachedEntry {
    value: String,
    stored_at: Instant,
    ttl: Duration,
}

/// Internal storage backend
#[derive(Clone)]
enum Backend {
    Memory {
        entries: Arc<DashMap<String, CachedEntry>>,
    },
    #[cfg(feature = "valkey")]
    Valkey {
        conn: ConnectionManager,
        key_prefix: String,
    },
    Disabled,
}

/// Cache handle, same public API regardless of backend
#[derive(Clone)]
pub struct Cache {
    backend: Backend,
    /// Detached writes, tracked so shutdown and tests can drain them
    writes: TaskTracker,
}

impl Cache {
    /// Create an in-process cache
    pub fn new_memory() -> Self {
        Self::with_backend(Backend::Memory {
            entries: Arc::new(DashMap::new()),
        })
    }

    /// Create a cache with no store: reads always miss, writes are skipped
    pub fn disabled() -> Self {
        Self::with_backend(Backend::Disabled)
    }

    /// Create a Valkey-backed cache
    #[cfg(feature = "valkey")]
    pub async fn new_valkey(url: &str) -> std::result::Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Valkey at {}", url);
        Ok(Self::with_backend(Backend::Valkey {
            conn,
            key_prefix: "hls-relay".to_string(),
        }))
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            writes: TaskTracker::new(),
        }
    }

    /// Number of stored entries, live or not yet swept (0 for Valkey)
    pub fn len(&self) -> usize {
        match &self.backend {
            Backend::Memory { entries } => entries.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            Backend::Memory { .. } => "memory",
            #[cfg(feature = "valkey")]
            Backend::Valkey { .. } => "valkey",
            Backend::Disabled => "none",
        }
    }

    /// Look up a live entry
    pub async fn get(&self, key: &str) -> Option<String> {
        let value = match &self.backend {
            Backend::Memory { entries } => memory_get(entries, key),
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                let mut conn = conn.clone();
                match redis::cmd("GET")
                    .arg(format!("{}:{}", key_prefix, key))
                    .query_async::<Option<String>>(&mut conn)
                    .await
                {
                    Ok(value) => value,
                    Err(e) => {
                        warn!("Valkey GET failed for {}: {}", key, e);
                        None
                    }
                }
            }
            Backend::Disabled => None,
        };

        let hit = value.is_some();
        debug!("Cache {} for {}", if hit { "HIT" } else { "MISS" }, key);
        metrics::record_cache_lookup(namespace_of(key), hit);
        value
    }

    /// Store a value. Failures are logged, never returned.
    pub async fn put(&self, key: &str, value: String, ttl: Duration) {
        match &self.backend {
            Backend::Memory { entries } => {
                entries.insert(
                    key.to_string(),
                    CachedEntry {
                        value,
                        stored_at: Instant::now(),
                        ttl,
                    },
                );
                debug!("Cache write: {}", key);
            }
            #[cfg(feature = "valkey")]
            Backend::Valkey { conn, key_prefix } => {
                let mut conn = conn.clone();
                if let Err(e) = redis::cmd("SET")
                    .arg(format!("{}:{}", key_prefix, key))
                    .arg(value)
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async::<()>(&mut conn)
                    .await
                {
                    warn!("Valkey SET failed for {}: {}", key, e);
                    metrics::record_cache_write_failure();
                } else {
                    debug!("Cache write: {}", key);
                }
            }
            Backend::Disabled => {
                debug!("No cache store bound, skipping write: {}", key);
            }
        }
    }

    /// Schedule a write without waiting for it. The caller never observes
    /// the outcome.
    pub fn schedule_put(&self, key: String, value: String, ttl: Duration) {
        if matches!(self.backend, Backend::Disabled) {
            return;
        }
        let cache = self.clone();
        self.writes.spawn(async move {
            cache.put(&key, value, ttl).await;
        });
    }

    /// Remove expired entries, returning how many were dropped
    /// (no-op for Valkey, TTL is native)
    pub fn cleanup_expired(&self) -> usize {
        match &self.backend {
            Backend::Memory { entries } => {
                let before = entries.len();
                entries.retain(|_, entry| entry.stored_at.elapsed() < entry.ttl);
                before.saturating_sub(entries.len())
            }
            #[cfg(feature = "valkey")]
            Backend::Valkey { .. } => 0,
            Backend::Disabled => 0,
        }
    }

    /// Sweep expired entries every `period` until the returned handle is
    /// aborted. `None` when the backend expires entries on its own.
    pub fn spawn_sweeper(&self, period: Duration) -> Option<JoinHandle<()>> {
        if !matches!(self.backend, Backend::Memory { .. }) {
            return None;
        }
        let cache = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.cleanup_expired();
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
        }))
    }

    /// Wait for every scheduled write issued so far
    pub async fn flush(&self) {
        self.writes.close();
        self.writes.wait().await;
        self.writes.reopen();
    }
}

fn memory_get(entries: &DashMap<String, CachedEntry>, key: &str) -> Option<String> {
    let entry = entries.get(key)?;
    if entry.stored_at.elapsed() < entry.ttl {
        return Some(entry.value.clone());
    }
    // Stale: drop the read guard before removing
    drop(entry);
    entries.remove(key);
    None
}

impl Default for Cache {
    fn default() -> Self {
        Self::new_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn hit_within_ttl() {
        let cache = Cache::new_memory();
        cache.put("proxy_raw:https://h/a.m3u8", "body".to_string(), TTL).await;

        assert_eq!(
            cache.get("proxy_raw:https://h/a.m3u8").await,
            Some("body".to_string())
        );
    }

    #[tokio::test]
    async fn miss_for_unknown_key() {
        let cache = Cache::new_memory();
        assert_eq!(cache.get("proxy_raw:https://unknown/a.m3u8").await, None);
    }

    #[tokio::test]
    async fn miss_after_ttl() {
        let cache = Cache::new_memory();
        cache
            .put("k", "body".to_string(), Duration::from_millis(1))
            .await;

        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(cache.get("k").await, None, "Entry should be stale after TTL");
    }

    #[tokio::test]
    async fn cleanup_drops_only_expired_entries() {
        let cache = Cache::new_memory();
        for i in 0..100 {
            cache
                .put(&format!("proxy_raw:{i}"), "v".to_string(), Duration::from_millis(1))
                .await;
        }
        cache.put("proxy_raw:live", "v".to_string(), TTL).await;

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.cleanup_expired(), 100);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("proxy_raw:live").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn sweeper_evicts_without_reads() {
        let cache = Cache::new_memory();
        cache
            .put("m3u8_processed:https://h/v.m3u8", "text".to_string(), Duration::from_millis(1))
            .await;

        let sweeper = cache
            .spawn_sweeper(Duration::from_millis(10))
            .expect("memory cache sweeps");
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn disabled_cache_has_no_sweeper() {
        assert!(Cache::disabled().spawn_sweeper(Duration::from_secs(1)).is_none());
    }

    #[tokio::test]
    async fn overwrite_refreshes_entry() {
        let cache = Cache::new_memory();
        cache.put("k", "old".to_string(), TTL).await;
        cache.put("k", "new".to_string(), TTL).await;

        assert_eq!(cache.get("k").await, Some("new".to_string()));
    }

    #[tokio::test]
    async fn disabled_cache_never_hits() {
        let cache = Cache::disabled();
        cache.put("k", "v".to_string(), TTL).await;
        cache.schedule_put("k".to_string(), "v".to_string(), TTL);
        cache.flush().await;

        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.backend_name(), "none");
    }

    #[tokio::test]
    async fn scheduled_write_lands_after_flush() {
        let cache = Cache::new_memory();
        cache.schedule_put("m3u8_processed:https://h/v.m3u8".to_string(), "text".to_string(), TTL);
        cache.flush().await;

        assert_eq!(
            cache.get("m3u8_processed:https://h/v.m3u8").await,
            Some("text".to_string())
        );

        // Tracker is usable again after a flush
        cache.schedule_put("k2".to_string(), "v2".to_string(), TTL);
        cache.flush().await;
        assert_eq!(cache.get("k2").await, Some("v2".to_string()));
    }

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(raw_key("https://h/a"), "proxy_raw:https://h/a");
        assert_eq!(processed_key("https://h/a"), "m3u8_processed:https://h/a");
        assert_eq!(namespace_of("m3u8_processed:x"), PROCESSED_NAMESPACE);
        assert_eq!(namespace_of("proxy_raw:x"), RAW_NAMESPACE);
    }

    #[test]
    fn raw_entry_json_shape() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "video/mp2t".to_string());
        let entry = RawEntry {
            body: "data".to_string(),
            headers,
        };

        let json = entry.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["body"], "data");
        assert_eq!(value["headers"]["content-type"], "video/mp2t");

        let back = RawEntry::from_json(&json).unwrap();
        assert_eq!(back.content_type(), "video/mp2t");
    }

    #[test]
    fn corrupt_raw_entry_is_reported() {
        assert!(matches!(
            RawEntry::from_json("{not json"),
            Err(RelayError::CacheCorrupt(_))
        ));
        assert!(matches!(
            RawEntry::from_json(r#"{"headers":{}}"#),
            Err(RelayError::CacheCorrupt(_))
        ));
    }
}
