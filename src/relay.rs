//! Request orchestration: cache lookup, upstream fetch, classification and
//! manifest rewriting for one proxied target.

use crate::{
    cache::{Cache, RawEntry, raw_key},
    config::Config,
    error::Result,
    hls::{
        classify::is_manifest,
        master::{RecursionContext, Resolver},
    },
    upstream::{ClientHints, Fetch, Fetched},
};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of relaying one target
#[derive(Debug, Clone, PartialEq)]
pub enum Relayed {
    /// Rewritten manifest text
    Manifest(String),
    /// Anything else, returned verbatim with the upstream headers
    Passthrough {
        body: Bytes,
        headers: BTreeMap<String, String>,
    },
}

/// The relay engine, shared by every request
pub struct Relay {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetch>,
    cache: Cache,
}

impl Relay {
    pub fn new(config: Arc<Config>, fetcher: Arc<dyn Fetch>, cache: Cache) -> Self {
        Self {
            config,
            fetcher,
            cache,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }

    /// Relay an already-decoded absolute target URL.
    ///
    /// # Errors
    /// Upstream failures and [`crate::error::RelayError::RecursionExceeded`];
    /// a corrupt raw cache entry is not an error and triggers a fresh fetch.
    pub async fn handle(&self, target: &str, hints: &ClientHints) -> Result<Relayed> {
        let key = raw_key(target);

        if let Some(json) = self.cache.get(&key).await {
            match RawEntry::from_json(&json) {
                Ok(entry) => {
                    debug!("Raw cache hit: {}", target);
                    // Reclassify: the entry may predate knowing it is a manifest
                    if is_manifest(entry.body.as_bytes(), entry.content_type()) {
                        debug!("Cached content is a manifest, reprocessing: {}", target);
                        let text = self.process_manifest(target, &entry.body, hints).await?;
                        return Ok(Relayed::Manifest(text));
                    }
                    return Ok(Relayed::Passthrough {
                        body: Bytes::from(entry.body),
                        headers: entry.headers,
                    });
                }
                Err(e) => warn!("Discarding raw cache entry for {}: {}", target, e),
            }
        }

        let fetched = self.fetcher.fetch(target, hints).await?;
        self.store_raw(key, &fetched);

        if is_manifest(&fetched.body, &fetched.content_type) {
            info!("Rewriting manifest: {}", target);
            let text = String::from_utf8_lossy(&fetched.body);
            let processed = self.process_manifest(target, &text, hints).await?;
            return Ok(Relayed::Manifest(processed));
        }

        debug!(
            "Passing through non-manifest content (type: {:?}): {}",
            fetched.content_type, target
        );
        Ok(Relayed::Passthrough {
            body: fetched.body,
            headers: fetched.headers,
        })
    }

    async fn process_manifest(
        &self,
        target: &str,
        body: &str,
        hints: &ClientHints,
    ) -> Result<String> {
        let resolver = Resolver {
            fetcher: self.fetcher.as_ref(),
            cache: &self.cache,
            hints,
            ttl: self.ttl(),
        };
        resolver
            .process(target, body, RecursionContext::new(self.config.max_recursion))
            .await
    }

    /// Schedule the raw response for caching. Binary bodies are skipped.
    fn store_raw(&self, key: String, fetched: &Fetched) {
        let Ok(body) = std::str::from_utf8(&fetched.body) else {
            debug!("Not caching binary response: {}", key);
            return;
        };
        let entry = RawEntry {
            body: body.to_string(),
            headers: fetched.headers.clone(),
        };
        match entry.to_json() {
            Ok(json) => self.cache.schedule_put(key, json, self.ttl()),
            Err(e) => warn!("Failed to prepare cache entry {}: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::RelayError, target};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HLS: &str = "application/vnd.apple.mpegurl";

    fn relay(cache: Cache) -> Relay {
        let config = Arc::new(Config::default());
        let fetcher = crate::upstream::HttpFetcher::new(&config).unwrap();
        Relay::new(config, Arc::new(fetcher), cache)
    }

    #[tokio::test]
    async fn media_playlist_is_rewritten_and_cached_raw() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", HLS)
                    .set_body_string("#EXTM3U\n#EXTINF:10,\nseg0.ts\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let relay = relay(Cache::new_memory());
        let url = format!("{}/a/index.m3u8", server.uri());

        let first = relay.handle(&url, &ClientHints::default()).await.unwrap();
        relay.cache().flush().await;
        let second = relay.handle(&url, &ClientHints::default()).await.unwrap();

        let expected = format!(
            "#EXTM3U\n#EXTINF:10,\n{}\n",
            target::encode(&format!("{}/a/seg0.ts", server.uri()))
        );
        assert_eq!(first, Relayed::Manifest(expected));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn non_manifest_passes_through_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "video/mp2t")
                    .set_body_bytes(vec![0x47u8, 0xff, 0x00, 0x10]),
            )
            .expect(2)
            .mount(&server)
            .await;

        let relay = relay(Cache::new_memory());
        let url = format!("{}/seg.ts", server.uri());

        for _ in 0..2 {
            match relay.handle(&url, &ClientHints::default()).await.unwrap() {
                Relayed::Passthrough { body, headers } => {
                    assert_eq!(&body[..], &[0x47u8, 0xff, 0x00, 0x10]);
                    assert_eq!(headers.get("content-type").unwrap(), "video/mp2t");
                }
                other => panic!("expected passthrough, got {:?}", other),
            }
            // Binary bodies are never cached, so the second call fetches again
            relay.cache().flush().await;
        }
    }

    #[tokio::test]
    async fn cached_text_is_reclassified_as_manifest() {
        let cache = Cache::new_memory();
        let url = "https://h/a/index.m3u8";
        let entry = RawEntry {
            body: "#EXTM3U\n#EXTINF:10,\nseg0.ts\n".to_string(),
            headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
        };
        cache
            .put(&raw_key(url), entry.to_json().unwrap(), Duration::from_secs(60))
            .await;

        // No upstream exists for h; a fetch would fail
        let relayed = relay(cache).handle(url, &ClientHints::default()).await.unwrap();
        assert_eq!(
            relayed,
            Relayed::Manifest(format!(
                "#EXTM3U\n#EXTINF:10,\n{}\n",
                target::encode("https://h/a/seg0.ts")
            ))
        );
    }

    #[tokio::test]
    async fn cached_non_manifest_returned_verbatim() {
        let cache = Cache::new_memory();
        let url = "https://h/sub.vtt";
        let entry = RawEntry {
            body: "WEBVTT\n".to_string(),
            headers: BTreeMap::from([("content-type".to_string(), "text/vtt".to_string())]),
        };
        cache
            .put(&raw_key(url), entry.to_json().unwrap(), Duration::from_secs(60))
            .await;

        match relay(cache).handle(url, &ClientHints::default()).await.unwrap() {
            Relayed::Passthrough { body, headers } => {
                assert_eq!(&body[..], b"WEBVTT\n");
                assert_eq!(headers.get("content-type").unwrap(), "text/vtt");
            }
            other => panic!("expected passthrough, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn corrupt_cache_entry_falls_back_to_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain text"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Cache::new_memory();
        let url = format!("{}/file.txt", server.uri());
        cache
            .put(&raw_key(&url), "{broken".to_string(), Duration::from_secs(60))
            .await;

        match relay(cache).handle(&url, &ClientHints::default()).await.unwrap() {
            Relayed::Passthrough { body, .. } => assert_eq!(&body[..], b"plain text"),
            other => panic!("expected passthrough, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn upstream_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let err = relay(Cache::disabled())
            .handle(&server.uri(), &ClientHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Upstream { status: 404, .. }));
    }

    #[tokio::test]
    async fn master_resolution_reuses_processed_variant() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/master.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=1200000\nhigh.m3u8\n",
            ))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/high.m3u8"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:10,\nh0.ts\n"),
            )
            .expect(1)
            .mount(&server)
            .await;

        // Distinct query strings miss the raw cache but share the variant
        let relay = relay(Cache::new_memory());
        let first = relay
            .handle(&format!("{}/master.m3u8?a", server.uri()), &ClientHints::default())
            .await
            .unwrap();
        relay.cache().flush().await;
        let second = relay
            .handle(&format!("{}/master.m3u8?b", server.uri()), &ClientHints::default())
            .await
            .unwrap();

        assert_eq!(first, second);
        match first {
            Relayed::Manifest(text) => {
                assert!(text.contains(&target::encode(&format!("{}/h0.ts", server.uri()))))
            }
            other => panic!("expected manifest, got {:?}", other),
        }
    }
}
