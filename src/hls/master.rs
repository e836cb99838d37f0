//! Master playlist resolution.
//!
//! A master playlist is collapsed to the media playlist of its highest
//! bandwidth variant, so the player never has to follow a second manifest
//! through the proxy. Variants that are themselves masters are resolved
//! recursively up to [`RecursionContext::max_depth`].

use crate::{
    cache::{Cache, processed_key},
    error::{RelayError, Result},
    hls::{
        classify::{is_manifest, is_master},
        line::{ManifestLine, int_attribute, trim_line},
        media::rewrite_media,
        url::{base_url, resolve},
    },
    upstream::{ClientHints, Fetch},
};
use futures_util::future::{BoxFuture, FutureExt};
use std::time::Duration;
use tracing::{debug, info};

/// Depth bookkeeping for nested master playlists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursionContext {
    pub depth: u32,
    pub max_depth: u32,
}

impl RecursionContext {
    pub fn new(max_depth: u32) -> Self {
        Self {
            depth: 0,
            max_depth,
        }
    }

    pub fn descend(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }

    fn exceeded(&self) -> bool {
        self.depth > self.max_depth
    }
}

/// The variant chosen from a master playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    /// Absolute URL of the variant playlist
    pub url: String,
    /// Declared bandwidth; `None` when found by the `.m3u8` fallback scan
    pub bandwidth: Option<u64>,
}

/// Pick the variant to follow from a master playlist.
///
/// Highest `BANDWIDTH` wins (missing counts as 0) and a later variant
/// replaces an earlier one of equal bandwidth. Without any
/// `#EXT-X-STREAM-INF`, the first line ending in `.m3u8` (or containing
/// `.m3u8?`) is used.
pub fn select_variant(base: &str, body: &str) -> Option<Variant> {
    let lines: Vec<&str> = body.split('\n').collect();
    let mut best: Option<(u64, &str)> = None;

    let mut i = 0;
    while i < lines.len() {
        let line = trim_line(lines[i]);
        if line.starts_with("#EXT-X-STREAM-INF") {
            let bandwidth = int_attribute(line, "BANDWIDTH").unwrap_or(0);
            let next_uri = lines[i + 1..]
                .iter()
                .enumerate()
                .find_map(|(offset, raw)| match ManifestLine::classify(raw) {
                    ManifestLine::Segment(uri) => Some((i + 1 + offset, uri)),
                    _ => None,
                });
            if let Some((uri_idx, uri)) = next_uri {
                if best.is_none_or(|(highest, _)| bandwidth >= highest) {
                    best = Some((bandwidth, uri));
                }
                i = uri_idx;
            }
        }
        i += 1;
    }

    if let Some((bandwidth, uri)) = best {
        return Some(Variant {
            url: resolve(base, uri),
            bandwidth: Some(bandwidth),
        });
    }

    lines
        .iter()
        .find_map(|raw| match ManifestLine::classify(raw) {
            ManifestLine::Segment(uri) if uri.ends_with(".m3u8") || uri.contains(".m3u8?") => {
                Some(uri)
            }
            _ => None,
        })
        .map(|uri| Variant {
            url: resolve(base, uri),
            bandwidth: None,
        })
}

/// Runs the manifest pipeline for one request
pub struct Resolver<'a> {
    pub fetcher: &'a dyn Fetch,
    pub cache: &'a Cache,
    pub hints: &'a ClientHints,
    pub ttl: Duration,
}

impl<'a> Resolver<'a> {
    /// Rewrite any manifest: masters are resolved, media playlists rewritten.
    pub fn process<'b>(
        &'b self,
        url: &'b str,
        body: &'b str,
        ctx: RecursionContext,
    ) -> BoxFuture<'b, Result<String>> {
        async move {
            if is_master(body) {
                debug!("Master playlist detected: {}", url);
                self.resolve_master(url, body, ctx).await
            } else {
                debug!("Media playlist detected: {}", url);
                Ok(rewrite_media(url, body))
            }
        }
        .boxed()
    }

    /// Collapse a master playlist into the rewritten media playlist of its
    /// selected variant.
    ///
    /// # Errors
    /// [`RelayError::RecursionExceeded`] when `ctx.depth > ctx.max_depth`,
    /// or any upstream error from fetching the variant.
    pub async fn resolve_master(
        &self,
        url: &str,
        body: &str,
        ctx: RecursionContext,
    ) -> Result<String> {
        if ctx.exceeded() {
            return Err(RelayError::RecursionExceeded {
                depth: ctx.depth,
                max: ctx.max_depth,
                url: url.to_string(),
            });
        }

        let base = base_url(url);
        let Some(variant) = select_variant(&base, body) else {
            debug!(
                "No variant found in master {}, treating it as a media playlist",
                url
            );
            return Ok(rewrite_media(url, body));
        };

        let key = processed_key(&variant.url);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Processed variant cache hit: {}", variant.url);
            return Ok(cached);
        }

        info!(
            "Selected variant (bandwidth: {:?}, depth: {}): {}",
            variant.bandwidth, ctx.depth, variant.url
        );
        let fetched = self.fetcher.fetch(&variant.url, self.hints).await?;
        let text = String::from_utf8_lossy(&fetched.body);

        let processed = if is_manifest(&fetched.body, &fetched.content_type) {
            self.process(&variant.url, &text, ctx.descend()).await?
        } else {
            debug!(
                "Variant {} is not a manifest (content-type: {:?}), rewriting as media",
                variant.url, fetched.content_type
            );
            rewrite_media(&variant.url, &text)
        };

        self.cache.schedule_put(key, processed.clone(), self.ttl);
        Ok(processed)
    }
}
