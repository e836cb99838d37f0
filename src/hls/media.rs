use crate::{
    hls::{
        line::ManifestLine,
        url::{base_url, resolve},
    },
    target,
};
use tracing::debug;

/// Rewrite a media playlist so every key, init segment and media segment
/// is fetched through the proxy.
///
/// References are resolved against the directory of `url`. Tag lines other
/// than `#EXT-X-KEY` / `#EXT-X-MAP` pass through verbatim. Interior blank
/// lines are dropped; a trailing newline survives.
pub fn rewrite_media(url: &str, body: &str) -> String {
    let base = base_url(url);
    let lines: Vec<&str> = body.split('\n').collect();
    let last = lines.len().saturating_sub(1);
    let mut output: Vec<String> = Vec::with_capacity(lines.len());

    for (idx, raw) in lines.iter().enumerate() {
        match ManifestLine::classify(raw) {
            ManifestLine::Blank if idx == last => output.push(String::new()),
            ManifestLine::Blank => {}
            ManifestLine::Key(tag) => {
                let absolute = resolve(&base, tag.uri());
                debug!("Rewriting KEY URI: {} -> {}", tag.uri(), absolute);
                output.push(tag.with_uri(&target::encode(&absolute)));
            }
            ManifestLine::Map(tag) => {
                let absolute = resolve(&base, tag.uri());
                debug!("Rewriting MAP URI: {} -> {}", tag.uri(), absolute);
                output.push(tag.with_uri(&target::encode(&absolute)));
            }
            ManifestLine::Tag(tag) => output.push(tag.to_string()),
            ManifestLine::Segment(reference) => {
                let absolute = resolve(&base, reference);
                debug!("Rewriting segment: {} -> {}", reference, absolute);
                output.push(target::encode(&absolute));
            }
        }
    }

    output.join("\n")
}

/// Append `query` to every proxy link of an already rewritten playlist.
///
/// Applied per response, after caching, so the stored text never carries
/// one client's credentials.
pub fn with_link_query(text: &str, query: &str) -> String {
    if query.is_empty() {
        return text.to_string();
    }

    text.split('\n')
        .map(|raw| match ManifestLine::classify(raw) {
            ManifestLine::Segment(link) if link.starts_with(target::PROXY_PREFIX) => {
                format!("{}?{}", link, query)
            }
            ManifestLine::Key(tag) | ManifestLine::Map(tag)
                if tag.uri().starts_with(target::PROXY_PREFIX) =>
            {
                tag.with_uri(&format!("{}?{}", tag.uri(), query))
            }
            _ => raw.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
