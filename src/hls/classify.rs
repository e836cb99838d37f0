/// Content types that identify an HLS manifest regardless of its body
const MANIFEST_CONTENT_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Whether a fetched body is an HLS manifest, judged by content type first
/// and the leading `#EXTM3U` marker second.
pub fn is_manifest(body: &[u8], content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    if MANIFEST_CONTENT_TYPES
        .iter()
        .any(|ct| content_type.contains(ct))
    {
        return true;
    }
    skip_leading_noise(body).starts_with(b"#EXTM3U")
}

/// Skip leading ASCII whitespace and UTF-8 byte order marks
fn skip_leading_noise(mut body: &[u8]) -> &[u8] {
    loop {
        body = body.trim_ascii_start();
        match body.strip_prefix(UTF8_BOM) {
            Some(rest) => body = rest,
            None => return body,
        }
    }
}

/// Whether manifest text is a master playlist
pub fn is_master(body: &str) -> bool {
    body.contains("#EXT-X-STREAM-INF") || body.contains("#EXT-X-MEDIA:")
}
