//! Typed classification of manifest lines.
//!
//! The rewriter consumes these values in a single pass instead of
//! re-deriving what each line is at every call site.

/// One classified line of manifest text, borrowed from the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLine<'a> {
    /// Any `#` line whose URI (if any) is left alone
    Tag(&'a str),
    /// `#EXT-X-KEY` line carrying a `URI="..."` attribute
    Key(UriTag<'a>),
    /// `#EXT-X-MAP` line carrying a `URI="..."` attribute
    Map(UriTag<'a>),
    /// Non-tag line referencing a segment or child playlist
    Segment(&'a str),
    Blank,
}

/// A tag line split around its quoted `URI` attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTag<'a> {
    pub line: &'a str,
    /// Byte range of the URI value inside `line`, quotes excluded
    pub value_start: usize,
    pub value_end: usize,
}

impl<'a> UriTag<'a> {
    pub fn uri(&self) -> &'a str {
        &self.line[self.value_start..self.value_end]
    }

    /// Rebuild the line with the URI value replaced, everything else verbatim
    pub fn with_uri(&self, uri: &str) -> String {
        let mut out = String::with_capacity(self.line.len() + uri.len());
        out.push_str(&self.line[..self.value_start]);
        out.push_str(uri);
        out.push_str(&self.line[self.value_end..]);
        out
    }
}

/// Byte order mark some origins prepend to manifest text
pub const BOM: char = '\u{FEFF}';

/// Trim whitespace and byte order marks from both ends of a line
pub fn trim_line(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c == BOM)
}

impl<'a> ManifestLine<'a> {
    /// Classify a line. Surrounding whitespace and BOMs are ignored.
    pub fn classify(raw: &'a str) -> Self {
        let line = trim_line(raw);
        if line.is_empty() {
            return ManifestLine::Blank;
        }
        if !line.starts_with('#') {
            return ManifestLine::Segment(line);
        }
        if line.starts_with("#EXT-X-KEY") {
            return find_uri(line).map_or(ManifestLine::Tag(line), ManifestLine::Key);
        }
        if line.starts_with("#EXT-X-MAP") {
            return find_uri(line).map_or(ManifestLine::Tag(line), ManifestLine::Map);
        }
        ManifestLine::Tag(line)
    }
}

/// Locate the first non-empty `URI="..."` value in a tag line.
fn find_uri(line: &str) -> Option<UriTag<'_>> {
    let marker = "URI=\"";
    let value_start = line.find(marker)? + marker.len();
    let len = line[value_start..].find('"')?;
    if len == 0 {
        return None;
    }
    Some(UriTag {
        line,
        value_start,
        value_end: value_start + len,
    })
}

/// Read a decimal attribute such as `BANDWIDTH=<int>` from a tag line.
pub fn int_attribute(line: &str, name: &str) -> Option<u64> {
    let needle = format!("{}=", name);
    let mut search_from = 0;
    while let Some(pos) = line[search_from..].find(&needle) {
        let start = search_from + pos;
        // Skip matches that are the tail of a longer name (AVERAGE-BANDWIDTH)
        let at_boundary = start == 0 || matches!(line.as_bytes()[start - 1], b':' | b',');
        let value_start = start + needle.len();
        if at_boundary {
            let digits: &str = {
                let rest = &line[value_start..];
                let end = rest
                    .find(|c: char| !c.is_ascii_digit())
                    .unwrap_or(rest.len());
                &rest[..end]
            };
            return digits.parse().ok();
        }
        search_from = value_start;
    }
    None
}
