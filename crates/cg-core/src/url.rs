//! URL utilities
//!
//! Marker reflection for the downstream ad-blocking ruleset, page-kind detection and channel
//! link parsing. These work directly on string slices.

use crate::types::Channel;

/// Marker telling the external ruleset that ads are allowed on this page.
pub const ALLOW_MARKER: &str = "&disableadblock=1";
/// Neutral query key used when the URL has no query for the marker to join.
pub const PLACEHOLDER_QUERY: &str = "?igno=re";

// =============================================================================
// Marker Reflection
// =============================================================================

/// Add or remove the allow marker.
///
/// Idempotent: `reflect(&reflect(u, b), b) == reflect(u, b)`, and the result for `b` does not
/// depend on whether `u` was previously reflected either way.
pub fn reflect(url: &str, allow: bool) -> String {
    let (base, fragment) = split_fragment(url);

    let mut out = base.replace(ALLOW_MARKER, "");
    if let Some(stripped) = out.strip_suffix(PLACEHOLDER_QUERY) {
        out.truncate(stripped.len());
    }

    if allow {
        if !out.contains('?') {
            out.push_str(PLACEHOLDER_QUERY);
        }
        out.push_str(ALLOW_MARKER);
    }

    out.push_str(fragment);
    out
}

/// True if the URL currently carries the allow marker.
#[inline]
pub fn is_reflected(url: &str) -> bool {
    split_fragment(url).0.contains(ALLOW_MARKER)
}

#[inline]
fn split_fragment(url: &str) -> (&str, &str) {
    match url.find('#') {
        Some(pos) => url.split_at(pos),
        None => (url, ""),
    }
}

// =============================================================================
// Path / Query Extraction
// =============================================================================

/// Get the position after "://".
#[inline]
fn get_scheme_end(url: &str) -> Option<usize> {
    let pos = url.find("://")?;
    if url[..pos].contains(['/', '?', '#']) {
        return None;
    }
    Some(pos + 3)
}

/// Extract the path portion of a URL. Relative URLs (`/watch?v=..`) are accepted.
pub fn extract_path(url: &str) -> &str {
    let rest_start = match get_scheme_end(url) {
        Some(scheme_end) => match url[scheme_end..].find(['/', '?', '#']) {
            Some(i) if url.as_bytes()[scheme_end + i] == b'/' => scheme_end + i,
            _ => return "/",
        },
        None => 0,
    };

    let rest = &url[rest_start..];
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    if end == 0 {
        "/"
    } else {
        &rest[..end]
    }
}

/// `scheme://host[:port]`, or `""` for relative URLs.
pub fn origin(url: &str) -> &str {
    let Some(scheme_end) = get_scheme_end(url) else {
        return "";
    };
    match url[scheme_end..].find(['/', '?', '#']) {
        Some(i) => &url[..scheme_end + i],
        None => url,
    }
}

// =============================================================================
// Page Kinds
// =============================================================================

/// The page types the engine knows how to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    Video,
    Channel,
    Search,
}

impl PageKind {
    /// Classify a URL by its path.
    pub fn from_url(url: &str) -> Option<Self> {
        let path = extract_path(url);
        if path == "/watch" || path.starts_with("/watch/") {
            Some(Self::Video)
        } else if path == "/results" {
            Some(Self::Search)
        } else if is_channel_path(path) {
            Some(Self::Channel)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Channel => "channel",
            Self::Search => "search",
        }
    }
}

fn is_channel_path(path: &str) -> bool {
    ["/channel/", "/user/", "/c/", "/@"]
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

// =============================================================================
// Channel Links
// =============================================================================

/// Parse a channel identity out of a link.
///
/// `/channel/<id>` yields an id; `/user/<name>` and `/@<handle>` yield a username.
pub fn parse_channel_href(href: &str) -> Option<Channel> {
    let path = extract_path(href);

    if let Some(rest) = path.strip_prefix("/channel/") {
        let id = first_segment(rest);
        return (!id.is_empty()).then(|| Channel::from_id(id));
    }
    if let Some(rest) = path.strip_prefix("/user/") {
        let name = first_segment(rest);
        return (!name.is_empty()).then(|| Channel::from_username(name));
    }
    if let Some(rest) = path.strip_prefix("/@") {
        let handle = first_segment(rest);
        return (!handle.is_empty()).then(|| Channel::from_username(format!("@{handle}")));
    }
    None
}

#[inline]
fn first_segment(rest: &str) -> &str {
    rest.split('/').next().unwrap_or("")
}
