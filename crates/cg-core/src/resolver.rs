//! Channel Identity Resolver
//!
//! Pulls a channel identity out of whatever the host has rendered so far. The host's own
//! data object is preferred; channel links are the fallback. An invalid result means
//! "not known yet", never an error, and callers must not let it replace a valid identity.

use crate::dom::DomNode;
use crate::path::DataSource;
use crate::types::Channel;
use crate::url::parse_channel_href;

/// Where a page type keeps identity fields inside its host data object.
///
/// Each field lists candidate paths, tried in order. The host moves these around between
/// rollouts.
#[derive(Debug, Clone, Copy)]
pub struct IdentityPaths {
    pub id: &'static [&'static str],
    /// Canonical URL (`/user/x`, `/@x`) the username is parsed from.
    pub canonical: &'static [&'static str],
    pub display: &'static [&'static str],
    pub subscribed: &'static [&'static str],
}

/// `ytd-video-owner-renderer` on the watch page.
pub const VIDEO_OWNER: IdentityPaths = IdentityPaths {
    id: &[
        "data.navigationEndpoint.browseEndpoint.browseId",
        "data.title.runs.0.navigationEndpoint.browseEndpoint.browseId",
    ],
    canonical: &[
        "data.navigationEndpoint.browseEndpoint.canonicalBaseUrl",
        "data.title.runs.0.navigationEndpoint.browseEndpoint.canonicalBaseUrl",
    ],
    display: &["data.title.runs.0.text", "data.title.simpleText"],
    subscribed: &[
        "data.subscriptionButton.subscribed",
        "data.subscribeButton.subscribeButtonRenderer.subscribed",
    ],
};

/// Channel page header.
pub const CHANNEL_HEADER: IdentityPaths = IdentityPaths {
    id: &["data.channelId", "data.navigationEndpoint.browseEndpoint.browseId"],
    canonical: &["data.navigationEndpoint.browseEndpoint.canonicalBaseUrl"],
    display: &["data.title", "data.title.simpleText"],
    subscribed: &["data.subscribeButton.subscribeButtonRenderer.subscribed"],
};

/// `ytd-video-renderer` in search results.
pub const SEARCH_ITEM: IdentityPaths = IdentityPaths {
    id: &["data.ownerText.runs.0.navigationEndpoint.browseEndpoint.browseId"],
    canonical: &["data.ownerText.runs.0.navigationEndpoint.browseEndpoint.canonicalBaseUrl"],
    display: &["data.ownerText.runs.0.text"],
    subscribed: &[],
};

/// `ytd-compact-video-renderer` in the related sidebar.
pub const RELATED_ITEM: IdentityPaths = IdentityPaths {
    id: &["data.longBylineText.runs.0.navigationEndpoint.browseEndpoint.browseId"],
    canonical: &["data.longBylineText.runs.0.navigationEndpoint.browseEndpoint.canonicalBaseUrl"],
    display: &["data.longBylineText.runs.0.text", "data.shortBylineText.runs.0.text"],
    subscribed: &[],
};

/// A resolved identity and, if the source said, whether the user is subscribed.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub channel: Channel,
    pub subscribed: Option<bool>,
}

/// Read an identity from a host data object.
pub fn from_data<D: DataSource>(data: &D, paths: &IdentityPaths) -> Identity {
    let mut channel = Channel::default();
    if let Some(id) = data.lookup_any(paths.id) {
        channel.id = id;
    }
    if let Some(canonical) = data.lookup_any(paths.canonical) {
        if let Some(parsed) = parse_channel_href(&canonical) {
            channel.merge(&parsed);
        }
    }
    if let Some(display) = data.lookup_any(paths.display) {
        channel.display = display;
    }
    let subscribed = paths.subscribed.iter().find_map(|p| data.lookup_bool(p));
    Identity {
        channel,
        subscribed,
    }
}

/// Read an identity from channel links under `root`.
///
/// The first `/channel/` or `/user/` link supplies the identity; the display text comes
/// from the first channel link whose text is non-empty.
pub fn from_anchors<N: DomNode>(root: &N) -> Channel {
    let mut channel = Channel::default();
    let mut anchors = root.query_all("a[href]");
    if root.matches("a[href]") {
        anchors.insert(0, root.clone());
    }

    for anchor in anchors {
        let Some(parsed) = anchor.attribute("href").as_deref().and_then(parse_channel_href) else {
            continue;
        };
        if !channel.is_valid() {
            channel.merge(&parsed);
        }
        if channel.display.is_empty() {
            let text = anchor.text();
            let text = text.trim();
            if !text.is_empty() {
                channel.display = text.to_string();
            }
        }
        if channel.is_valid() && !channel.display.is_empty() {
            break;
        }
    }
    channel
}

/// Resolve the identity rendered at `node`, or `None` if nothing valid is there yet.
pub fn resolve<N: DomNode>(node: &N, paths: &IdentityPaths) -> Option<Identity> {
    let mut identity = node
        .host_data()
        .map(|data| from_data(&data, paths))
        .unwrap_or(Identity {
            channel: Channel::default(),
            subscribed: None,
        });

    if !identity.channel.is_valid() || identity.channel.display.is_empty() {
        let linked = from_anchors(node);
        if !identity.channel.is_valid() || !identity.channel.differs_from(&linked) {
            identity.channel.merge(&linked);
        }
    }

    identity.channel.is_valid().then_some(identity)
}
