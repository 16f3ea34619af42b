//! Page Components
//!
//! Concrete `PageComponent`s for the page types the engine knows:
//!
//! - `video`: the watch page; owns the ad state machine
//! - `channel`: channel pages; whitelist control and URL marker
//! - `listing`: search results and the related sidebar; marker on outgoing links
//!
//! Components never reach into the browser themselves. Reads go through the `DomNode` handles
//! the engine passes in; writes go through a `PageSurface`, and messages and settings through
//! a `Bridge`.

pub mod channel;
pub mod listing;
pub mod video;

use std::rc::Rc;

use serde_json::Value;

use crate::ads::{Command, MediaSnapshot};
use crate::error::Error;
use crate::settings::{Settings, SettingsChange};
use crate::types::Channel;

pub use channel::ChannelComponent;
pub use listing::ListingComponent;
pub use video::VideoComponent;

// =============================================================================
// Host Selectors
// =============================================================================

/// Player container; carries `ad-showing` while an ad plays.
pub const PLAYER: &str = "#movie_player";
pub const AD_SHOWING_CLASS: &str = "ad-showing";
/// Native skip controls across player versions.
pub const SKIP_CONTROL: &str =
    ".ytp-ad-skip-button, .ytp-ad-skip-button-modern, .ytp-skip-ad-button";
pub const OVERLAY_CLOSE: &str = ".ytp-ad-overlay-close-button";
pub const DURATION_READOUT: &str = ".ytp-time-duration";
pub const VIDEO_OWNER: &str = "ytd-video-owner-renderer";
pub const VIDEO_OWNER_LINK: &str = "ytd-video-owner-renderer a";
pub const SUBSCRIBE_BUTTON: &str = "ytd-subscribe-button-renderer";
pub const CHANNEL_HEADER: &str =
    "#channel-header, ytd-c4-tabbed-header-renderer, yt-page-header-renderer";
pub const SEARCH_ITEM: &str = "ytd-video-renderer";
pub const RELATED_ITEM: &str = "ytd-compact-video-renderer";
/// Links inside a listing item that lead to the video.
pub const ITEM_VIDEO_LINK: &str = "a#thumbnail, a#video-title, a#video-title-link";

/// Whitelist button the components inject.
pub const WHITELIST_BUTTON: &str = "#cg-whitelist";
/// Ad-options button and menu.
pub const AD_OPTIONS: &str = "#cg-ad-options";

// =============================================================================
// Seams
// =============================================================================

/// Settings and messaging, as seen from a component.
pub trait Bridge {
    /// The current snapshot. Replaced whole on every update.
    fn settings(&self) -> Rc<Settings>;

    /// Known subscription, from the initial state the extension sent.
    fn subscribed_to(&self, channel: &Channel) -> bool;

    /// Ask the settings owner for a change; the result arrives as a new snapshot.
    fn request_change(&self, change: SettingsChange);

    /// Fire-and-forget message to the extension.
    fn notify(&self, name: &'static str, message: Value);

    /// Ask for the most recent ad the network layer saw for this tab. A known record comes
    /// back later as `HostEvent::AdUpdate`.
    fn request_recent_ad(&self);
}

/// DOM writes a component performs.
pub trait PageSurface<N> {
    /// Carry out a page-level command (controls, media, URL marker, title, prompt).
    fn apply(&self, command: &Command) -> Result<(), Error>;

    /// Remove everything `apply` injected.
    fn remove_controls(&self);

    fn click(&self, node: &N);

    fn set_attribute(&self, node: &N, name: &str, value: &str);
}

/// Media access on the watch page.
pub trait VideoSurface<N>: PageSurface<N> {
    fn media(&self) -> Option<MediaSnapshot>;

    /// `document.hidden`.
    fn hidden(&self) -> bool;
}

/// Apply a command, logging the expected misses.
pub(crate) fn apply_logged<N, S: PageSurface<N> + ?Sized>(surface: &S, command: &Command) {
    if let Err(e) = surface.apply(command) {
        log::debug!("{command:?}: {e}");
    }
}
