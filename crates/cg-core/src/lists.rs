//! List membership and the effective-whitelist policy.
//!
//! Lists are rebuilt from every settings snapshot. The content side never edits them in
//! place: `Oracle::toggle` returns the change to request, and the settings owner applies it.

use serde::{Deserialize, Serialize};

use crate::settings::{Settings, SettingsChange};
use crate::types::Channel;

// =============================================================================
// ChannelSet
// =============================================================================

/// Ordered collection of channels.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}

impl ChannelSet {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn has(&self, channel: &Channel) -> bool {
        self.position(channel).is_some()
    }

    /// Membership by bare id or username.
    pub fn has_key(&self, key: &str) -> bool {
        self.channels.iter().any(|c| c.matches_key(key))
    }

    fn position(&self, channel: &Channel) -> Option<usize> {
        if !channel.is_valid() {
            return None;
        }
        self.channels.iter().position(|c| c == channel)
    }

    /// Add a channel. Returns false if it was already present or invalid.
    pub fn add(&mut self, channel: Channel) -> bool {
        if !channel.is_valid() || self.has(&channel) {
            return false;
        }
        self.channels.push(channel);
        true
    }

    /// Remove a channel. Returns false if it was not present.
    pub fn remove(&mut self, channel: &Channel) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| c != channel);
        self.channels.len() != before
    }

    pub fn remove_key(&mut self, key: &str) -> bool {
        let before = self.channels.len();
        self.channels.retain(|c| !c.matches_key(key));
        self.channels.len() != before
    }

    /// Remove every channel in `list`, returning how many were removed.
    pub fn remove_all(&mut self, list: &[Channel]) -> usize {
        list.iter().filter(|c| self.remove(c)).count()
    }

    /// Look up the stored entry (which may carry a display name) for a channel.
    pub fn get(&self, channel: &Channel) -> Option<&Channel> {
        self.position(channel).map(|i| &self.channels[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut set = Self::default();
        for channel in iter {
            set.add(channel);
        }
        set
    }
}

// =============================================================================
// Membership
// =============================================================================

bitflags::bitflags! {
    /// Which lists a channel appears in, plus derived status.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Membership: u8 {
        const WHITELISTED = 1 << 0;
        const BLACKLISTED = 1 << 1;
        const MUTED = 1 << 2;
        const EXCLUDED = 1 << 3;
        /// Whitelisted only through subscription
        const AUTO_WHITELISTED = 1 << 4;
        /// Explicit or automatic
        const EFFECTIVE = 1 << 5;
    }
}

// =============================================================================
// Oracle
// =============================================================================

/// Outcome of a whitelist toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct Toggle {
    /// The change to request from the settings owner.
    pub change: SettingsChange,
    /// Whether the channel will be effectively whitelisted once applied.
    pub whitelisted: bool,
}

/// Membership queries against one settings snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Oracle<'a> {
    settings: &'a Settings,
}

impl<'a> Oracle<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// `whitelist.has(c) || (autoWhite && subscribed && !exclude.has(c))`
    pub fn effective_whitelist(&self, channel: &Channel, subscribed: bool) -> bool {
        self.settings.whitelisted.has(channel) || self.auto_whitelisted(channel, subscribed)
    }

    fn auto_whitelisted(&self, channel: &Channel, subscribed: bool) -> bool {
        self.settings.auto_white && subscribed && !self.settings.exclude.has(channel)
    }

    /// Whether ads should be allowed for this channel right now.
    ///
    /// Like `effective_whitelist`, but also honours a `forceWhite` override.
    pub fn allows_ads(&self, channel: &Channel, subscribed: bool, now_ms: f64) -> bool {
        self.settings.force_white.is_active(now_ms) || self.effective_whitelist(channel, subscribed)
    }

    pub fn blacklisted(&self, channel: &Channel) -> bool {
        self.settings.blacklisted.has(channel)
    }

    /// Whether an ad from `advertiser` should play muted: `muteAll` XOR mute-list membership.
    pub fn should_mute(&self, advertiser: Option<&Channel>) -> bool {
        let listed = advertiser.is_some_and(|c| self.settings.muted.has(c));
        self.settings.mute_all != listed
    }

    pub fn membership(&self, channel: &Channel, subscribed: bool) -> Membership {
        let s = self.settings;
        let mut flags = Membership::empty();
        flags.set(Membership::WHITELISTED, s.whitelisted.has(channel));
        flags.set(Membership::BLACKLISTED, s.blacklisted.has(channel));
        flags.set(Membership::MUTED, s.muted.has(channel));
        flags.set(Membership::EXCLUDED, s.exclude.has(channel));
        flags.set(
            Membership::AUTO_WHITELISTED,
            !flags.contains(Membership::WHITELISTED) && self.auto_whitelisted(channel, subscribed),
        );
        flags.set(Membership::EFFECTIVE, self.effective_whitelist(channel, subscribed));
        flags
    }

    /// Flip the effective whitelist status of a channel.
    ///
    /// A channel whitelisted only through its subscription is un-whitelisted by adding it to
    /// `exclude`; the subscription-derived default is never stored, so removing it from the
    /// explicit list would do nothing.
    pub fn toggle(&self, channel: &Channel, subscribed: bool) -> Toggle {
        let explicit = self.settings.whitelisted.has(channel);
        if explicit {
            return Toggle {
                change: SettingsChange::RemoveWhite(channel.clone()),
                whitelisted: false,
            };
        }
        if self.auto_whitelisted(channel, subscribed) {
            return Toggle {
                change: SettingsChange::AddExclude(channel.clone()),
                whitelisted: false,
            };
        }
        Toggle {
            change: SettingsChange::AddWhite(channel.clone()),
            whitelisted: true,
        }
    }
}
