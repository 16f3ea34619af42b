//! Settings snapshot and the message payloads that carry it.
//!
//! A `Settings` value is replaced whole on every `settings-update`; nothing updates it field
//! by field on the content side.

use serde::{Deserialize, Serialize};

use crate::lists::ChannelSet;
use crate::types::Channel;

/// Key that triggers the skip path when `keyboardSkip` is on and no key is configured.
pub const DEFAULT_SKIP_KEY: &str = "ArrowRight";

// =============================================================================
// Settings
// =============================================================================

/// Process-wide settings snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub whitelisted: ChannelSet,
    pub blacklisted: ChannelSet,
    pub muted: ChannelSet,
    pub exclude: ChannelSet,
    pub mute_all: bool,
    pub auto_white: bool,
    pub auto_skip: bool,
    pub auto_skip_seconds: f64,
    pub skip_overlays: bool,
    pub skip_ad_errors: bool,
    pub pause_after_ad: bool,
    pub keyboard_skip: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_key: Option<String>,
    pub verify_wl: bool,
    pub limit_ads: bool,
    pub limit_ads_qty: u32,
    pub force_white: ForceWhite,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            whitelisted: ChannelSet::default(),
            blacklisted: ChannelSet::default(),
            muted: ChannelSet::default(),
            exclude: ChannelSet::default(),
            mute_all: false,
            auto_white: false,
            auto_skip: false,
            auto_skip_seconds: 30.0,
            skip_overlays: true,
            skip_ad_errors: true,
            pause_after_ad: false,
            keyboard_skip: false,
            skip_key: None,
            verify_wl: false,
            limit_ads: false,
            limit_ads_qty: 1,
            force_white: ForceWhite::default(),
        }
    }
}

impl Settings {
    pub fn skip_key(&self) -> &str {
        self.skip_key.as_deref().unwrap_or(DEFAULT_SKIP_KEY)
    }
}

/// `forceWhite`: off, on, or on until an epoch-millisecond deadline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ForceWhite {
    Flag(bool),
    Until(f64),
}

impl Default for ForceWhite {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl ForceWhite {
    pub fn is_active(&self, now_ms: f64) -> bool {
        match *self {
            Self::Flag(on) => on,
            Self::Until(deadline) => now_ms < deadline,
        }
    }
}

// =============================================================================
// Message Payloads
// =============================================================================

/// `set-settings` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "param", rename_all = "kebab-case")]
pub enum SettingsChange {
    AddWhite(Channel),
    RemoveWhite(Channel),
    AddBlack(Channel),
    RemoveBlack(Channel),
    AddMute(Channel),
    RemoveMute(Channel),
    AddExclude(Channel),
    RemoveExclude(Channel),
    MuteAll(bool),
}

/// `settings-update` push.
#[derive(Debug, Clone, Deserialize)]
pub struct SettingsUpdate {
    pub settings: Settings,
    /// True in the tab that requested the change.
    #[serde(default)]
    pub initiator: bool,
}

/// `get-settings` reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InitialState {
    pub settings: Settings,
    /// Channels the signed-in user is subscribed to, when the extension knows them.
    pub subscriptions: ChannelSet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_snapshot_uses_defaults() {
        let settings: Settings = serde_json::from_value(json!({
            "whitelisted": [{"id": "UC1"}],
            "muteAll": true,
            "unknownField": 3
        }))
        .unwrap();
        assert!(settings.whitelisted.has(&Channel::from_id("UC1")));
        assert!(settings.mute_all);
        assert_eq!(settings.auto_skip_seconds, 30.0);
        assert_eq!(settings.skip_key(), DEFAULT_SKIP_KEY);
    }

    #[test]
    fn test_force_white_bool_or_number() {
        let on: Settings = serde_json::from_value(json!({"forceWhite": true})).unwrap();
        assert!(on.force_white.is_active(0.0));
        let until: Settings = serde_json::from_value(json!({"forceWhite": 1000})).unwrap();
        assert_eq!(until.force_white, ForceWhite::Until(1000.0));
        assert!(until.force_white.is_active(999.0));
        assert!(!until.force_white.is_active(1000.0));
    }

    #[test]
    fn test_settings_change_wire_shape() {
        let change = SettingsChange::AddWhite(Channel::from_id("UC1"));
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], "add-white");
        assert_eq!(value["param"]["id"], "UC1");
        let mute_all = serde_json::to_value(SettingsChange::MuteAll(true)).unwrap();
        assert_eq!(mute_all["type"], "mute-all");
    }

    #[test]
    fn test_initial_state_ignores_page_extras() {
        let state: InitialState = serde_json::from_value(json!({
            "settings": {"autoWhite": true},
            "subscriptions": [{"id": "UC5"}],
            "accessURLs": {"ID": "https://x"},
            "i18n": {"whitelist": "Whitelist"},
        }))
        .unwrap();
        assert!(state.settings.auto_white);
        assert!(state.subscriptions.has_key("UC5"));
    }
}
