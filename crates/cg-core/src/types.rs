//! Core type definitions for ChannelGate
//!
//! These types mirror the JSON payloads exchanged with the extension and are used
//! throughout the engine.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// =============================================================================
// Channel
// =============================================================================

/// Normalized creator identity.
///
/// Equality is by `id` when both sides carry one, otherwise by `username`. A channel with
/// neither is invalid and equal to nothing, itself included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub username: String,
    pub display: String,
}

impl Channel {
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        display: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            display: display.into(),
        }
    }

    /// Channel known only by its id.
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Channel known only by its legacy username or handle.
    pub fn from_username(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    /// Identity key: `id` when present, else `username`.
    #[inline]
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.username
        } else {
            &self.id
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() || !self.username.is_empty()
    }

    /// True if `key` names this channel by id or username.
    pub fn matches_key(&self, key: &str) -> bool {
        !key.is_empty() && (self.id == key || self.username == key)
    }

    /// True if `other` is known to be a different channel.
    ///
    /// Unlike `!=`, two channels that cannot be compared (one has only an id, the other only
    /// a username) are not considered a change.
    pub fn differs_from(&self, other: &Channel) -> bool {
        if !self.id.is_empty() && !other.id.is_empty() {
            return self.id != other.id;
        }
        if !self.username.is_empty() && !other.username.is_empty() {
            return self.username != other.username;
        }
        false
    }

    /// Fill in whatever `other` knows that this channel does not.
    pub fn merge(&mut self, other: &Channel) {
        if self.id.is_empty() {
            self.id.clone_from(&other.id);
        }
        if self.username.is_empty() {
            self.username.clone_from(&other.username);
        }
        if self.display.is_empty() {
            self.display.clone_from(&other.display);
        }
    }

    /// Name suitable for UI: display text, else the key.
    pub fn label(&self) -> &str {
        if self.display.is_empty() {
            self.key()
        } else {
            &self.display
        }
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        if !self.id.is_empty() && !other.id.is_empty() {
            return self.id == other.id;
        }
        !self.username.is_empty() && self.username == other.username
    }
}

// =============================================================================
// Ad
// =============================================================================

/// An ad observed by the network layer.
///
/// Immutable once constructed. `channel` is the advertiser's channel, not the channel
/// being watched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ad {
    pub video_id: String,
    #[serde(rename = "channelId")]
    pub channel: Channel,
    pub title: String,
    #[serde(deserialize_with = "de_seconds")]
    pub length_seconds: f64,
    pub blocked: bool,
    pub details: Value,
    /// Epoch milliseconds at which the ad request was seen.
    pub timestamp: f64,
}

impl Ad {
    /// True if the declared length is known.
    #[inline]
    pub fn has_length(&self) -> bool {
        self.length_seconds.is_finite() && self.length_seconds > 0.0
    }
}

/// The host reports lengths as strings in some payloads and numbers in others.
fn de_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Parse an on-screen duration readout such as `0:15`, `1:02:03` or `15`.
pub fn parse_duration_text(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for part in text.split(':') {
        let value: u32 = part.trim().parse().ok()?;
        total = total * 60.0 + f64::from(value);
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_and_validity() {
        assert_eq!(Channel::from_id("UC123").key(), "UC123");
        assert_eq!(Channel::new("", "bob", "Bob").key(), "bob");
        assert!(!Channel::default().is_valid());
        assert!(Channel::from_username("bob").is_valid());
    }

    #[test]
    fn test_channel_equality() {
        assert_eq!(Channel::new("UC1", "a", "A"), Channel::new("UC1", "b", "B"));
        assert_ne!(Channel::from_id("UC1"), Channel::from_id("UC2"));
        assert_eq!(Channel::from_username("bob"), Channel::new("", "bob", ""));
        assert_ne!(Channel::default(), Channel::default());
    }

    #[test]
    fn test_channel_differs_from() {
        let a = Channel::from_id("UC1");
        assert!(a.differs_from(&Channel::from_id("UC2")));
        assert!(!a.differs_from(&Channel::from_username("bob")));
        assert!(!a.differs_from(&Channel::new("UC1", "x", "")));
    }

    #[test]
    fn test_ad_deserialize_string_length() {
        let ad: Ad = serde_json::from_str(
            r#"{"video_id":"abc","channelId":{"id":"UC2"},"length_seconds":"15","timestamp":10}"#,
        )
        .unwrap();
        assert_eq!(ad.channel, Channel::from_id("UC2"));
        assert_eq!(ad.length_seconds, 15.0);
        assert!(ad.has_length());
    }

    #[test]
    fn test_parse_duration_text() {
        assert_eq!(parse_duration_text("0:15"), Some(15.0));
        assert_eq!(parse_duration_text("1:02:03"), Some(3723.0));
        assert_eq!(parse_duration_text(" 42 "), Some(42.0));
        assert_eq!(parse_duration_text(""), None);
        assert_eq!(parse_duration_text("live"), None);
    }
}
