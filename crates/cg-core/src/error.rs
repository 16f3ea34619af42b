//! Error type shared by the core.
//!
//! None of these are fatal. Callers log them and retry on the next qualifying event.

/// Degraded conditions the engine can run into.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The resolver found no channel identity yet.
    #[error("Channel identity not available yet")]
    IdentityUnavailable,
    /// An expected host DOM anchor is missing.
    #[error("Control not found: {0}")]
    ControlNotFound(&'static str),
    /// No native skip control and the ad duration is still unknown.
    #[error("Skip unavailable: no skip control and unknown duration")]
    SkipUnavailable,
    /// The transport could not hand the message to the peer.
    #[error("Message undeliverable: {0}")]
    Undeliverable(String),
    /// The agent was used after `destroy()`.
    #[error("Agent destroyed")]
    Destroyed,
    /// A peer handler rejected the request.
    #[error("Remote handler failed: {0}")]
    Remote(String),
    /// A browser API call threw.
    #[error("Host call failed: {0}")]
    Host(String),
    #[error("Invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}
