//! ChannelGate Core Library
//!
//! This crate holds everything that decides whether ads play for the channel being viewed on
//! a self-mutating single-page video site. Nothing here touches a real browser: the DOM, the
//! media element, timers and the cross-context transport are reached through small traits so
//! that `cg-wasm` can bind them to `web-sys` and the tests can bind them to in-memory fakes.
//!
//! # Architecture
//!
//! One mutation stream drives many URL-scoped page components. The host page never tells us
//! which channel is showing or whether an ad is playing, so components discover it from DOM
//! mutations, feed it into the ad state machine, and push decisions back out as DOM writes and
//! messages to the extension.
//!
//! # Modules
//!
//! - `agent`: correlation-id request/reply messaging between script contexts
//! - `watch`: single-observer reactivity engine with mount/unmount lifecycle
//! - `debounce`: trailing-timer coalescing with a liveness floor
//! - `resolver`: channel identity resolution from host data objects and links
//! - `lists`: list membership and the effective-whitelist policy
//! - `ads`: per-page ad playback state machine
//! - `components`: video, channel and listing page components
//! - `context`: per-script-world settings and agent ownership
//! - `url`: URL marker reflection and channel link parsing
//! - `types`, `settings`, `path`, `dom`, `error`: shared definitions

pub mod ads;
pub mod agent;
pub mod components;
pub mod context;
pub mod debounce;
pub mod dom;
pub mod error;
pub mod lists;
pub mod path;
pub mod resolver;
pub mod settings;
pub mod types;
pub mod url;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use agent::{Agent, Envelope, Transport};
pub use context::Context;
pub use error::Error;
pub use lists::{ChannelSet, Membership};
pub use settings::{Settings, SettingsChange};
pub use types::{Ad, Channel};
pub use watch::{Host, HostEvent, PageComponent, SiteWatch};
