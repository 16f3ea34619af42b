//! Ad/Whitelist State Machine
//!
//! `NoAd -> AdPlaying(unconfirmed) -> AdPlaying(confirmed) -> [Skipping] -> NoAd`
//!
//! The machine is a transition function: every input (player class toggle, ad metadata,
//! media tick, key press, settings swap, identity update) goes through `AdMachine::handle`
//! together with a read-only view of the environment, and comes back as a list of
//! `Command`s for the page component to carry out. Policy (mute, skip, auto-skip) is
//! re-evaluated on every input while an ad plays, since settings can change mid-ad.

use log::debug;

use crate::error::Error;
use crate::lists::Oracle;
use crate::settings::Settings;
use crate::types::{Ad, Channel};

/// How far the declared ad length may be from the on-screen readout.
///
/// Readout and network metadata arrive independently and race; this tolerance reflects
/// observed host behaviour and should not be tuned without re-checking that.
pub const DURATION_TOLERANCE_SECS: f64 = 2.0;
/// Playback rate used while fast-forwarding through an ad.
pub const SKIP_PLAYBACK_RATE: f64 = 16.0;
/// Delay before checking whether ads actually play after whitelisting.
pub const VERIFY_DELAY_MS: u32 = 5000;

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Snapshot of the main media element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaSnapshot {
    pub current_time: f64,
    /// `NaN` or infinite while unknown.
    pub duration: f64,
    pub src: String,
    pub playback_rate: f64,
    /// Paused by the user or the page, not by this machine.
    pub paused: bool,
}

impl MediaSnapshot {
    pub fn duration_known(&self) -> bool {
        self.duration.is_finite() && self.duration > 0.0
    }

    /// Media streamed from a same-origin blob URL.
    pub fn is_blob_from(&self, origin: &str) -> bool {
        self.src
            .strip_prefix("blob:")
            .is_some_and(|rest| !origin.is_empty() && rest.starts_with(origin))
    }
}

/// Read-only view of everything a transition may look at.
#[derive(Debug, Clone, Copy)]
pub struct Env<'a> {
    pub settings: &'a Settings,
    pub media: Option<&'a MediaSnapshot>,
    /// Ad duration shown in the player's time readout, in seconds.
    pub duration_readout: Option<f64>,
    /// Page origin, used for the blob-source check.
    pub origin: &'a str,
    pub skip_control: bool,
    pub hidden: bool,
    pub now_ms: f64,
}

/// Inputs to the machine.
#[derive(Debug, Clone)]
pub enum AdEvent {
    /// The player started showing an ad.
    AdShown,
    /// The player stopped showing an ad.
    AdHidden,
    /// Network layer observed an ad for this tab.
    AdRecord(Ad),
    /// `timeupdate` / `durationchange`.
    Tick,
    MediaError,
    /// A native skip control appeared.
    SkipControlShown,
    /// Keyboard shortcut or menu entry.
    SkipRequested,
    VisibilityChanged { hidden: bool },
    SettingsChanged,
    Identity { channel: Channel, subscribed: bool },
    /// The user whitelisted the channel from this page.
    WhitelistRequested,
    VerifyTimeout,
}

/// Outputs for the page component to carry out.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Inject the ad-options button and menu if missing.
    InjectAdControls,
    /// Show the whitelist control with the given state.
    ShowWhitelisted(bool),
    /// Add or remove the URL allow marker.
    ReflectUrl(bool),
    ClickSkip,
    Seek(f64),
    SetPlaybackRate(f64),
    MuteTab(bool),
    PauseMedia,
    ResumeMedia,
    TitleFlash(bool),
    EchoAd(Ad),
    /// Look up the tab's most recent ad record; it comes back as `AdEvent::AdRecord`.
    FetchRecentAd,
    ScheduleVerify(u32),
    PromptVerify,
}

// =============================================================================
// State
// =============================================================================

/// Coarse phase, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoAd,
    Unconfirmed,
    Confirmed,
    Skipping,
}

/// Transient per-ad state. Reset whenever the player stops showing an ad.
#[derive(Debug, Clone, Default)]
pub struct AdPlayback {
    pub ad_playing: bool,
    pub ad_confirmed: bool,
    pub skipping: bool,
    pub current_ad: Option<Ad>,
    pub skip_button: bool,
    pub errored: bool,
    skip_clicked: bool,
    rate_raised: bool,
    muted: bool,
}

/// The state machine for one mounted video component.
#[derive(Debug, Clone, Default)]
pub struct AdMachine {
    ad: AdPlayback,
    channel: Option<Channel>,
    subscribed: bool,
    /// Most recent network-observed ad for this tab.
    latest_ad: Option<Ad>,
    ads_seen: u32,
    paused_after_ad: bool,
    verify_pending: bool,
    ad_since_verify: bool,
}

impl AdMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        match (&self.ad.ad_playing, &self.ad.ad_confirmed, &self.ad.skipping) {
            (false, _, _) => Phase::NoAd,
            (true, _, true) => Phase::Skipping,
            (true, true, false) => Phase::Confirmed,
            (true, false, false) => Phase::Unconfirmed,
        }
    }

    pub fn playback(&self) -> &AdPlayback {
        &self.ad
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    pub fn subscribed(&self) -> bool {
        self.subscribed
    }

    /// Advertiser of the ad currently playing, if known.
    pub fn advertiser(&self) -> Option<&Channel> {
        self.ad
            .current_ad
            .as_ref()
            .or(self.latest_ad.as_ref().filter(|_| self.ad.ad_playing))
            .map(|ad| &ad.channel)
            .filter(|c| c.is_valid())
    }

    /// Whether ads are allowed for the channel being viewed. `None` until identity is known.
    pub fn allowed(&self, env: &Env<'_>) -> Option<bool> {
        let channel = self.channel.as_ref()?;
        Some(Oracle::new(env.settings).allows_ads(channel, self.subscribed, env.now_ms))
    }

    pub fn handle(&mut self, event: AdEvent, env: &Env<'_>) -> Vec<Command> {
        let mut out = Vec::new();
        match event {
            AdEvent::AdShown => self.ad_shown(env, &mut out),
            AdEvent::AdHidden => self.ad_hidden(env, &mut out),
            AdEvent::AdRecord(ad) => {
                self.latest_ad = Some(ad);
                if self.ad.ad_playing {
                    self.adopt_record(&mut out);
                    self.try_confirm(env, &mut out);
                    self.evaluate(env, &mut out);
                }
            }
            AdEvent::Tick | AdEvent::SkipControlShown => {
                if self.ad.ad_playing {
                    self.ad.skip_button |= env.skip_control;
                    self.try_confirm(env, &mut out);
                    self.evaluate(env, &mut out);
                }
            }
            AdEvent::MediaError => {
                if self.ad.ad_playing {
                    self.ad.errored = true;
                    self.evaluate(env, &mut out);
                }
            }
            AdEvent::SkipRequested => {
                if self.ad.ad_playing {
                    self.skip(env, &mut out);
                }
            }
            AdEvent::VisibilityChanged { hidden } => {
                if !hidden && self.paused_after_ad {
                    self.paused_after_ad = false;
                    out.push(Command::ResumeMedia);
                    out.push(Command::TitleFlash(false));
                }
            }
            AdEvent::SettingsChanged => {
                self.refresh_ui(env, &mut out);
                if self.ad.ad_playing {
                    self.evaluate(env, &mut out);
                }
            }
            AdEvent::Identity {
                channel,
                subscribed,
            } => self.identity(channel, subscribed, env, &mut out),
            AdEvent::WhitelistRequested => {
                if env.settings.verify_wl {
                    self.verify_pending = true;
                    self.ad_since_verify = false;
                    out.push(Command::ScheduleVerify(VERIFY_DELAY_MS));
                }
            }
            AdEvent::VerifyTimeout => {
                if std::mem::take(&mut self.verify_pending) && !self.ad_since_verify {
                    out.push(Command::PromptVerify);
                }
            }
        }
        out
    }

    /// Commands that undo everything the machine changed on the page.
    pub fn teardown(&mut self) -> Vec<Command> {
        let mut out = Vec::new();
        if self.ad.rate_raised {
            out.push(Command::SetPlaybackRate(1.0));
        }
        if self.ad.muted {
            out.push(Command::MuteTab(false));
        }
        if self.paused_after_ad {
            out.push(Command::TitleFlash(false));
        }
        *self = Self::default();
        out
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    fn ad_shown(&mut self, env: &Env<'_>, out: &mut Vec<Command>) {
        if self.ad.ad_playing {
            return;
        }
        self.ad = AdPlayback {
            ad_playing: true,
            skip_button: env.skip_control,
            ..AdPlayback::default()
        };
        self.ads_seen += 1;
        self.ad_since_verify = true;
        out.push(Command::InjectAdControls);
        if self.latest_ad.is_none() {
            out.push(Command::FetchRecentAd);
        }
        self.try_confirm(env, out);
        self.evaluate(env, out);
    }

    fn ad_hidden(&mut self, env: &Env<'_>, out: &mut Vec<Command>) {
        if !self.ad.ad_playing {
            return;
        }
        let ad = std::mem::take(&mut self.ad);
        if ad.rate_raised {
            out.push(Command::SetPlaybackRate(1.0));
        }
        if ad.muted {
            out.push(Command::MuteTab(false));
            let playing = env.media.is_some_and(|m| !m.paused);
            if env.settings.pause_after_ad && env.hidden && !ad.skipping && playing {
                self.paused_after_ad = true;
                out.push(Command::PauseMedia);
                out.push(Command::TitleFlash(true));
            }
        }
        // Metadata is per ad; the next ad brings its own.
        self.latest_ad = None;
    }

    fn identity(
        &mut self,
        channel: Channel,
        subscribed: bool,
        env: &Env<'_>,
        out: &mut Vec<Command>,
    ) {
        if !channel.is_valid() {
            debug!("{}", Error::IdentityUnavailable);
            return;
        }
        match &mut self.channel {
            Some(current) if !current.differs_from(&channel) => {
                let before = (current.clone(), self.subscribed);
                current.merge(&channel);
                self.subscribed = subscribed;
                if before.0.display == current.display && before.1 == subscribed {
                    return;
                }
            }
            Some(_) => {
                debug!("channel changed to {}", channel.key());
                out.extend(self.teardown());
                self.channel = Some(channel);
                self.subscribed = subscribed;
            }
            None => {
                self.channel = Some(channel);
                self.subscribed = subscribed;
            }
        }
        self.refresh_ui(env, out);
        if self.ad.ad_playing {
            self.evaluate(env, out);
        }
    }

    fn refresh_ui(&self, env: &Env<'_>, out: &mut Vec<Command>) {
        if let Some(allowed) = self.allowed(env) {
            out.push(Command::ShowWhitelisted(allowed));
            out.push(Command::ReflectUrl(allowed));
        }
    }

    /// Corroborate "an ad is showing" with metadata. Idempotent.
    fn try_confirm(&mut self, env: &Env<'_>, out: &mut Vec<Command>) {
        if self.ad.ad_confirmed {
            return;
        }
        let shown_length = env
            .duration_readout
            .or_else(|| env.media.filter(|m| m.duration_known()).map(|m| m.duration));

        let matched = match (&self.latest_ad, shown_length) {
            (Some(ad), Some(length)) if ad.has_length() => {
                (ad.length_seconds - length).abs() <= DURATION_TOLERANCE_SECS
            }
            _ => false,
        };
        if matched {
            self.ad.current_ad = self.latest_ad.clone();
        }
        let blob = env.media.is_some_and(|m| m.is_blob_from(env.origin));
        if !matched && !blob {
            return;
        }

        self.ad.ad_confirmed = true;
        if let Some(ad) = &self.ad.current_ad {
            debug!("ad confirmed: {} ({})", ad.video_id, ad.channel.key());
            out.push(Command::EchoAd(ad.clone()));
        }
    }

    /// A record arriving after a blob-source confirmation names the ad already playing.
    fn adopt_record(&mut self, out: &mut Vec<Command>) {
        if !self.ad.ad_confirmed || self.ad.current_ad.is_some() {
            return;
        }
        if let Some(ad) = &self.latest_ad {
            self.ad.current_ad = Some(ad.clone());
            out.push(Command::EchoAd(ad.clone()));
        }
    }

    /// Continuous policy while an ad plays.
    fn evaluate(&mut self, env: &Env<'_>, out: &mut Vec<Command>) {
        let oracle = Oracle::new(env.settings);

        let mute = oracle.should_mute(self.advertiser());
        if mute != self.ad.muted {
            self.ad.muted = mute;
            out.push(Command::MuteTab(mute));
        }

        if self.ad.skipping {
            self.skip_step(env, out);
        } else if self.should_skip(env) {
            self.skip(env, out);
        }
    }

    fn should_skip(&self, env: &Env<'_>) -> bool {
        let settings = env.settings;
        if self.ad.errored && settings.skip_ad_errors {
            return true;
        }
        if !self.ad.ad_confirmed {
            return false;
        }
        let oracle = Oracle::new(settings);
        if self.advertiser().is_some_and(|c| oracle.blacklisted(c)) {
            return true;
        }
        if self.allowed(env) == Some(false) {
            return true;
        }
        if settings.auto_skip
            && env
                .media
                .is_some_and(|m| m.current_time >= settings.auto_skip_seconds)
        {
            return true;
        }
        settings.limit_ads && self.ads_seen > settings.limit_ads_qty
    }

    fn skip(&mut self, env: &Env<'_>, out: &mut Vec<Command>) {
        if !self.ad.skipping {
            debug!("skipping ad");
            self.ad.skipping = true;
        }
        self.skip_step(env, out);
    }

    /// One attempt: native control first, else fast-forward. Retried on every tick.
    fn skip_step(&mut self, env: &Env<'_>, out: &mut Vec<Command>) {
        if env.skip_control || self.ad.skip_button {
            if !self.ad.skip_clicked {
                self.ad.skip_clicked = true;
                out.push(Command::ClickSkip);
            }
            return;
        }
        match env.media.filter(|m| m.duration_known()) {
            Some(media) => {
                let target = media.duration - 1.0;
                if media.current_time < target {
                    out.push(Command::Seek(target));
                }
                // The player drops back to normal speed when it swaps sources mid-ad.
                if !self.ad.rate_raised || media.playback_rate < SKIP_PLAYBACK_RATE {
                    self.ad.rate_raised = true;
                    out.push(Command::SetPlaybackRate(SKIP_PLAYBACK_RATE));
                }
            }
            None => debug!("{}", Error::SkipUnavailable),
        }
    }
}
