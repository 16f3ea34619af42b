//! Watch page component.
//!
//! Translates player mutations, media timing and user input into `AdEvent`s and carries out
//! the machine's commands. Remounts on every URL change so each video starts from a clean
//! `AdMachine`.

use std::rc::Rc;

use log::{debug, warn};
use serde_json::Value;

use super::{
    apply_logged, Bridge, VideoSurface, AD_SHOWING_CLASS, DURATION_READOUT, OVERLAY_CLOSE,
    PLAYER, SKIP_CONTROL, SUBSCRIBE_BUTTON, VIDEO_OWNER, VIDEO_OWNER_LINK, WHITELIST_BUTTON,
};
use crate::ads::{AdEvent, AdMachine, Command, Env};
use crate::agent::verbs;
use crate::dom::{DomNode, MutationRecord};
use crate::error::Error;
use crate::lists::Oracle;
use crate::resolver;
use crate::settings::SettingsChange;
use crate::types::{parse_duration_text, Channel};
use crate::url;
use crate::watch::{HostEvent, PageComponent, Rules, UiAction, UrlMatch, WatchCx};

const VERIFY_TIMER: &str = "verify";

pub struct VideoComponent<N> {
    bridge: Rc<dyn Bridge>,
    surface: Rc<dyn VideoSurface<N>>,
    machine: AdMachine,
}

impl<N: DomNode> VideoComponent<N> {
    pub fn new(bridge: Rc<dyn Bridge>, surface: Rc<dyn VideoSurface<N>>) -> Self {
        Self {
            bridge,
            surface,
            machine: AdMachine::new(),
        }
    }

    pub fn machine(&self) -> &AdMachine {
        &self.machine
    }

    /// Feed one event through the machine against a fresh view of the page.
    fn step(&mut self, event: AdEvent, cx: &mut WatchCx<'_, N>) {
        let settings = self.bridge.settings();
        let media = self.surface.media();
        let document = cx.document();
        let duration_readout = document
            .query(DURATION_READOUT)
            .and_then(|readout| parse_duration_text(&readout.text()));
        let env = Env {
            settings: &settings,
            media: media.as_ref(),
            duration_readout,
            origin: url::origin(cx.url()),
            skip_control: document.query(SKIP_CONTROL).is_some(),
            hidden: self.surface.hidden(),
            now_ms: cx.now_ms(),
        };
        let commands = self.machine.handle(event, &env);
        self.run(commands, cx);
    }

    fn run(&self, commands: Vec<Command>, cx: &mut WatchCx<'_, N>) {
        for command in commands {
            match command {
                Command::MuteTab(muted) => self.bridge.notify(verbs::MUTE_TAB, Value::Bool(muted)),
                Command::EchoAd(ad) => match serde_json::to_value(&ad) {
                    Ok(ad) => self.bridge.notify(verbs::ECHO_AD, ad),
                    Err(e) => warn!("echo-ad dropped: {e}"),
                },
                Command::ScheduleVerify(delay_ms) => cx.schedule(VERIFY_TIMER, delay_ms),
                Command::FetchRecentAd => self.bridge.request_recent_ad(),
                other => apply_logged::<N, _>(&*self.surface, &other),
            }
        }
    }

    fn resolve_identity(&mut self, cx: &mut WatchCx<'_, N>) {
        let Some(owner) = cx.document().query(VIDEO_OWNER) else {
            debug!("{}", Error::ControlNotFound(VIDEO_OWNER));
            return;
        };
        let Some(identity) = resolver::resolve(&owner, &resolver::VIDEO_OWNER) else {
            debug!("{}", Error::IdentityUnavailable);
            return;
        };
        let button_says = || {
            cx.document()
                .query(SUBSCRIBE_BUTTON)
                .map(|button| button.attribute("subscribed").is_some())
        };
        let subscribed = identity.subscribed.or_else(button_says).unwrap_or(false)
            || self.bridge.subscribed_to(&identity.channel);
        self.step(
            AdEvent::Identity {
                channel: identity.channel,
                subscribed,
            },
            cx,
        );
    }

    fn player_changed(&mut self, player: &N, cx: &mut WatchCx<'_, N>) {
        let event = if player.has_class(AD_SHOWING_CLASS) {
            AdEvent::AdShown
        } else {
            AdEvent::AdHidden
        };
        self.step(event, cx);
    }

    /// Allowed for the channel being watched; unknown identity counts as not allowed.
    fn allowed(&self, now_ms: f64) -> Option<bool> {
        let channel = self.machine.channel()?;
        let settings = self.bridge.settings();
        Some(Oracle::new(&settings).allows_ads(channel, self.machine.subscribed(), now_ms))
    }

    fn toggle_whitelist(&mut self, cx: &mut WatchCx<'_, N>) {
        let Some(channel) = self.machine.channel().cloned() else {
            debug!("{}", Error::IdentityUnavailable);
            return;
        };
        let settings = self.bridge.settings();
        let toggle = Oracle::new(&settings).toggle(&channel, self.machine.subscribed());
        self.bridge.request_change(toggle.change);
        self.bridge.notify(verbs::HIGHLIGHT_TAB, Value::Bool(toggle.whitelisted));
        if toggle.whitelisted {
            self.step(AdEvent::WhitelistRequested, cx);
        }
    }

    fn advertiser_change(&self, change: fn(Channel) -> SettingsChange) {
        match self.machine.advertiser() {
            Some(advertiser) => self.bridge.request_change(change(advertiser.clone())),
            None => debug!("no advertiser for the current ad"),
        }
    }
}

impl<N: DomNode> PageComponent<N> for VideoComponent<N> {
    fn name(&self) -> &'static str {
        "video"
    }

    fn url_match(&self) -> UrlMatch {
        UrlMatch::Contains("/watch")
    }

    fn rules(&self) -> Rules {
        Rules::new()
            .on_added(PLAYER)
            .on_added(SKIP_CONTROL)
            .on_added(OVERLAY_CLOSE)
            .on_added(VIDEO_OWNER)
            .on_removed(WHITELIST_BUTTON)
            .on_modified(PLAYER)
            .on_modified(VIDEO_OWNER_LINK)
            .on_modified(SUBSCRIBE_BUTTON)
            .watch_attribute("class")
            .watch_attribute("href")
            .watch_attribute("subscribed")
    }

    fn remount_on_change(&self) -> bool {
        true
    }

    fn on_mount(&mut self, cx: &mut WatchCx<'_, N>) {
        self.machine = AdMachine::new();
        self.resolve_identity(cx);
        if let Some(player) = cx.document().query(PLAYER) {
            if player.has_class(AD_SHOWING_CLASS) {
                self.step(AdEvent::AdShown, cx);
            }
        }
    }

    fn on_unmount(&mut self, cx: &mut WatchCx<'_, N>) {
        let commands = self.machine.teardown();
        self.run(commands, cx);
        self.surface.remove_controls();
    }

    fn on_added(&mut self, selector: &'static str, element: &N, cx: &mut WatchCx<'_, N>) {
        match selector {
            PLAYER => self.player_changed(element, cx),
            SKIP_CONTROL => self.step(AdEvent::SkipControlShown, cx),
            OVERLAY_CLOSE => {
                let skip = self.bridge.settings().skip_overlays;
                if skip && self.allowed(cx.now_ms()) != Some(true) {
                    debug!("closing overlay ad");
                    self.surface.click(element);
                }
            }
            VIDEO_OWNER => self.resolve_identity(cx),
            _ => {}
        }
    }

    fn on_removed(&mut self, _selector: &'static str, cx: &mut WatchCx<'_, N>) {
        // The host re-rendered over our button.
        if let Some(allowed) = self.allowed(cx.now_ms()) {
            apply_logged::<N, _>(&*self.surface, &Command::ShowWhitelisted(allowed));
        }
    }

    fn on_modified(
        &mut self,
        selector: &'static str,
        target: &N,
        _record: &MutationRecord<N>,
        cx: &mut WatchCx<'_, N>,
    ) {
        match selector {
            PLAYER => self.player_changed(target, cx),
            _ => self.resolve_identity(cx),
        }
    }

    fn on_event(&mut self, event: &HostEvent, cx: &mut WatchCx<'_, N>) {
        match event {
            HostEvent::SettingsChanged => self.step(AdEvent::SettingsChanged, cx),
            HostEvent::AdUpdate(ad) => self.step(AdEvent::AdRecord(ad.clone()), cx),
            HostEvent::MediaTick => self.step(AdEvent::Tick, cx),
            HostEvent::MediaError => self.step(AdEvent::MediaError, cx),
            HostEvent::KeyDown { key, in_text_input } => {
                let settings = self.bridge.settings();
                if settings.keyboard_skip && !in_text_input && key == settings.skip_key() {
                    self.step(AdEvent::SkipRequested, cx);
                }
            }
            HostEvent::VisibilityChanged { hidden } => {
                self.step(AdEvent::VisibilityChanged { hidden: *hidden }, cx)
            }
            HostEvent::Ui(UiAction::ToggleWhitelist) => self.toggle_whitelist(cx),
            HostEvent::Ui(UiAction::BlockAdvertiser) => {
                self.advertiser_change(SettingsChange::AddBlack)
            }
            HostEvent::Ui(UiAction::MuteAdvertiser) => {
                self.advertiser_change(SettingsChange::AddMute)
            }
            HostEvent::Ui(UiAction::SkipAd) => self.step(AdEvent::SkipRequested, cx),
        }
    }

    fn on_timer(&mut self, key: &'static str, cx: &mut WatchCx<'_, N>) {
        if key == VERIFY_TIMER {
            self.step(AdEvent::VerifyTimeout, cx);
        }
    }
}
