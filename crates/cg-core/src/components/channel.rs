//! Channel page component.

use std::rc::Rc;

use log::debug;
use serde_json::Value;

use super::{apply_logged, Bridge, PageSurface, CHANNEL_HEADER, SUBSCRIBE_BUTTON, WHITELIST_BUTTON};
use crate::ads::Command;
use crate::agent::verbs;
use crate::dom::{DomNode, MutationRecord};
use crate::error::Error;
use crate::lists::Oracle;
use crate::resolver;
use crate::types::Channel;
use crate::url::{self, PageKind};
use crate::watch::{HostEvent, PageComponent, Rules, UiAction, UrlMatch, WatchCx};

fn is_channel_page(url: &str) -> bool {
    PageKind::from_url(url) == Some(PageKind::Channel)
}

/// Whitelist control and URL marker for the channel being browsed.
pub struct ChannelComponent<N> {
    bridge: Rc<dyn Bridge>,
    surface: Rc<dyn PageSurface<N>>,
    channel: Option<Channel>,
    subscribed: bool,
}

impl<N: DomNode> ChannelComponent<N> {
    pub fn new(bridge: Rc<dyn Bridge>, surface: Rc<dyn PageSurface<N>>) -> Self {
        Self {
            bridge,
            surface,
            channel: None,
            subscribed: false,
        }
    }

    pub fn channel(&self) -> Option<&Channel> {
        self.channel.as_ref()
    }

    fn resolve(&mut self, cx: &WatchCx<'_, N>) {
        let document = cx.document();
        let identity = document
            .query(CHANNEL_HEADER)
            .and_then(|header| resolver::resolve(&header, &resolver::CHANNEL_HEADER));
        let (mut channel, subscribed) = match identity {
            Some(identity) => (identity.channel, identity.subscribed),
            None => (Channel::default(), None),
        };
        // Canonical paths carry the identity before the header renders.
        if let Some(from_url) = url::parse_channel_href(cx.url()) {
            if !channel.differs_from(&from_url) {
                channel.merge(&from_url);
            }
        }
        if !channel.is_valid() {
            debug!("{}", Error::IdentityUnavailable);
            return;
        }

        let subscribed = subscribed
            .or_else(|| {
                document
                    .query(SUBSCRIBE_BUTTON)
                    .map(|button| button.attribute("subscribed").is_some())
            })
            .unwrap_or(false)
            || self.bridge.subscribed_to(&channel);

        match &mut self.channel {
            Some(current) if !current.differs_from(&channel) => current.merge(&channel),
            slot => *slot = Some(channel),
        }
        self.subscribed = subscribed;
        self.refresh(cx.now_ms());
    }

    fn refresh(&self, now_ms: f64) {
        let Some(channel) = &self.channel else {
            return;
        };
        let settings = self.bridge.settings();
        let allowed = Oracle::new(&settings).allows_ads(channel, self.subscribed, now_ms);
        apply_logged::<N, _>(&*self.surface, &Command::ShowWhitelisted(allowed));
        apply_logged::<N, _>(&*self.surface, &Command::ReflectUrl(allowed));
    }

    fn toggle_whitelist(&self) {
        let Some(channel) = &self.channel else {
            debug!("{}", Error::IdentityUnavailable);
            return;
        };
        let settings = self.bridge.settings();
        let toggle = Oracle::new(&settings).toggle(channel, self.subscribed);
        self.bridge.request_change(toggle.change);
        self.bridge.notify(verbs::HIGHLIGHT_TAB, Value::Bool(toggle.whitelisted));
    }
}

impl<N: DomNode> PageComponent<N> for ChannelComponent<N> {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn url_match(&self) -> UrlMatch {
        UrlMatch::Predicate(is_channel_page)
    }

    fn rules(&self) -> Rules {
        Rules::new()
            .on_added(CHANNEL_HEADER)
            .on_removed(WHITELIST_BUTTON)
            .on_modified(SUBSCRIBE_BUTTON)
            .watch_attribute("subscribed")
    }

    fn remount_on_change(&self) -> bool {
        true
    }

    fn on_mount(&mut self, cx: &mut WatchCx<'_, N>) {
        self.channel = None;
        self.subscribed = false;
        self.resolve(cx);
    }

    fn on_unmount(&mut self, _cx: &mut WatchCx<'_, N>) {
        self.surface.remove_controls();
        self.channel = None;
    }

    fn on_added(&mut self, _selector: &'static str, _element: &N, cx: &mut WatchCx<'_, N>) {
        self.resolve(cx);
    }

    fn on_removed(&mut self, _selector: &'static str, cx: &mut WatchCx<'_, N>) {
        self.refresh(cx.now_ms());
    }

    fn on_modified(
        &mut self,
        _selector: &'static str,
        _target: &N,
        _record: &MutationRecord<N>,
        cx: &mut WatchCx<'_, N>,
    ) {
        self.resolve(cx);
    }

    fn on_event(&mut self, event: &HostEvent, cx: &mut WatchCx<'_, N>) {
        match event {
            HostEvent::SettingsChanged => self.refresh(cx.now_ms()),
            HostEvent::Ui(UiAction::ToggleWhitelist) => self.toggle_whitelist(),
            _ => {}
        }
    }
}
