//! Site Watch: the reactivity engine
//!
//! One mutation observer feeds many registered page components. Each component is scoped to
//! the URLs it matches and declares the selectors it cares about; the engine keeps a single
//! dispatch table built from the components that are currently mounted and mounts/unmounts
//! them as the single-page host navigates.
//!
//! # Ordering
//!
//! - On navigation every leaving component is unmounted before any entering component is
//!   mounted. Cleanup of a leaving component may release nodes an entering one recreates.
//! - Navigation is detected before a batch is dispatched, so a batch that both navigates and
//!   changes the DOM is handled against the post-navigation dispatch table.

use std::collections::HashMap;

use log::{debug, info};

use crate::debounce::{Debouncer, PollDecision};
use crate::dom::{DomNode, MutationKind, MutationRecord};
use crate::types::Ad;
use crate::url;

/// Opaque handle for a host timer.
pub type TimerToken = u64;

// =============================================================================
// Host
// =============================================================================

/// The platform the engine runs on.
pub trait Host {
    type Node: DomNode;

    /// Current `document.location.href`.
    fn location(&self) -> String;

    fn document(&self) -> Self::Node;

    fn now_ms(&self) -> f64;

    /// (Re)configure the single observer: subtree child-list changes plus the listed
    /// attributes. Attributes outside the list must not be observed.
    fn observe(&self, attribute_filter: &[&'static str]);

    fn disconnect(&self);

    /// Arm a one-shot timer. When it fires the platform calls `SiteWatch::fire_timer`.
    fn set_timer(&self, token: TimerToken, delay_ms: u32);

    fn clear_timer(&self, token: TimerToken);
}

// =============================================================================
// Page Components
// =============================================================================

/// Which URLs a component applies to.
#[derive(Clone, Copy)]
pub enum UrlMatch {
    Contains(&'static str),
    Predicate(fn(&str) -> bool),
}

impl UrlMatch {
    pub fn test(&self, url: &str) -> bool {
        match self {
            Self::Contains(needle) => url.contains(needle),
            Self::Predicate(f) => f(url),
        }
    }
}

impl std::fmt::Debug for UrlMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains(needle) => write!(f, "Contains({needle:?})"),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// Selector rules a component registers.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    pub added: Vec<&'static str>,
    pub removed: Vec<&'static str>,
    pub modified: Vec<&'static str>,
    /// Attributes whose changes the component needs to see.
    pub attributes: Vec<&'static str>,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_added(mut self, selector: &'static str) -> Self {
        self.added.push(selector);
        self
    }

    pub fn on_removed(mut self, selector: &'static str) -> Self {
        self.removed.push(selector);
        self
    }

    pub fn on_modified(mut self, selector: &'static str) -> Self {
        self.modified.push(selector);
        self
    }

    pub fn watch_attribute(mut self, name: &'static str) -> Self {
        self.attributes.push(name);
        self
    }
}

/// UI actions raised by controls the components inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiAction {
    ToggleWhitelist,
    BlockAdvertiser,
    MuteAdvertiser,
    SkipAd,
}

/// Inputs that do not arrive as DOM mutations.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A new settings snapshot replaced the old one.
    SettingsChanged,
    AdUpdate(Ad),
    /// `timeupdate` / `durationchange` on the main media element.
    MediaTick,
    MediaError,
    KeyDown { key: String, in_text_input: bool },
    VisibilityChanged { hidden: bool },
    Ui(UiAction),
}

enum TimerRequest {
    Poll(&'static str),
    Once(&'static str, u32),
    Cancel(&'static str),
}

/// What a component callback can see and request.
pub struct WatchCx<'a, N> {
    url: &'a str,
    document: &'a N,
    now_ms: f64,
    requests: &'a mut Vec<TimerRequest>,
}

impl<N> WatchCx<'_, N> {
    pub fn url(&self) -> &str {
        self.url
    }

    pub fn document(&self) -> &N {
        self.document
    }

    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    /// Run `on_poll(key)` soon, coalescing bursts (see `debounce`).
    pub fn poll_update(&mut self, key: &'static str) {
        self.requests.push(TimerRequest::Poll(key));
    }

    /// Run `on_timer(key)` once after `delay_ms`, replacing a pending timer with that key.
    pub fn schedule(&mut self, key: &'static str, delay_ms: u32) {
        self.requests.push(TimerRequest::Once(key, delay_ms));
    }

    pub fn cancel(&mut self, key: &'static str) {
        self.requests.push(TimerRequest::Cancel(key));
    }
}

/// A URL-scoped bundle of DOM rules with a mount/unmount lifecycle.
pub trait PageComponent<N: DomNode> {
    fn name(&self) -> &'static str;

    fn url_match(&self) -> UrlMatch;

    fn rules(&self) -> Rules;

    /// Remount whenever the URL changes, even if it still matches.
    fn remount_on_change(&self) -> bool {
        false
    }

    fn on_mount(&mut self, cx: &mut WatchCx<'_, N>);

    /// Must remove anything the component injected.
    fn on_unmount(&mut self, cx: &mut WatchCx<'_, N>);

    fn on_added(&mut self, _selector: &'static str, _element: &N, _cx: &mut WatchCx<'_, N>) {}

    /// Removed nodes are detached, so no element is passed.
    fn on_removed(&mut self, _selector: &'static str, _cx: &mut WatchCx<'_, N>) {}

    fn on_modified(
        &mut self,
        _selector: &'static str,
        _target: &N,
        _record: &MutationRecord<N>,
        _cx: &mut WatchCx<'_, N>,
    ) {
    }

    fn on_event(&mut self, _event: &HostEvent, _cx: &mut WatchCx<'_, N>) {}

    fn on_poll(&mut self, _key: &'static str, _cx: &mut WatchCx<'_, N>) {}

    fn on_timer(&mut self, _key: &'static str, _cx: &mut WatchCx<'_, N>) {}
}

// =============================================================================
// Engine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unstarted,
    Running,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKind {
    Poll,
    Once,
}

type TimerKey = (usize, &'static str, TimerKind);

struct Slot<N: DomNode> {
    component: Box<dyn PageComponent<N>>,
    rules: Rules,
    url_match: UrlMatch,
    remount_on_change: bool,
    mounted_url: Option<String>,
}

#[derive(Default)]
struct Dispatch {
    added: Vec<(usize, &'static str)>,
    removed: Vec<(usize, &'static str)>,
    modified: Vec<(usize, &'static str)>,
    attributes: Vec<&'static str>,
}

/// The reactivity engine.
pub struct SiteWatch<H: Host> {
    host: H,
    slots: Vec<Slot<H::Node>>,
    state: WatchState,
    last_url: String,
    dispatch: Dispatch,
    timers: HashMap<TimerToken, TimerKey>,
    timer_tokens: HashMap<TimerKey, TimerToken>,
    polls: HashMap<(usize, &'static str), Debouncer>,
    next_token: TimerToken,
}

impl<H: Host> SiteWatch<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            slots: Vec::new(),
            state: WatchState::Unstarted,
            last_url: String::new(),
            dispatch: Dispatch::default(),
            timers: HashMap::new(),
            timer_tokens: HashMap::new(),
            polls: HashMap::new(),
            next_token: 1,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// URL the active component set was computed for.
    pub fn url(&self) -> &str {
        &self.last_url
    }

    pub fn is_mounted(&self, name: &str) -> bool {
        self.slots
            .iter()
            .any(|s| s.mounted_url.is_some() && s.component.name() == name)
    }

    /// Attributes the observer is currently configured with.
    pub fn observed_attributes(&self) -> &[&'static str] {
        &self.dispatch.attributes
    }

    /// Register a component. If the engine is running it is mounted right away when its URL
    /// matches.
    pub fn register(&mut self, component: Box<dyn PageComponent<H::Node>>) -> &mut Self {
        let rules = component.rules();
        let url_match = component.url_match();
        let remount_on_change = component.remount_on_change();
        self.slots.push(Slot {
            component,
            rules,
            url_match,
            remount_on_change,
            mounted_url: None,
        });
        if self.state == WatchState::Running {
            let url = self.last_url.clone();
            self.navigate(url);
        }
        self
    }

    pub fn start(&mut self) {
        if self.state != WatchState::Unstarted {
            return;
        }
        self.state = WatchState::Running;
        let url = self.host.location();
        self.navigate(url);
    }

    /// Handle one observer batch.
    pub fn process(&mut self, records: &[MutationRecord<H::Node>]) {
        if self.state != WatchState::Running {
            return;
        }

        let href = self.host.location();
        if href != self.last_url {
            self.navigate(href);
        }

        for record in records {
            match &record.kind {
                MutationKind::ChildList { added, removed } => {
                    for node in added {
                        self.dispatch_added(node);
                    }
                    for node in removed {
                        self.dispatch_removed(node);
                    }
                }
                MutationKind::Attribute { name, .. } => {
                    if self.dispatch.attributes.iter().any(|a| *a == name.as_str()) {
                        self.dispatch_modified(record);
                    }
                }
            }
            if self.state != WatchState::Running {
                return;
            }
        }
    }

    fn dispatch_added(&mut self, node: &H::Node) {
        let mut i = 0;
        while i < self.dispatch.added.len() {
            let (idx, selector) = self.dispatch.added[i];
            if let Some(element) = node.find(selector) {
                self.invoke(idx, |c, cx| c.on_added(selector, &element, cx));
            }
            i += 1;
        }
    }

    fn dispatch_removed(&mut self, node: &H::Node) {
        let mut i = 0;
        while i < self.dispatch.removed.len() {
            let (idx, selector) = self.dispatch.removed[i];
            if node.matches(selector) || node.query(selector).is_some() {
                self.invoke(idx, |c, cx| c.on_removed(selector, cx));
            }
            i += 1;
        }
    }

    fn dispatch_modified(&mut self, record: &MutationRecord<H::Node>) {
        let mut i = 0;
        while i < self.dispatch.modified.len() {
            let (idx, selector) = self.dispatch.modified[i];
            if record.target.matches(selector) {
                self.invoke(idx, |c, cx| c.on_modified(selector, &record.target, record, cx));
            }
            i += 1;
        }
    }

    /// Deliver a non-mutation event to every mounted component.
    pub fn dispatch_event(&mut self, event: &HostEvent) {
        if self.state != WatchState::Running {
            return;
        }
        for idx in 0..self.slots.len() {
            if self.slots[idx].mounted_url.is_some() {
                self.invoke(idx, |c, cx| c.on_event(event, cx));
            }
        }
    }

    /// A host timer armed through `Host::set_timer` fired.
    pub fn fire_timer(&mut self, token: TimerToken) {
        if self.state != WatchState::Running {
            return;
        }
        let Some(key) = self.timers.remove(&token) else {
            return;
        };
        self.timer_tokens.remove(&key);

        let (idx, name, kind) = key;
        if self.slots[idx].mounted_url.is_none() {
            return;
        }
        match kind {
            TimerKind::Poll => {
                let now = self.host.now_ms();
                let run = self
                    .polls
                    .get_mut(&(idx, name))
                    .is_some_and(|d| d.fire(now));
                if run {
                    self.invoke(idx, |c, cx| c.on_poll(name, cx));
                }
            }
            TimerKind::Once => self.invoke(idx, |c, cx| c.on_timer(name, cx)),
        }
    }

    /// Disconnect the observer, unmount everything and clear pending timers. No callback
    /// runs afterwards.
    pub fn destroy(&mut self) {
        if self.state == WatchState::Destroyed {
            return;
        }
        let was_running = self.state == WatchState::Running;
        self.state = WatchState::Destroyed;
        self.host.disconnect();

        if was_running {
            for idx in 0..self.slots.len() {
                if self.slots[idx].mounted_url.is_some() {
                    self.invoke(idx, |c, cx| c.on_unmount(cx));
                    self.slots[idx].mounted_url = None;
                }
            }
        }

        for token in self.timers.keys() {
            self.host.clear_timer(*token);
        }
        self.timers.clear();
        self.timer_tokens.clear();
        self.polls.clear();
        self.dispatch = Dispatch::default();
        info!("site watch destroyed");
    }

    // -------------------------------------------------------------------------
    // Navigation
    // -------------------------------------------------------------------------

    fn navigate(&mut self, url: String) {
        debug!("navigate: {} -> {}", self.last_url, url);
        self.last_url = url;

        // The allow marker is our own write, not a navigation.
        let page = url::reflect(&self.last_url, false);
        let mut leaving = Vec::new();
        let mut entering = Vec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            let matches = slot.url_match.test(&self.last_url);
            let leave = match &slot.mounted_url {
                Some(mounted) => {
                    !matches || (slot.remount_on_change && url::reflect(mounted, false) != page)
                }
                None => false,
            };
            if leave {
                leaving.push(idx);
            }
            if matches && (slot.mounted_url.is_none() || leave) {
                entering.push(idx);
            }
        }

        for &idx in &leaving {
            info!("unmount {}", self.slots[idx].component.name());
            self.invoke(idx, |c, cx| c.on_unmount(cx));
            self.slots[idx].mounted_url = None;
            self.release_timers(idx);
        }
        for &idx in &entering {
            info!("mount {}", self.slots[idx].component.name());
            self.slots[idx].mounted_url = Some(self.last_url.clone());
            self.invoke(idx, |c, cx| c.on_mount(cx));
        }

        self.rebuild_dispatch();
    }

    fn rebuild_dispatch(&mut self) {
        let mut dispatch = Dispatch::default();
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.mounted_url.is_none() {
                continue;
            }
            let rules = &slot.rules;
            dispatch.added.extend(rules.added.iter().map(|s| (idx, *s)));
            dispatch.removed.extend(rules.removed.iter().map(|s| (idx, *s)));
            dispatch.modified.extend(rules.modified.iter().map(|s| (idx, *s)));
            for attribute in &rules.attributes {
                if !dispatch.attributes.contains(attribute) {
                    dispatch.attributes.push(attribute);
                }
            }
        }
        dispatch.attributes.sort_unstable();
        self.host.observe(&dispatch.attributes);
        self.dispatch = dispatch;
    }

    // -------------------------------------------------------------------------
    // Callbacks and timers
    // -------------------------------------------------------------------------

    fn invoke<F>(&mut self, idx: usize, f: F)
    where
        F: FnOnce(&mut dyn PageComponent<H::Node>, &mut WatchCx<'_, H::Node>),
    {
        let document = self.host.document();
        let mut requests = Vec::new();
        let mut cx = WatchCx {
            url: &self.last_url,
            document: &document,
            now_ms: self.host.now_ms(),
            requests: &mut requests,
        };
        f(self.slots[idx].component.as_mut(), &mut cx);

        if self.state == WatchState::Running {
            for request in requests {
                self.handle_request(idx, request);
            }
        }
    }

    fn handle_request(&mut self, idx: usize, request: TimerRequest) {
        if self.slots[idx].mounted_url.is_none() {
            return;
        }
        match request {
            TimerRequest::Poll(name) => {
                self.clear_keyed((idx, name, TimerKind::Poll));
                let now = self.host.now_ms();
                let decision = self.polls.entry((idx, name)).or_default().trigger(now);
                match decision {
                    PollDecision::RunNow => self.invoke(idx, |c, cx| c.on_poll(name, cx)),
                    PollDecision::Schedule { delay_ms } => {
                        self.arm((idx, name, TimerKind::Poll), delay_ms)
                    }
                }
            }
            TimerRequest::Once(name, delay_ms) => {
                self.clear_keyed((idx, name, TimerKind::Once));
                self.arm((idx, name, TimerKind::Once), delay_ms);
            }
            TimerRequest::Cancel(name) => self.clear_keyed((idx, name, TimerKind::Once)),
        }
    }

    fn arm(&mut self, key: TimerKey, delay_ms: u32) {
        let token = self.next_token;
        self.next_token += 1;
        self.timers.insert(token, key);
        self.timer_tokens.insert(key, token);
        self.host.set_timer(token, delay_ms);
    }

    fn clear_keyed(&mut self, key: TimerKey) {
        if let Some(token) = self.timer_tokens.remove(&key) {
            self.timers.remove(&token);
            self.host.clear_timer(token);
        }
    }

    fn release_timers(&mut self, idx: usize) {
        let keys: Vec<TimerKey> = self
            .timer_tokens
            .keys()
            .filter(|(slot, _, _)| *slot == idx)
            .copied()
            .collect();
        for key in keys {
            self.clear_keyed(key);
        }
        self.polls.retain(|(slot, _), _| *slot != idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHost, FakeNode};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every callback; injects a marker node while mounted.
    struct Probe {
        name: &'static str,
        url: &'static str,
        rules: Rules,
        remount: bool,
        log: Log,
        injected: Option<FakeNode>,
    }

    impl Probe {
        fn new(name: &'static str, url: &'static str, rules: Rules, log: &Log) -> Box<Self> {
            Box::new(Self {
                name,
                url,
                rules,
                remount: false,
                log: log.clone(),
                injected: None,
            })
        }

        fn push(&self, entry: String) {
            self.log.borrow_mut().push(entry);
        }
    }

    impl PageComponent<FakeNode> for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn url_match(&self) -> UrlMatch {
            UrlMatch::Contains(self.url)
        }

        fn rules(&self) -> Rules {
            self.rules.clone()
        }

        fn remount_on_change(&self) -> bool {
            self.remount
        }

        fn on_mount(&mut self, cx: &mut WatchCx<'_, FakeNode>) {
            let marker = FakeNode::new("div").class(self.name);
            cx.document().append(&marker);
            self.injected = Some(marker);
            self.push(format!("mount {}", self.name));
        }

        fn on_unmount(&mut self, _cx: &mut WatchCx<'_, FakeNode>) {
            if let Some(marker) = self.injected.take() {
                marker.detach();
            }
            self.push(format!("unmount {}", self.name));
        }

        fn on_added(
            &mut self,
            selector: &'static str,
            element: &FakeNode,
            _cx: &mut WatchCx<'_, FakeNode>,
        ) {
            self.push(format!("{} added {} {}", self.name, selector, element.tag()));
        }

        fn on_removed(&mut self, selector: &'static str, _cx: &mut WatchCx<'_, FakeNode>) {
            self.push(format!("{} removed {}", self.name, selector));
        }

        fn on_modified(
            &mut self,
            selector: &'static str,
            _target: &FakeNode,
            record: &MutationRecord<FakeNode>,
            _cx: &mut WatchCx<'_, FakeNode>,
        ) {
            let attr = record.attribute_name().unwrap_or("");
            self.push(format!("{} modified {} {}", self.name, selector, attr));
        }

        fn on_event(&mut self, event: &HostEvent, cx: &mut WatchCx<'_, FakeNode>) {
            if let HostEvent::MediaTick = event {
                cx.poll_update("tick");
            }
        }

        fn on_poll(&mut self, key: &'static str, cx: &mut WatchCx<'_, FakeNode>) {
            self.push(format!("{} poll {} @{}", self.name, key, cx.now_ms()));
        }

        fn on_timer(&mut self, key: &'static str, _cx: &mut WatchCx<'_, FakeNode>) {
            self.push(format!("{} timer {}", self.name, key));
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.borrow().clone()
    }

    #[test]
    fn test_start_mounts_matching_components() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch?v=1");
        let mut watch = SiteWatch::new(host.clone());
        watch
            .register(Probe::new("video", "/watch", Rules::new(), &log))
            .register(Probe::new("channel", "/channel/", Rules::new(), &log));
        assert!(entries(&log).is_empty());

        watch.start();
        assert_eq!(entries(&log), vec!["mount video"]);
        assert!(watch.is_mounted("video"));
        assert!(!watch.is_mounted("channel"));
    }

    #[test]
    fn test_navigation_unmounts_before_mounting() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch?v=1");
        let mut watch = SiteWatch::new(host.clone());
        watch
            .register(Probe::new("video", "/watch", Rules::new(), &log))
            .register(Probe::new(
                "channel",
                "/channel/",
                Rules::new().on_added("ytd-header"),
                &log,
            ));
        watch.start();
        assert!(host.document().query(".video").is_some());

        host.set_url("https://y.com/channel/UC1");
        let header = FakeNode::new("ytd-header");
        host.document().append(&header);
        watch.process(&[MutationRecord::child_list(host.document(), vec![header], vec![])]);

        assert_eq!(
            entries(&log),
            vec![
                "mount video",
                "unmount video",
                "mount channel",
                "channel added ytd-header ytd-header",
            ]
        );
        assert!(host.document().query(".video").is_none());
        assert!(host.document().query(".channel").is_some());
    }

    #[test]
    fn test_remount_on_change() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch?v=1");
        let mut watch = SiteWatch::new(host.clone());
        let mut probe = Probe::new("video", "/watch", Rules::new(), &log);
        probe.remount = true;
        watch
            .register(probe)
            .register(Probe::new("any", "y.com", Rules::new(), &log));
        watch.start();

        host.set_url("https://y.com/watch?v=2");
        watch.process(&[]);
        assert_eq!(
            entries(&log),
            vec!["mount video", "mount any", "unmount video", "mount video"]
        );
    }

    #[test]
    fn test_marker_reflection_does_not_remount() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch?v=1");
        let mut watch = SiteWatch::new(host.clone());
        let mut probe = Probe::new("video", "/watch", Rules::new(), &log);
        probe.remount = true;
        watch.register(probe);
        watch.start();

        host.set_url(&url::reflect("https://y.com/watch?v=1", true));
        watch.process(&[]);
        assert_eq!(entries(&log), vec!["mount video"]);
    }

    #[test]
    fn test_added_subtree_match_passes_matched_element() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch");
        let mut watch = SiteWatch::new(host.clone());
        watch.register(Probe::new(
            "video",
            "/watch",
            Rules::new().on_added(".skip").on_removed(".skip"),
            &log,
        ));
        watch.start();

        let wrapper = FakeNode::new("div").child(FakeNode::new("button").class("skip"));
        host.document().append(&wrapper);
        let added = MutationRecord::child_list(host.document(), vec![wrapper.clone()], vec![]);
        watch.process(&[added]);
        wrapper.detach();
        watch.process(&[MutationRecord::child_list(host.document(), vec![], vec![wrapper])]);

        assert_eq!(
            &entries(&log)[1..],
            ["video added .skip button", "video removed .skip"]
        );
    }

    #[test]
    fn test_attribute_allow_list() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch");
        let mut watch = SiteWatch::new(host.clone());
        watch
            .register(Probe::new(
                "video",
                "/watch",
                Rules::new().on_modified("#player").watch_attribute("class"),
                &log,
            ))
            .register(Probe::new(
                "channel",
                "/channel/",
                Rules::new().watch_attribute("href"),
                &log,
            ));
        watch.start();
        assert_eq!(watch.observed_attributes(), ["class"]);
        assert_eq!(host.observed().last().cloned(), Some(vec!["class"]));

        let player = FakeNode::new("div").id("player");
        host.document().append(&player);
        watch.process(&[
            MutationRecord::attribute(player.clone(), "class", None),
            MutationRecord::attribute(player, "style", None),
        ]);
        assert_eq!(&entries(&log)[1..], ["video modified #player class"]);
    }

    #[test]
    fn test_poll_update_coalesces() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch");
        let mut watch = SiteWatch::new(host.clone());
        watch.register(Probe::new("video", "/watch", Rules::new(), &log));
        watch.start();

        for _ in 0..5 {
            watch.dispatch_event(&HostEvent::MediaTick);
            host.advance(&mut watch, 10.0);
        }
        host.advance(&mut watch, 100.0);

        let polls: Vec<String> = entries(&log).into_iter().filter(|e| e.contains("poll")).collect();
        assert_eq!(polls.len(), 2, "{polls:?}");
    }

    #[test]
    fn test_unmount_clears_pending_timers() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch");
        let mut watch = SiteWatch::new(host.clone());
        watch.register(Probe::new("video", "/watch", Rules::new(), &log));
        watch.start();

        watch.dispatch_event(&HostEvent::MediaTick);
        watch.dispatch_event(&HostEvent::MediaTick);
        assert_eq!(host.pending_timers(), 1);

        host.set_url("https://y.com/");
        watch.process(&[]);
        assert_eq!(host.pending_timers(), 0);
    }

    #[test]
    fn test_destroy_is_idempotent_and_final() {
        let log = Log::default();
        let host = FakeHost::new("https://y.com/watch");
        let mut watch = SiteWatch::new(host.clone());
        watch.register(Probe::new("video", "/watch", Rules::new().on_added("div"), &log));
        watch.start();
        watch.dispatch_event(&HostEvent::MediaTick);
        watch.dispatch_event(&HostEvent::MediaTick);

        watch.destroy();
        watch.destroy();
        assert!(host.disconnected());
        assert_eq!(host.pending_timers(), 0);

        let node = FakeNode::new("div");
        watch.process(&[MutationRecord::child_list(host.document(), vec![node], vec![])]);
        watch.dispatch_event(&HostEvent::MediaTick);
        let log = entries(&log);
        assert_eq!(log.iter().filter(|e| e.starts_with("unmount")).count(), 1);
        assert_eq!(log.last().map(String::as_str), Some("unmount video"));
    }
}
