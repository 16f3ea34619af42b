//! In-memory fakes for the core's platform traits.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::ads::{Command, MediaSnapshot};
use crate::agent::{Envelope, EnvelopeSink, Transport};
use crate::components::{Bridge, PageSurface, VideoSurface};
use crate::dom::DomNode;
use crate::error::Error;
use crate::lists::ChannelSet;
use crate::settings::{Settings, SettingsChange};
use crate::types::Channel;
use crate::watch::{Host, SiteWatch, TimerToken};

// =============================================================================
// FakeNode
// =============================================================================

struct NodeData {
    tag: String,
    attrs: RefCell<Vec<(String, String)>>,
    text: RefCell<String>,
    data: RefCell<Option<Value>>,
    children: RefCell<Vec<FakeNode>>,
    parent: RefCell<Weak<NodeData>>,
}

/// Element in an in-memory tree. Clones share the node.
#[derive(Clone)]
pub struct FakeNode(Rc<NodeData>);

impl PartialEq for FakeNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for FakeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.0.tag)?;
        for (k, v) in self.0.attrs.borrow().iter() {
            write!(f, " {k}={v:?}")?;
        }
        f.write_str(">")
    }
}

impl FakeNode {
    pub fn new(tag: &str) -> Self {
        Self(Rc::new(NodeData {
            tag: tag.to_ascii_lowercase(),
            attrs: RefCell::new(Vec::new()),
            text: RefCell::new(String::new()),
            data: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
        }))
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn attr(self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn class(self, class: &str) -> Self {
        let classes = match self.get_attr("class") {
            Some(existing) if !existing.is_empty() => format!("{existing} {class}"),
            _ => class.to_string(),
        };
        self.attr("class", &classes)
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn with_text(self, text: &str) -> Self {
        *self.0.text.borrow_mut() = text.to_string();
        self
    }

    pub fn data(self, data: Value) -> Self {
        self.set_data(data);
        self
    }

    pub fn child(self, child: FakeNode) -> Self {
        self.append(&child);
        self
    }

    /// Append `child`, moving it out of any previous parent.
    pub fn append(&self, child: &FakeNode) -> &Self {
        child.detach();
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
        self.0.children.borrow_mut().push(child.clone());
        self
    }

    pub fn detach(&self) {
        let parent = self.0.parent.borrow().upgrade();
        if let Some(parent) = parent {
            parent.children.borrow_mut().retain(|c| !Rc::ptr_eq(&c.0, &self.0));
        }
        *self.0.parent.borrow_mut() = Weak::new();
    }

    pub fn set_attr(&self, name: &str, value: &str) {
        let mut attrs = self.0.attrs.borrow_mut();
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove_attr(&self, name: &str) {
        self.0.attrs.borrow_mut().retain(|(k, _)| k != name);
    }

    pub fn set_data(&self, data: Value) {
        *self.0.data.borrow_mut() = Some(data);
    }

    fn get_attr(&self, name: &str) -> Option<String> {
        self.0
            .attrs
            .borrow()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    fn parent(&self) -> Option<FakeNode> {
        self.0.parent.borrow().upgrade().map(FakeNode)
    }

    fn children(&self) -> Vec<FakeNode> {
        self.0.children.borrow().clone()
    }

    fn descendants(&self, out: &mut Vec<FakeNode>) {
        for child in self.children() {
            out.push(child.clone());
            child.descendants(out);
        }
    }
}

impl DomNode for FakeNode {
    type Data = Value;

    fn matches(&self, selector: &str) -> bool {
        parse_selector_list(selector)
            .iter()
            .any(|complex| matches_complex(self, complex))
    }

    fn query(&self, selector: &str) -> Option<Self> {
        let list = parse_selector_list(selector);
        let mut all = Vec::new();
        self.descendants(&mut all);
        all.into_iter()
            .find(|node| list.iter().any(|complex| matches_complex(node, complex)))
    }

    fn query_all(&self, selector: &str) -> Vec<Self> {
        let list = parse_selector_list(selector);
        let mut all = Vec::new();
        self.descendants(&mut all);
        all.into_iter()
            .filter(|node| list.iter().any(|complex| matches_complex(node, complex)))
            .collect()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.get_attr(name)
    }

    fn text(&self) -> String {
        let mut text = self.0.text.borrow().clone();
        for child in self.children() {
            text.push_str(&child.text());
        }
        text
    }

    fn host_data(&self) -> Option<Value> {
        self.0.data.borrow().clone()
    }
}

// -----------------------------------------------------------------------------
// Selectors: tag, .class, #id, [attr], [attr=value], descendant and `>` combinators,
// comma lists.
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, Option<String>)>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Combinator {
    Descendant,
    Child,
}

/// Compounds right to left, each with the combinator linking it to the next one leftwards.
type Complex = Vec<(Compound, Option<Combinator>)>;

fn parse_selector_list(selector: &str) -> Vec<Complex> {
    split_outside_brackets(selector, ',')
        .iter()
        .map(|s| parse_complex(s.trim()))
        .collect()
}

fn split_outside_brackets(s: &str, sep: char) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut depth = 0;
    for c in s.chars() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            _ => {}
        }
        if c == sep && depth == 0 {
            parts.push(String::new());
        } else if let Some(last) = parts.last_mut() {
            last.push(c);
        }
    }
    parts
}

fn parse_complex(s: &str) -> Complex {
    let spaced = s.replace('>', " > ");
    let mut compounds = Vec::new();
    let mut pending = Combinator::Descendant;
    for token in split_outside_brackets(&spaced, ' ') {
        match token.as_str() {
            "" => {}
            ">" => pending = Combinator::Child,
            _ => {
                compounds.push((parse_compound(&token), pending));
                pending = Combinator::Descendant;
            }
        }
    }
    let len = compounds.len();
    let mut out: Complex = Vec::with_capacity(len);
    for i in (0..len).rev() {
        let link = (i > 0).then_some(compounds[i].1);
        let compound = std::mem::take(&mut compounds[i].0);
        out.push((compound, link));
    }
    out
}

fn parse_compound(s: &str) -> Compound {
    let mut compound = Compound::default();
    let mut rest = s;
    let tag_end = rest.find(['.', '#', '[']).unwrap_or(rest.len());
    if tag_end > 0 && &rest[..tag_end] != "*" {
        compound.tag = Some(rest[..tag_end].to_ascii_lowercase());
    }
    rest = &rest[tag_end..];

    while let Some(c) = rest.chars().next() {
        match c {
            '[' => {
                let end = rest.find(']').unwrap_or(rest.len());
                let inner = &rest[1..end];
                let attr = match inner.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.trim_matches(['"', '\'']).to_string())),
                    None => (inner.to_string(), None),
                };
                compound.attrs.push(attr);
                rest = rest.get(end + 1..).unwrap_or("");
            }
            '.' | '#' => {
                let body = &rest[1..];
                let end = body.find(['.', '#', '[']).unwrap_or(body.len());
                let name = body[..end].to_string();
                if c == '.' {
                    compound.classes.push(name);
                } else {
                    compound.id = Some(name);
                }
                rest = &body[end..];
            }
            _ => break,
        }
    }
    compound
}

fn matches_compound(node: &FakeNode, compound: &Compound) -> bool {
    if compound.tag.as_deref().is_some_and(|tag| tag != node.tag()) {
        return false;
    }
    if let Some(id) = &compound.id {
        if node.get_attr("id").as_deref() != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.iter().all(|c| node.has_class(c)) {
        return false;
    }
    compound.attrs.iter().all(|(name, value)| match (node.get_attr(name), value) {
        (Some(_), None) => true,
        (Some(actual), Some(expected)) => actual == *expected,
        (None, _) => false,
    })
}

fn matches_complex(node: &FakeNode, complex: &[(Compound, Option<Combinator>)]) -> bool {
    let Some(((compound, link), rest)) = complex.split_first() else {
        return true;
    };
    if !matches_compound(node, compound) {
        return false;
    }
    match link {
        None => true,
        Some(Combinator::Child) => node.parent().is_some_and(|p| matches_complex(&p, rest)),
        Some(Combinator::Descendant) => {
            let mut ancestor = node.parent();
            while let Some(current) = ancestor {
                if matches_complex(&current, rest) {
                    return true;
                }
                ancestor = current.parent();
            }
            false
        }
    }
}

// =============================================================================
// FakeHost
// =============================================================================

struct HostState {
    url: RefCell<String>,
    document: FakeNode,
    now: Cell<f64>,
    observed: RefCell<Vec<Vec<&'static str>>>,
    disconnected: Cell<bool>,
    timers: RefCell<BTreeMap<TimerToken, f64>>,
}

/// `Host` with a manual clock. Clones share state.
#[derive(Clone)]
pub struct FakeHost(Rc<HostState>);

impl FakeHost {
    pub fn new(url: &str) -> Self {
        Self(Rc::new(HostState {
            url: RefCell::new(url.to_string()),
            document: FakeNode::new("html"),
            now: Cell::new(1000.0),
            observed: RefCell::new(Vec::new()),
            disconnected: Cell::new(false),
            timers: RefCell::new(BTreeMap::new()),
        }))
    }

    pub fn set_url(&self, url: &str) {
        *self.0.url.borrow_mut() = url.to_string();
    }

    pub fn document(&self) -> FakeNode {
        self.0.document.clone()
    }

    /// Every attribute filter the observer was configured with, oldest first.
    pub fn observed(&self) -> Vec<Vec<&'static str>> {
        self.0.observed.borrow().clone()
    }

    pub fn disconnected(&self) -> bool {
        self.0.disconnected.get()
    }

    pub fn pending_timers(&self) -> usize {
        self.0.timers.borrow().len()
    }

    /// Move the clock forward, firing due timers in deadline order.
    pub fn advance(&self, watch: &mut SiteWatch<FakeHost>, ms: f64) {
        let target = self.0.now.get() + ms;
        loop {
            let next = self
                .0
                .timers
                .borrow()
                .iter()
                .filter(|(_, due)| **due <= target)
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(token, due)| (*token, *due));
            let Some((token, due)) = next else {
                break;
            };
            self.0.timers.borrow_mut().remove(&token);
            self.0.now.set(due.max(self.0.now.get()));
            watch.fire_timer(token);
        }
        self.0.now.set(target);
    }
}

impl Host for FakeHost {
    type Node = FakeNode;

    fn location(&self) -> String {
        self.0.url.borrow().clone()
    }

    fn document(&self) -> FakeNode {
        self.0.document.clone()
    }

    fn now_ms(&self) -> f64 {
        self.0.now.get()
    }

    fn observe(&self, attribute_filter: &[&'static str]) {
        self.0.disconnected.set(false);
        self.0.observed.borrow_mut().push(attribute_filter.to_vec());
    }

    fn disconnect(&self) {
        self.0.disconnected.set(true);
    }

    fn set_timer(&self, token: TimerToken, delay_ms: u32) {
        let due = self.0.now.get() + f64::from(delay_ms);
        self.0.timers.borrow_mut().insert(token, due);
    }

    fn clear_timer(&self, token: TimerToken) {
        self.0.timers.borrow_mut().remove(&token);
    }
}

// =============================================================================
// Bus
// =============================================================================

type SharedSink = Rc<EnvelopeSink>;

#[derive(Default)]
struct BusState {
    listeners: RefCell<Vec<(u32, SharedSink)>>,
    replies: RefCell<Vec<Envelope>>,
    next_endpoint: Cell<u32>,
}

/// Shared event bus; every endpoint hears every post, its own included.
#[derive(Clone, Default)]
pub struct Bus(Rc<BusState>);

impl Bus {
    pub fn endpoint(&self) -> BusEndpoint {
        let id = self.0.next_endpoint.get();
        self.0.next_endpoint.set(id + 1);
        BusEndpoint {
            bus: self.clone(),
            id,
        }
    }

    pub fn last_reply(&self) -> Option<Envelope> {
        self.0.replies.borrow().last().cloned()
    }

    pub fn listeners(&self) -> usize {
        self.0.listeners.borrow().len()
    }
}

pub struct BusEndpoint {
    bus: Bus,
    id: u32,
}

impl Transport for BusEndpoint {
    fn post(&self, envelope: &Envelope) -> Result<(), Error> {
        // Same copy the real transports make crossing realms.
        let wire = serde_json::to_string(envelope)?;
        if envelope.is_reply {
            self.bus.0.replies.borrow_mut().push(envelope.clone());
        }
        let sinks: Vec<SharedSink> = self
            .bus
            .0
            .listeners
            .borrow()
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();
        for sink in sinks {
            let copy: Envelope = serde_json::from_str(&wire)?;
            sink(copy);
        }
        Ok(())
    }

    fn listen(&self, sink: EnvelopeSink) {
        self.bus.0.listeners.borrow_mut().push((self.id, Rc::new(sink)));
    }

    fn close(&self) {
        self.bus.0.listeners.borrow_mut().retain(|(id, _)| *id != self.id);
    }
}

// =============================================================================
// Component Seams
// =============================================================================

/// Surface that records what components asked for.
#[derive(Default)]
pub struct RecordingSurface {
    commands: RefCell<Vec<Command>>,
    media: RefCell<Option<MediaSnapshot>>,
    hidden: Cell<bool>,
    clicked: Cell<usize>,
    removed: Cell<usize>,
    attribute_writes: Cell<usize>,
}

impl RecordingSurface {
    pub fn commands(&self) -> Vec<Command> {
        self.commands.borrow().clone()
    }

    pub fn set_media(&self, media: Option<MediaSnapshot>) {
        *self.media.borrow_mut() = media;
    }

    pub fn set_hidden(&self, hidden: bool) {
        self.hidden.set(hidden);
    }

    pub fn clicked(&self) -> usize {
        self.clicked.get()
    }

    pub fn removed(&self) -> usize {
        self.removed.get()
    }

    pub fn attribute_writes(&self) -> usize {
        self.attribute_writes.get()
    }
}

impl PageSurface<FakeNode> for RecordingSurface {
    fn apply(&self, command: &Command) -> Result<(), Error> {
        self.commands.borrow_mut().push(command.clone());
        Ok(())
    }

    fn remove_controls(&self) {
        self.removed.set(self.removed.get() + 1);
    }

    fn click(&self, _node: &FakeNode) {
        self.clicked.set(self.clicked.get() + 1);
    }

    fn set_attribute(&self, node: &FakeNode, name: &str, value: &str) {
        node.set_attr(name, value);
        self.attribute_writes.set(self.attribute_writes.get() + 1);
    }
}

impl VideoSurface<FakeNode> for RecordingSurface {
    fn media(&self) -> Option<MediaSnapshot> {
        self.media.borrow().clone()
    }

    fn hidden(&self) -> bool {
        self.hidden.get()
    }
}

/// Bridge over a local snapshot that records outgoing requests.
pub struct FakeBridge {
    settings: RefCell<Rc<Settings>>,
    subscriptions: ChannelSet,
    changes: RefCell<Vec<SettingsChange>>,
    notes: RefCell<Vec<(&'static str, Value)>>,
    recent_ad_requests: Cell<u32>,
}

impl FakeBridge {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RefCell::new(Rc::new(settings)),
            subscriptions: ChannelSet::default(),
            changes: RefCell::new(Vec::new()),
            notes: RefCell::new(Vec::new()),
            recent_ad_requests: Cell::new(0),
        }
    }

    pub fn recent_ad_requests(&self) -> u32 {
        self.recent_ad_requests.get()
    }

    pub fn replace_settings(&self, settings: Settings) {
        *self.settings.borrow_mut() = Rc::new(settings);
    }

    pub fn changes(&self) -> Vec<SettingsChange> {
        self.changes.borrow().clone()
    }

    pub fn notes_named(&self, name: &str) -> Vec<Value> {
        self.notes
            .borrow()
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl Bridge for FakeBridge {
    fn settings(&self) -> Rc<Settings> {
        self.settings.borrow().clone()
    }

    fn subscribed_to(&self, channel: &Channel) -> bool {
        self.subscriptions.has(channel)
    }

    fn request_change(&self, change: SettingsChange) {
        self.changes.borrow_mut().push(change);
    }

    fn notify(&self, name: &'static str, message: Value) {
        self.notes.borrow_mut().push((name, message));
    }

    fn request_recent_ad(&self) {
        self.recent_ad_requests.set(self.recent_ad_requests.get() + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let root = FakeNode::new("html").child(
            FakeNode::new("div").id("movie_player").class("html5 ad-showing").child(
                FakeNode::new("a")
                    .attr("href", "/channel/UC1")
                    .attr("aria-label", "Close ad"),
            ),
        );
        assert!(root.query("#movie_player.ad-showing").is_some());
        assert!(root.query("div.missing, #movie_player").is_some());
        assert!(root.query("#movie_player a[href]").is_some());
        assert!(root.query("#movie_player > a[aria-label='Close ad']").is_some());
        assert!(root.query("html > a").is_none());
        assert!(root.query("span a").is_none());
        assert_eq!(root.query_all("div, a").len(), 2);
    }
}
