//! Search results and the related sidebar.
//!
//! Video links of effectively whitelisted channels get the allow marker, so the next watch
//! page starts with ads allowed before its own component has resolved anything.

use std::rc::Rc;

use log::debug;

use super::{Bridge, PageSurface, ITEM_VIDEO_LINK, RELATED_ITEM, SEARCH_ITEM};
use crate::dom::DomNode;
use crate::lists::Oracle;
use crate::resolver::{self, IdentityPaths};
use crate::settings::Settings;
use crate::url::{self, PageKind};
use crate::watch::{HostEvent, PageComponent, Rules, UrlMatch, WatchCx};

const RELATED_POLL: &str = "related";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    Search,
    /// Sidebar on the watch page. Refires on every lazy-loaded chunk, so work is polled.
    Related,
}

fn is_search_page(url: &str) -> bool {
    PageKind::from_url(url) == Some(PageKind::Search)
}

pub struct ListingComponent<N> {
    listing: Listing,
    bridge: Rc<dyn Bridge>,
    surface: Rc<dyn PageSurface<N>>,
}

impl<N: DomNode> ListingComponent<N> {
    pub fn search(bridge: Rc<dyn Bridge>, surface: Rc<dyn PageSurface<N>>) -> Self {
        Self {
            listing: Listing::Search,
            bridge,
            surface,
        }
    }

    pub fn related(bridge: Rc<dyn Bridge>, surface: Rc<dyn PageSurface<N>>) -> Self {
        Self {
            listing: Listing::Related,
            bridge,
            surface,
        }
    }

    fn item_selector(&self) -> &'static str {
        match self.listing {
            Listing::Search => SEARCH_ITEM,
            Listing::Related => RELATED_ITEM,
        }
    }

    fn paths(&self) -> &'static IdentityPaths {
        match self.listing {
            Listing::Search => &resolver::SEARCH_ITEM,
            Listing::Related => &resolver::RELATED_ITEM,
        }
    }

    fn reflect_all(&self, cx: &WatchCx<'_, N>) {
        let settings = self.bridge.settings();
        let items = cx.document().query_all(self.item_selector());
        let changed = items
            .iter()
            .filter(|item| self.reflect_item(item, &settings, cx.now_ms()))
            .count();
        debug!("{:?}: {} of {} items updated", self.listing, changed, items.len());
    }

    /// Returns whether any link changed.
    fn reflect_item(&self, item: &N, settings: &Settings, now_ms: f64) -> bool {
        let Some(identity) = resolver::resolve(item, self.paths()) else {
            return false;
        };
        let subscribed = identity.subscribed.unwrap_or(false)
            || self.bridge.subscribed_to(&identity.channel);
        let allow = Oracle::new(settings).allows_ads(&identity.channel, subscribed, now_ms);

        let mut changed = false;
        for link in item.query_all(ITEM_VIDEO_LINK) {
            let Some(href) = link.attribute("href") else {
                continue;
            };
            let next = url::reflect(&href, allow);
            if next != href {
                self.surface.set_attribute(&link, "href", &next);
                changed = true;
            }
        }
        changed
    }
}

impl<N: DomNode> PageComponent<N> for ListingComponent<N> {
    fn name(&self) -> &'static str {
        match self.listing {
            Listing::Search => "search",
            Listing::Related => "related",
        }
    }

    fn url_match(&self) -> UrlMatch {
        match self.listing {
            Listing::Search => UrlMatch::Predicate(is_search_page),
            Listing::Related => UrlMatch::Contains("/watch"),
        }
    }

    fn rules(&self) -> Rules {
        Rules::new().on_added(self.item_selector())
    }

    fn on_mount(&mut self, cx: &mut WatchCx<'_, N>) {
        match self.listing {
            Listing::Search => self.reflect_all(cx),
            Listing::Related => cx.poll_update(RELATED_POLL),
        }
    }

    fn on_unmount(&mut self, _cx: &mut WatchCx<'_, N>) {}

    fn on_added(&mut self, _selector: &'static str, element: &N, cx: &mut WatchCx<'_, N>) {
        match self.listing {
            Listing::Search => {
                let settings = self.bridge.settings();
                self.reflect_item(element, &settings, cx.now_ms());
            }
            Listing::Related => cx.poll_update(RELATED_POLL),
        }
    }

    fn on_event(&mut self, event: &HostEvent, cx: &mut WatchCx<'_, N>) {
        if let HostEvent::SettingsChanged = event {
            match self.listing {
                Listing::Search => self.reflect_all(cx),
                Listing::Related => cx.poll_update(RELATED_POLL),
            }
        }
    }

    fn on_poll(&mut self, _key: &'static str, cx: &mut WatchCx<'_, N>) {
        self.reflect_all(cx);
    }
}
