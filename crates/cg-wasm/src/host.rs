//! `Host` over the page: one `MutationObserver` plus `setTimeout`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use cg_core::dom::MutationRecord;
use cg_core::watch::{Host, SiteWatch, TimerToken};
use log::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, MutationObserver, MutationObserverInit, Window};

use crate::dom::{elements, WebNode};

pub type SharedWatch = Rc<RefCell<SiteWatch<WebHost>>>;
pub type WeakWatch = Weak<RefCell<SiteWatch<WebHost>>>;

struct HostInner {
    window: Window,
    document: Document,
    root: Element,
    watch: RefCell<WeakWatch>,
    observer: RefCell<Option<MutationObserver>>,
    callback: RefCell<Option<Closure<dyn FnMut(js_sys::Array, MutationObserver)>>>,
    timers: RefCell<HashMap<TimerToken, i32>>,
}

#[derive(Clone)]
pub struct WebHost {
    inner: Rc<HostInner>,
}

impl WebHost {
    /// `None` for a document without a root element.
    pub fn new(window: Window, document: Document) -> Option<Self> {
        let root = document.document_element()?;
        Some(Self {
            inner: Rc::new(HostInner {
                window,
                document,
                root,
                watch: RefCell::new(Weak::new()),
                observer: RefCell::new(None),
                callback: RefCell::new(None),
                timers: RefCell::new(HashMap::new()),
            }),
        })
    }

    /// Point observer batches and timers at the engine that owns this host.
    pub fn bind(&self, watch: &SharedWatch) {
        *self.inner.watch.borrow_mut() = Rc::downgrade(watch);
    }

    /// Run `f` on the engine unless it is gone or already borrowed further up the stack.
    pub fn with_watch(weak: &WeakWatch, f: impl FnOnce(&mut SiteWatch<WebHost>)) {
        let Some(watch) = weak.upgrade() else {
            return;
        };
        match watch.try_borrow_mut() {
            Ok(mut watch) => f(&mut watch),
            Err(_) => warn!("site watch busy; event dropped"),
        };
    }

    /// The single observer, created on first use.
    fn observer(&self) -> Option<MutationObserver> {
        if let Some(observer) = self.inner.observer.borrow().as_ref() {
            return Some(observer.clone());
        }
        let weak = self.inner.watch.borrow().clone();
        let callback = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
            move |records: js_sys::Array, _observer: MutationObserver| {
                let records = WebHost::translate(&records);
                WebHost::with_watch(&weak, |watch| watch.process(&records));
            },
        );
        let observer = match MutationObserver::new(callback.as_ref().unchecked_ref()) {
            Ok(observer) => observer,
            Err(e) => {
                warn!("MutationObserver unavailable: {e:?}");
                return None;
            }
        };
        *self.inner.observer.borrow_mut() = Some(observer.clone());
        *self.inner.callback.borrow_mut() = Some(callback);
        Some(observer)
    }

    fn translate(records: &js_sys::Array) -> Vec<MutationRecord<WebNode>> {
        records
            .iter()
            .filter_map(|record| record.dyn_into::<web_sys::MutationRecord>().ok())
            .filter_map(|record| {
                let target = WebNode(record.target()?.dyn_into().ok()?);
                Some(match record.type_().as_str() {
                    "attributes" => MutationRecord::attribute(
                        target,
                        record.attribute_name().unwrap_or_default(),
                        record.old_value(),
                    ),
                    _ => MutationRecord::child_list(
                        target,
                        elements(&record.added_nodes()),
                        elements(&record.removed_nodes()),
                    ),
                })
            })
            .collect()
    }
}

impl Host for WebHost {
    type Node = WebNode;

    fn location(&self) -> String {
        self.inner.document.location().and_then(|l| l.href().ok()).unwrap_or_default()
    }

    fn document(&self) -> WebNode {
        WebNode(self.inner.root.clone())
    }

    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn observe(&self, attribute_filter: &[&'static str]) {
        let Some(observer) = self.observer() else {
            return;
        };
        observer.disconnect();

        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        if !attribute_filter.is_empty() {
            let filter: js_sys::Array =
                attribute_filter.iter().map(|a| JsValue::from_str(a)).collect();
            init.set_attributes(true);
            init.set_attribute_filter(&filter);
        }
        match observer.observe_with_options(&self.inner.document, &init) {
            Ok(()) => debug!("observing attributes {attribute_filter:?}"),
            Err(e) => warn!("observe failed: {e:?}"),
        }
    }

    fn disconnect(&self) {
        if let Some(observer) = self.inner.observer.borrow().as_ref() {
            observer.disconnect();
        }
    }

    fn set_timer(&self, token: TimerToken, delay_ms: u32) {
        let weak = self.inner.watch.borrow().clone();
        let inner = Rc::downgrade(&self.inner);
        let fire = Closure::once_into_js(move || {
            if let Some(inner) = inner.upgrade() {
                inner.timers.borrow_mut().remove(&token);
            }
            WebHost::with_watch(&weak, |watch| watch.fire_timer(token));
        });
        let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
        match self
            .inner
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(fire.unchecked_ref(), delay)
        {
            Ok(handle) => {
                self.inner.timers.borrow_mut().insert(token, handle);
            }
            Err(e) => warn!("setTimeout failed: {e:?}"),
        }
    }

    fn clear_timer(&self, token: TimerToken) {
        if let Some(handle) = self.inner.timers.borrow_mut().remove(&token) {
            self.inner.window.clear_timeout_with_handle(handle);
        }
    }
}
