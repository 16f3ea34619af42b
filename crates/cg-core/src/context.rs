//! Per-script-world context.
//!
//! Exactly one settings snapshot and one agent exist per script world. `Context` owns both
//! and is handed to whatever needs them instead of living in globals.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture};
use log::{debug, info, warn};
use serde_json::Value;

use crate::agent::{verbs, Agent};
use crate::components::Bridge;
use crate::error::Error;
use crate::lists::ChannelSet;
use crate::settings::{InitialState, Settings, SettingsChange, SettingsUpdate};
use crate::types::{Ad, Channel};
use crate::watch::HostEvent;

type EventSink = Rc<dyn Fn(HostEvent)>;
type Teardown = Box<dyn FnOnce()>;

struct ContextInner {
    agent: Agent,
    settings: RefCell<Rc<Settings>>,
    subscriptions: RefCell<ChannelSet>,
    /// Bumped on every pushed snapshot; a stale initial reply must not overwrite a newer push.
    generation: Cell<u64>,
    events: RefCell<Option<EventSink>>,
    teardown: RefCell<Option<Teardown>>,
    destroyed: Cell<bool>,
}

impl ContextInner {
    fn emit(&self, event: HostEvent) {
        let sink = self.events.borrow().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    fn replace_settings(&self, settings: Settings) {
        *self.settings.borrow_mut() = Rc::new(settings);
        info!("settings replaced");
        self.emit(HostEvent::SettingsChanged);
    }
}

/// Settings and messaging for one script world.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    pub fn new(agent: Agent) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                agent,
                settings: RefCell::new(Rc::new(Settings::default())),
                subscriptions: RefCell::new(ChannelSet::default()),
                generation: Cell::new(0),
                events: RefCell::new(None),
                teardown: RefCell::new(None),
                destroyed: Cell::new(false),
            }),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.inner.agent
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Install the push handlers and fetch the initial state.
    ///
    /// `events` receives `SettingsChanged` and `AdUpdate`; `teardown` runs once when the
    /// extension broadcasts `destroy` (or `destroy()` is called locally).
    pub fn init(
        &self,
        events: impl Fn(HostEvent) + 'static,
        teardown: impl FnOnce() + 'static,
    ) -> LocalBoxFuture<'static, Result<(), Error>> {
        *self.inner.events.borrow_mut() = Some(Rc::new(events));
        *self.inner.teardown.borrow_mut() = Some(Box::new(teardown));
        self.install_handlers();

        let weak = Rc::downgrade(&self.inner);
        let started_at = self.inner.generation.get();
        let reply = self.inner.agent.send(verbs::GET_SETTINGS, &Value::Null);
        async move {
            let state: InitialState = serde_json::from_value(reply.await?)?;
            let Some(inner) = weak.upgrade() else {
                return Err(Error::Destroyed);
            };
            *inner.subscriptions.borrow_mut() = state.subscriptions;
            if inner.generation.get() == started_at {
                inner.replace_settings(state.settings);
            } else {
                debug!("initial settings superseded by a pushed update");
                inner.emit(HostEvent::SettingsChanged);
            }
            Ok(())
        }
        .boxed_local()
    }

    fn install_handlers(&self) {
        let agent = &self.inner.agent;

        let weak = Rc::downgrade(&self.inner);
        agent.on_sync(verbs::SETTINGS_UPDATE, move |message| {
            let update: SettingsUpdate = serde_json::from_value(message)?;
            if let Some(inner) = weak.upgrade() {
                inner.generation.set(inner.generation.get() + 1);
                inner.replace_settings(update.settings);
            }
            Ok(Value::Null)
        });

        let weak = Rc::downgrade(&self.inner);
        agent.on_sync(verbs::AD_UPDATE, move |message| {
            let ad: Ad = serde_json::from_value(message)?;
            if let Some(inner) = weak.upgrade() {
                inner.emit(HostEvent::AdUpdate(ad));
            }
            Ok(Value::Null)
        });

        let weak: Weak<ContextInner> = Rc::downgrade(&self.inner);
        agent.on_sync(verbs::DESTROY, move |_| {
            if let Some(inner) = weak.upgrade() {
                Context { inner }.destroy();
            }
            Ok(Value::Null)
        });
    }

    /// Run the teardown hook and release the agent. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        info!("context destroyed");
        self.inner.events.borrow_mut().take();
        let teardown = self.inner.teardown.borrow_mut().take();
        if let Some(teardown) = teardown {
            teardown();
        }
        self.inner.agent.destroy();
    }
}

impl Bridge for Context {
    fn settings(&self) -> Rc<Settings> {
        self.inner.settings.borrow().clone()
    }

    fn subscribed_to(&self, channel: &Channel) -> bool {
        self.inner.subscriptions.borrow().has(channel)
    }

    fn request_change(&self, change: SettingsChange) {
        self.inner.agent.notify(verbs::SET_SETTINGS, &change);
    }

    fn notify(&self, name: &'static str, message: Value) {
        self.inner.agent.notify(name, &message);
    }

    fn request_recent_ad(&self) {
        let weak = Rc::downgrade(&self.inner);
        let reply = self.inner.agent.send(verbs::RECENT_AD, &Value::Null);
        self.inner.agent.spawn(async move {
            let ad = reply
                .await
                .and_then(|value| Ok(serde_json::from_value::<Option<Ad>>(value)?));
            match (ad, weak.upgrade()) {
                (Ok(Some(ad)), Some(inner)) => inner.emit(HostEvent::AdUpdate(ad)),
                (Ok(None), _) => debug!("no recent ad for this tab"),
                (Err(e), _) => warn!("recent-ad failed: {e}"),
                (Ok(Some(_)), None) => {}
            }
        });
    }
}
