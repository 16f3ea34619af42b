//! Agent transports over the two browser event primitives, plus a spawner for agent tasks.

use std::cell::RefCell;

use cg_core::agent::{Envelope, EnvelopeSink, Transport};
use cg_core::Error;
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use log::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{CustomEvent, CustomEventInit, Event, MessageEvent, Window};

type Listener = Closure<dyn FnMut(Event)>;

fn encode(envelope: &Envelope) -> Result<String, Error> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse a JSON-string payload. Anything else on the channel is not ours.
fn decode(payload: &JsValue) -> Option<Envelope> {
    let text = payload.as_string()?;
    match serde_json::from_str(&text) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            debug!("ignoring foreign message: {e}");
            None
        }
    }
}

// =============================================================================
// CustomEvent bus
// =============================================================================

/// `CustomEvent`s named by a shared key on `window`. Both script worlds see the same
/// event, so the detail travels as a JSON string and each side parses it in its own realm.
pub struct CustomEventTransport {
    window: Window,
    key: String,
    listener: RefCell<Option<Listener>>,
}

impl CustomEventTransport {
    pub fn new(window: Window, key: impl Into<String>) -> Self {
        Self {
            window,
            key: key.into(),
            listener: RefCell::new(None),
        }
    }
}

impl Transport for CustomEventTransport {
    fn post(&self, envelope: &Envelope) -> Result<(), Error> {
        let init = CustomEventInit::new();
        init.set_detail(&JsValue::from_str(&encode(envelope)?));
        let event = CustomEvent::new_with_event_init_dict(&self.key, &init)
            .map_err(|e| Error::Undeliverable(format!("{e:?}")))?;
        self.window
            .dispatch_event(&event)
            .map(|_| ())
            .map_err(|e| Error::Undeliverable(format!("{e:?}")))
    }

    fn listen(&self, sink: EnvelopeSink) {
        let listener = Listener::new(move |event: Event| {
            let Some(event) = event.dyn_ref::<CustomEvent>() else {
                return;
            };
            if let Some(envelope) = decode(&event.detail()) {
                sink(envelope);
            }
        });
        if let Err(e) = self
            .window
            .add_event_listener_with_callback(&self.key, listener.as_ref().unchecked_ref())
        {
            warn!("cannot listen on {}: {e:?}", self.key);
            return;
        }
        self.close();
        *self.listener.borrow_mut() = Some(listener);
    }

    fn close(&self) {
        if let Some(listener) = self.listener.borrow_mut().take() {
            let _ = self
                .window
                .remove_event_listener_with_callback(&self.key, listener.as_ref().unchecked_ref());
        }
    }
}

// =============================================================================
// postMessage
// =============================================================================

/// `window.postMessage` to the same origin. Messages that are not envelopes are ignored.
pub struct PostMessageTransport {
    window: Window,
    listener: RefCell<Option<Listener>>,
}

impl PostMessageTransport {
    pub fn new(window: Window) -> Self {
        Self {
            window,
            listener: RefCell::new(None),
        }
    }

    fn target_origin(&self) -> String {
        self.window
            .location()
            .origin()
            .ok()
            .filter(|o| o != "null")
            .unwrap_or_else(|| "*".to_string())
    }
}

impl Transport for PostMessageTransport {
    fn post(&self, envelope: &Envelope) -> Result<(), Error> {
        self.window
            .post_message(&JsValue::from_str(&encode(envelope)?), &self.target_origin())
            .map_err(|e| Error::Undeliverable(format!("{e:?}")))
    }

    fn listen(&self, sink: EnvelopeSink) {
        let listener = Listener::new(move |event: Event| {
            let Some(event) = event.dyn_ref::<MessageEvent>() else {
                return;
            };
            if let Some(envelope) = decode(&event.data()) {
                sink(envelope);
            }
        });
        if let Err(e) = self
            .window
            .add_event_listener_with_callback("message", listener.as_ref().unchecked_ref())
        {
            warn!("cannot listen for messages: {e:?}");
            return;
        }
        self.close();
        *self.listener.borrow_mut() = Some(listener);
    }

    fn close(&self) {
        if let Some(listener) = self.listener.borrow_mut().take() {
            let _ = self
                .window
                .remove_event_listener_with_callback("message", listener.as_ref().unchecked_ref());
        }
    }
}

// =============================================================================
// Spawner
// =============================================================================

/// Runs agent tasks on the browser's microtask queue.
pub struct WasmSpawner;

impl LocalSpawn for WasmSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}
