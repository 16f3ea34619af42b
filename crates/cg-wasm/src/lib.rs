//! WebAssembly bindings for ChannelGate

mod dom;
mod host;
mod logger;
mod surface;
mod transport;

use std::cell::RefCell;
use std::rc::Rc;

use cg_core::components::{Bridge, ChannelComponent, ListingComponent, VideoComponent, PLAYER};
use cg_core::{Agent, Context, HostEvent, SiteWatch};
use futures::task::LocalSpawn;
use log::{info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, Event, HtmlElement, KeyboardEvent};

use crate::dom::WebNode;
use crate::host::{SharedWatch, WeakWatch, WebHost};
use crate::surface::{UiSink, WebSurface};
use crate::transport::{CustomEventTransport, PostMessageTransport, WasmSpawner};

type DocumentListener = Closure<dyn FnMut(Event)>;

struct App {
    context: Context,
    watch: SharedWatch,
    document: Document,
    listeners: Vec<(&'static str, bool, DocumentListener)>,
}

impl Drop for App {
    fn drop(&mut self) {
        for (event, capture, listener) in self.listeners.drain(..) {
            let _ = self.document.remove_event_listener_with_callback_and_bool(
                event,
                listener.as_ref().unchecked_ref(),
                capture,
            );
        }
        match self.watch.try_borrow_mut() {
            Ok(mut watch) => watch.destroy(),
            Err(_) => warn!("site watch busy during teardown"),
        }
        self.context.destroy();
    }
}

thread_local! {
    static APP: RefCell<Option<App>> = const { RefCell::new(None) };
}

fn take_app() {
    // Dropped outside the borrow: `App::drop` re-enters through the context teardown.
    let app = APP.with(|app| app.borrow_mut().take());
    drop(app);
}

/// A media event from inside the player, as opposed to previews elsewhere on the page.
fn from_player(event: &Event) -> bool {
    event
        .target()
        .and_then(|target| target.dyn_into::<Element>().ok())
        .and_then(|element| element.closest(PLAYER).ok().flatten())
        .is_some()
}

fn in_text_input(event: &Event) -> bool {
    let Some(element) = event.target().and_then(|t| t.dyn_into::<Element>().ok()) else {
        return false;
    };
    matches!(element.tag_name().as_str(), "INPUT" | "TEXTAREA")
        || element
            .dyn_ref::<HtmlElement>()
            .is_some_and(|element| element.is_content_editable())
}

fn listen(
    document: &Document,
    event: &'static str,
    capture: bool,
    watch: &WeakWatch,
    translate: impl Fn(&Event) -> Option<HostEvent> + 'static,
) -> Result<(&'static str, bool, DocumentListener), JsValue> {
    let watch = watch.clone();
    let listener = DocumentListener::new(move |e: Event| {
        if let Some(event) = translate(&e) {
            WebHost::with_watch(&watch, |watch| watch.dispatch_event(&event));
        }
    });
    document.add_event_listener_with_callback_and_bool(
        event,
        listener.as_ref().unchecked_ref(),
        capture,
    )?;
    Ok((event, capture, listener))
}

fn document_listeners(
    document: &Document,
    watch: &WeakWatch,
) -> Result<Vec<(&'static str, bool, DocumentListener)>, JsValue> {
    // Media events do not bubble; listen in the capture phase.
    let tick = |e: &Event| from_player(e).then_some(HostEvent::MediaTick);
    let hidden_document = document.clone();
    Ok(vec![
        listen(document, "timeupdate", true, watch, tick)?,
        listen(document, "durationchange", true, watch, tick)?,
        listen(document, "error", true, watch, |e| {
            from_player(e).then_some(HostEvent::MediaError)
        })?,
        listen(document, "keydown", false, watch, |e| {
            let key = e.dyn_ref::<KeyboardEvent>()?.key();
            Some(HostEvent::KeyDown {
                key,
                in_text_input: in_text_input(e),
            })
        })?,
        listen(document, "visibilitychange", false, watch, move |_| {
            Some(HostEvent::VisibilityChanged {
                hidden: hidden_document.hidden(),
            })
        })?,
    ])
}

/// Start ChannelGate in this script world.
///
/// `event_key` names the custom event shared with the content script. With `use_post_message`
/// the agent talks over `window.postMessage` instead.
#[wasm_bindgen]
pub fn init(event_key: &str, use_post_message: bool, verbose: bool) -> Result<(), JsValue> {
    if is_initialized() {
        return Err(JsValue::from_str("Already initialized. Call destroy() first."));
    }
    logger::init(verbose);

    let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
    let document = window.document().ok_or_else(|| JsValue::from_str("No document"))?;

    let spawner: Rc<dyn LocalSpawn> = Rc::new(WasmSpawner);
    let agent = if use_post_message {
        Agent::new(PostMessageTransport::new(window.clone()), spawner)
    } else {
        Agent::new(CustomEventTransport::new(window.clone(), event_key), spawner)
    };
    let context = Context::new(agent);

    let host = WebHost::new(window.clone(), document.clone())
        .ok_or_else(|| JsValue::from_str("Document has no root element"))?;
    let watch: SharedWatch = Rc::new(RefCell::new(SiteWatch::new(host.clone())));
    host.bind(&watch);
    let weak = Rc::downgrade(&watch);

    let ui_watch = weak.clone();
    let ui: UiSink = Rc::new(move |action| {
        WebHost::with_watch(&ui_watch, |watch| watch.dispatch_event(&HostEvent::Ui(action)));
    });
    let surface = Rc::new(WebSurface::new(window, document.clone(), ui));
    let bridge: Rc<dyn Bridge> = Rc::new(context.clone());
    watch
        .borrow_mut()
        .register(Box::new(VideoComponent::<WebNode>::new(bridge.clone(), surface.clone())))
        .register(Box::new(ChannelComponent::<WebNode>::new(bridge.clone(), surface.clone())))
        .register(Box::new(ListingComponent::<WebNode>::search(bridge.clone(), surface.clone())))
        .register(Box::new(ListingComponent::<WebNode>::related(bridge, surface)));

    let listeners = document_listeners(&document, &weak)?;

    let events_watch = weak.clone();
    let ready = context.init(
        move |event| WebHost::with_watch(&events_watch, |watch| watch.dispatch_event(&event)),
        take_app,
    );

    APP.with(|app| {
        *app.borrow_mut() = Some(App {
            context,
            watch,
            document,
            listeners,
        })
    });

    wasm_bindgen_futures::spawn_local(async move {
        match ready.await {
            Ok(()) => {
                info!("settings loaded; starting");
                WebHost::with_watch(&weak, |watch| watch.start());
            }
            Err(e) => warn!("init failed: {e}"),
        }
    });
    Ok(())
}

/// Tear everything down: observer, injected controls, listeners and the agent.
#[wasm_bindgen]
pub fn destroy() {
    take_app();
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    APP.with(|app| app.borrow().is_some())
}

/// Add or remove the allow-ads marker on `url`.
#[wasm_bindgen]
pub fn reflect_url(url: &str, allow: bool) -> String {
    cg_core::url::reflect(url, allow)
}
