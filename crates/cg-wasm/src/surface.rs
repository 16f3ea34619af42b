//! DOM writes on behalf of the components: injected controls, media control, URL marker,
//! title flash and the verification prompt.

use std::cell::RefCell;
use std::rc::Rc;

use cg_core::ads::{Command, MediaSnapshot};
use cg_core::components::{
    PageSurface, VideoSurface, AD_OPTIONS, PLAYER, SKIP_CONTROL, SUBSCRIBE_BUTTON, WHITELIST_BUTTON,
};
use cg_core::url;
use cg_core::watch::UiAction;
use cg_core::Error;
use log::{debug, info, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Document, Element, Event, HtmlElement, HtmlMediaElement, Window};

use crate::dom::WebNode;

const MEDIA: &str = "#movie_player video";
const FLASH_INTERVAL_MS: i32 = 1000;
const FLASH_PREFIX: &str = "\u{25B6} ";
const VERIFY_MESSAGE: &str =
    "Ads are still being blocked on this whitelisted channel. Reload the page to let them play?";

pub type UiSink = Rc<dyn Fn(UiAction)>;

type ClickListener = Closure<dyn FnMut(Event)>;

struct TitleFlash {
    handle: i32,
    original: String,
    _tick: Closure<dyn FnMut()>,
}

/// Page-side writer for one script world.
pub struct WebSurface {
    window: Window,
    document: Document,
    ui: UiSink,
    injected: RefCell<Vec<Element>>,
    listeners: RefCell<Vec<ClickListener>>,
    flash: RefCell<Option<TitleFlash>>,
}

impl WebSurface {
    pub fn new(window: Window, document: Document, ui: UiSink) -> Self {
        Self {
            window,
            document,
            ui,
            injected: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            flash: RefCell::new(None),
        }
    }

    fn query(&self, selector: &'static str) -> Result<Element, Error> {
        self.document
            .query_selector(selector)
            .ok()
            .flatten()
            .ok_or(Error::ControlNotFound(selector))
    }

    fn media_element(&self) -> Result<HtmlMediaElement, Error> {
        self.query(MEDIA)?
            .dyn_into::<HtmlMediaElement>()
            .map_err(|_| Error::ControlNotFound(MEDIA))
    }

    fn js_error(e: JsValue) -> Error {
        Error::Host(format!("{e:?}"))
    }

    /// A button that raises `action` when clicked. The listener lives until `remove_controls`.
    fn button(&self, id: Option<&str>, label: &str, action: UiAction) -> Result<Element, Error> {
        let button = self.document.create_element("button").map_err(Self::js_error)?;
        if let Some(id) = id {
            button.set_id(id);
        }
        button.set_text_content(Some(label));
        let ui = self.ui.clone();
        let listener = ClickListener::new(move |event: Event| {
            event.prevent_default();
            event.stop_propagation();
            ui(action);
        });
        button
            .add_event_listener_with_callback("click", listener.as_ref().unchecked_ref())
            .map_err(Self::js_error)?;
        self.listeners.borrow_mut().push(listener);
        Ok(button)
    }

    fn show_whitelisted(&self, whitelisted: bool) -> Result<(), Error> {
        let button = match self.query(WHITELIST_BUTTON) {
            Ok(existing) => existing,
            Err(_) => {
                let anchor = self.query(SUBSCRIBE_BUTTON)?;
                let parent = anchor
                    .parent_node()
                    .ok_or(Error::ControlNotFound(SUBSCRIBE_BUTTON))?;
                let button =
                    self.button(Some(&WHITELIST_BUTTON[1..]), "", UiAction::ToggleWhitelist)?;
                parent.insert_before(&button, Some(&anchor)).map_err(Self::js_error)?;
                self.injected.borrow_mut().push(button.clone());
                button
            }
        };
        button.set_text_content(Some(if whitelisted { "Whitelisted" } else { "Whitelist" }));
        button
            .class_list()
            .toggle_with_force("cg-whitelisted", whitelisted)
            .map_err(Self::js_error)?;
        Ok(())
    }

    fn inject_ad_controls(&self) -> Result<(), Error> {
        if self.query(AD_OPTIONS).is_ok() {
            return Ok(());
        }
        let player = self.query(PLAYER)?;
        let menu = self.document.create_element("div").map_err(Self::js_error)?;
        menu.set_id(&AD_OPTIONS[1..]);
        for (label, action) in [
            ("Block advertiser", UiAction::BlockAdvertiser),
            ("Mute advertiser", UiAction::MuteAdvertiser),
            ("Skip ad", UiAction::SkipAd),
        ] {
            let item = self.button(None, label, action)?;
            menu.append_child(&item).map_err(Self::js_error)?;
        }
        player.append_child(&menu).map_err(Self::js_error)?;
        self.injected.borrow_mut().push(menu);
        Ok(())
    }

    fn reflect_url(&self, allow: bool) -> Result<(), Error> {
        let href = self.window.location().href().map_err(Self::js_error)?;
        let reflected = url::reflect(&href, allow);
        if reflected == href {
            return Ok(());
        }
        let history = self.window.history().map_err(Self::js_error)?;
        history
            .replace_state_with_url(&history.state().unwrap_or(JsValue::NULL), "", Some(&reflected))
            .map_err(Self::js_error)
    }

    fn click_skip(&self) -> Result<(), Error> {
        let control = self.query(SKIP_CONTROL)?;
        control
            .dyn_ref::<HtmlElement>()
            .ok_or(Error::ControlNotFound(SKIP_CONTROL))?
            .click();
        Ok(())
    }

    fn title_flash(&self, on: bool) -> Result<(), Error> {
        if !on {
            if let Some(flash) = self.flash.borrow_mut().take() {
                self.window.clear_interval_with_handle(flash.handle);
                self.document.set_title(&flash.original);
            }
            return Ok(());
        }
        if self.flash.borrow().is_some() {
            return Ok(());
        }
        let original = self.document.title();
        let document = self.document.clone();
        let plain = original.clone();
        let tick = Closure::<dyn FnMut()>::new(move || {
            if document.title().starts_with(FLASH_PREFIX) {
                document.set_title(&plain);
            } else {
                document.set_title(&format!("{FLASH_PREFIX}{plain}"));
            }
        });
        let handle = self
            .window
            .set_interval_with_callback_and_timeout_and_arguments_0(
                tick.as_ref().unchecked_ref(),
                FLASH_INTERVAL_MS,
            )
            .map_err(Self::js_error)?;
        *self.flash.borrow_mut() = Some(TitleFlash {
            handle,
            original,
            _tick: tick,
        });
        Ok(())
    }

    fn prompt_verify(&self) -> Result<(), Error> {
        if self.window.confirm_with_message(VERIFY_MESSAGE).map_err(Self::js_error)? {
            info!("reloading to let ads play");
            self.window.location().reload().map_err(Self::js_error)?;
        }
        Ok(())
    }
}

impl PageSurface<WebNode> for WebSurface {
    fn apply(&self, command: &Command) -> Result<(), Error> {
        match command {
            Command::InjectAdControls => self.inject_ad_controls(),
            Command::ShowWhitelisted(whitelisted) => self.show_whitelisted(*whitelisted),
            Command::ReflectUrl(allow) => self.reflect_url(*allow),
            Command::ClickSkip => self.click_skip(),
            Command::Seek(time) => {
                self.media_element()?.set_current_time(*time);
                Ok(())
            }
            Command::SetPlaybackRate(rate) => {
                self.media_element()?.set_playback_rate(*rate);
                Ok(())
            }
            Command::PauseMedia => self.media_element()?.pause().map_err(Self::js_error),
            Command::ResumeMedia => {
                let play = self.media_element()?.play().map_err(Self::js_error)?;
                let playing = JsFuture::from(play);
                // Rejected under autoplay policy; the user resumes by hand then.
                wasm_bindgen_futures::spawn_local(async move {
                    if let Err(e) = playing.await {
                        debug!("play() rejected: {e:?}");
                    }
                });
                Ok(())
            }
            Command::TitleFlash(on) => self.title_flash(*on),
            Command::PromptVerify => self.prompt_verify(),
            Command::MuteTab(_)
            | Command::EchoAd(_)
            | Command::FetchRecentAd
            | Command::ScheduleVerify(_) => {
                debug!("{command:?} is not a page write");
                Ok(())
            }
        }
    }

    fn remove_controls(&self) {
        for element in self.injected.borrow_mut().drain(..) {
            element.remove();
        }
        self.listeners.borrow_mut().clear();
        let _ = self.title_flash(false);
    }

    fn click(&self, node: &WebNode) {
        match node.element().dyn_ref::<HtmlElement>() {
            Some(element) => element.click(),
            None => debug!("not clickable: {}", node.element().tag_name()),
        }
    }

    fn set_attribute(&self, node: &WebNode, name: &str, value: &str) {
        if let Err(e) = node.element().set_attribute(name, value) {
            warn!("set {name} failed: {e:?}");
        }
    }
}

impl VideoSurface<WebNode> for WebSurface {
    fn media(&self) -> Option<MediaSnapshot> {
        let media = self.media_element().ok()?;
        Some(MediaSnapshot {
            current_time: media.current_time(),
            duration: media.duration(),
            src: media.current_src(),
            playback_rate: media.playback_rate(),
            paused: media.paused(),
        })
    }

    fn hidden(&self) -> bool {
        self.document.hidden()
    }
}
