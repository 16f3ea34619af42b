//! Message Agent
//!
//! Symmetric request/reply messaging between two script contexts that share nothing but an
//! event primitive. Every request carries a fresh reply id and the sender's instance id;
//! replies are matched against a pending table and accepted exactly once.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::channel::oneshot;
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::{LocalFutureObj, LocalSpawn};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Message names exchanged with the extension.
pub mod verbs {
    pub const GET_SETTINGS: &str = "get-settings";
    pub const SETTINGS_UPDATE: &str = "settings-update";
    pub const SET_SETTINGS: &str = "set-settings";
    pub const AD_UPDATE: &str = "ad-update";
    pub const MUTE_TAB: &str = "mute-tab";
    pub const RECENT_AD: &str = "recent-ad";
    pub const ECHO_AD: &str = "echo-ad";
    pub const HIGHLIGHT_TAB: &str = "highlight-tab";
    pub const DESTROY: &str = "destroy";
}

// =============================================================================
// Wire Envelope
// =============================================================================

/// What actually crosses the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub name: String,
    #[serde(default)]
    pub message: Value,
    pub reply_id: String,
    pub from: String,
    #[serde(default)]
    pub is_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sink the transport feeds incoming envelopes into.
pub type EnvelopeSink = Box<dyn Fn(Envelope)>;

/// The event primitive an agent sits on. Fixed for the lifetime of an agent.
pub trait Transport {
    /// Hand an envelope to the other context. Payloads must be plain data; the transport
    /// clones them into the receiving realm.
    fn post(&self, envelope: &Envelope) -> Result<(), Error>;

    /// Install the single underlying listener.
    fn listen(&self, sink: EnvelopeSink);

    /// Remove the listener installed by `listen`.
    fn close(&self);
}

type Handler = Rc<dyn Fn(Value) -> LocalBoxFuture<'static, Result<Value, Error>>>;

struct AgentInner {
    instance_id: RefCell<Option<String>>,
    transport: Box<dyn Transport>,
    spawner: Rc<dyn LocalSpawn>,
    handlers: RefCell<Vec<(String, Handler)>>,
    pending: RefCell<HashMap<String, oneshot::Sender<Result<Value, Error>>>>,
    next_reply: Cell<u64>,
}

// =============================================================================
// Agent
// =============================================================================

/// Request/reply endpoint. Cloning yields another handle to the same endpoint.
#[derive(Clone)]
pub struct Agent {
    inner: Rc<AgentInner>,
}

impl Agent {
    pub fn new(transport: impl Transport + 'static, spawner: Rc<dyn LocalSpawn>) -> Self {
        let inner = Rc::new(AgentInner {
            instance_id: RefCell::new(Some(uuid::Uuid::new_v4().to_string())),
            transport: Box::new(transport),
            spawner,
            handlers: RefCell::new(Vec::new()),
            pending: RefCell::new(HashMap::new()),
            next_reply: Cell::new(0),
        });

        let weak: Weak<AgentInner> = Rc::downgrade(&inner);
        inner.transport.listen(Box::new(move |envelope| {
            if let Some(inner) = weak.upgrade() {
                Agent { inner }.receive(envelope);
            }
        }));

        Self { inner }
    }

    /// `None` once destroyed.
    pub fn instance_id(&self) -> Option<String> {
        self.inner.instance_id.borrow().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.instance_id.borrow().is_none()
    }

    /// Register a handler for `name`. Every matching handler runs on each request.
    pub fn on<F, Fut>(&self, name: &str, handler: F) -> &Self
    where
        F: Fn(Value) -> Fut + 'static,
        Fut: Future<Output = Result<Value, Error>> + 'static,
    {
        let handler: Handler = Rc::new(move |message| handler(message).boxed_local());
        self.inner
            .handlers
            .borrow_mut()
            .push((name.to_string(), handler));
        self
    }

    /// Register a handler that answers synchronously. An `Err` rejects the request.
    pub fn on_sync<F>(&self, name: &str, handler: F) -> &Self
    where
        F: Fn(Value) -> Result<Value, Error> + 'static,
    {
        self.on(name, move |message| future::ready(handler(message)))
    }

    /// Send a request and wait for the reply.
    ///
    /// There is no timeout: if the peer never answers the future never resolves. Fails fast
    /// after `destroy()`, and resolves to `Error::Destroyed` if this agent is destroyed
    /// while waiting.
    pub fn send<T: Serialize + ?Sized>(
        &self,
        name: &str,
        message: &T,
    ) -> LocalBoxFuture<'static, Result<Value, Error>> {
        let Some(from) = self.instance_id() else {
            return future::ready(Err(Error::Destroyed)).boxed_local();
        };
        let message = match serde_json::to_value(message) {
            Ok(message) => message,
            Err(e) => return future::ready(Err(Error::Json(e))).boxed_local(),
        };

        let n = self.inner.next_reply.get();
        self.inner.next_reply.set(n + 1);
        let reply_id = format!("{from}:{n}");

        let (tx, rx) = oneshot::channel();
        self.inner.pending.borrow_mut().insert(reply_id.clone(), tx);

        let envelope = Envelope {
            name: name.to_string(),
            message,
            reply_id: reply_id.clone(),
            from,
            is_reply: false,
            error: None,
        };
        if let Err(e) = self.inner.transport.post(&envelope) {
            self.inner.pending.borrow_mut().remove(&reply_id);
            return future::ready(Err(e)).boxed_local();
        }

        async move { rx.await.unwrap_or(Err(Error::Destroyed)) }.boxed_local()
    }

    /// Send and forget, logging failures.
    pub fn notify<T: Serialize + ?Sized>(&self, name: &str, message: &T) {
        let name = name.to_string();
        let reply = self.send(&name, message);
        self.spawn(async move {
            if let Err(e) = reply.await {
                debug!("{name}: {e}");
            }
        });
    }

    /// Release the transport listener, both tables and the instance id.
    pub fn destroy(&self) {
        if self.inner.instance_id.borrow_mut().take().is_none() {
            return;
        }
        self.inner.transport.close();
        self.inner.handlers.borrow_mut().clear();
        // Dropping the senders resolves waiting requests with `Error::Destroyed`.
        let pending = std::mem::take(&mut *self.inner.pending.borrow_mut());
        drop(pending);
    }

    /// Feed an incoming envelope. Transports normally call this through their sink.
    pub fn receive(&self, envelope: Envelope) {
        let Some(own_id) = self.instance_id() else {
            return;
        };
        if envelope.from == own_id {
            return;
        }

        if envelope.is_reply {
            let sender = self.inner.pending.borrow_mut().remove(&envelope.reply_id);
            if let Some(sender) = sender {
                let result = match envelope.error {
                    Some(error) => Err(Error::Remote(error)),
                    None => Ok(envelope.message),
                };
                let _ = sender.send(result);
            }
            return;
        }

        let handlers: Vec<Handler> = self
            .inner
            .handlers
            .borrow()
            .iter()
            .filter(|(name, _)| *name == envelope.name)
            .map(|(_, handler)| handler.clone())
            .collect();
        let single = handlers.len() == 1;
        let replies: Vec<_> = handlers
            .iter()
            .map(|handler| handler(envelope.message.clone()))
            .collect();

        let weak = Rc::downgrade(&self.inner);
        let Envelope { name, reply_id, .. } = envelope;
        self.spawn(async move {
            let result = future::try_join_all(replies).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Some(from) = inner.instance_id.borrow().clone() else {
                return;
            };
            let (message, error) = match result {
                Ok(mut values) if single => (values.remove(0), None),
                Ok(values) => (Value::Array(values), None),
                Err(e) => (Value::Null, Some(e.to_string())),
            };
            let reply = Envelope {
                name,
                message,
                reply_id,
                from,
                is_reply: true,
                error,
            };
            if let Err(e) = inner.transport.post(&reply) {
                warn!("reply to {} dropped: {e}", reply.name);
            }
        });
    }

    /// Run a future on the agent's executor.
    pub fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        let task: LocalBoxFuture<'static, ()> = task.boxed_local();
        if let Err(e) = self.inner.spawner.spawn_local_obj(LocalFutureObj::new(task)) {
            warn!("spawn failed: {e}");
        }
    }
}
