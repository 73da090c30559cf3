//! DOM-RPC bookkeeping.
//!
//! The document lives in the client. Reads go out as requests carrying a
//! `requestId` and come back as a reply event echoing it; each pending read
//! holds the completion ticket the script is awaiting. Observers persist
//! until stopped and are re-issued whenever the client reports `dom:ready`,
//! since a fresh document has lost them.

use std::collections::HashMap;

use harbor_capabilities::dom_filter::{
    is_dangerous_url, is_safe_attribute, is_safe_property, is_unsafe_css, sanitize_html_checked,
};
use harbor_events::types;
use serde_json::{Value, json};

use crate::error::RuntimeResult;
use crate::plugin::components::denied;

/// Element actions that answer with a value.
pub const READ_ACTIONS: &[&str] = &[
    "getText",
    "getHTML",
    "getAttribute",
    "getAttributes",
    "hasAttribute",
    "getProperty",
    "hasClass",
    "getStyle",
    "getComputedStyle",
    "getDataAttribute",
    "getDataAttributes",
    "getParent",
    "getChildren",
    "query",
    "queryOne",
];

/// Whether `action` answers with a value.
#[must_use]
pub fn is_read_action(action: &str) -> bool {
    READ_ACTIONS.contains(&action)
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    ticket: u64,
    reply: &'static str,
}

#[derive(Debug, Clone)]
struct Observer {
    id: String,
    selector: String,
    callback: u64,
}

#[derive(Debug, Clone)]
struct ElementListener {
    element_id: String,
    callback: u64,
}

/// Pending reads, observers and element listeners of one plugin.
#[derive(Debug, Default)]
pub struct DomRpc {
    pending: HashMap<String, Pending>,
    observers: Vec<Observer>,
    ready: Vec<u64>,
    listeners: HashMap<String, ElementListener>,
}

impl DomRpc {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a read awaited through `ticket` and answered by an event of
    /// type `reply`. Returns the request id.
    pub fn request(&mut self, ticket: u64, reply: &'static str) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.pending.insert(request_id.clone(), Pending { ticket, reply });
        request_id
    }

    /// Match a reply event. Returns the ticket and the value to settle it
    /// with, or `None` for unknown or mismatched request ids.
    pub fn reply(&mut self, event_type: &str, payload: &Value) -> Option<(u64, Value)> {
        let request_id = payload.get("requestId").and_then(Value::as_str)?;
        let pending = self.pending.get(request_id)?;
        if pending.reply != event_type {
            return None;
        }
        let ticket = pending.ticket;
        self.pending.remove(request_id);
        let field = match event_type {
            types::DOM_QUERY_RESULT => "elements",
            types::DOM_QUERY_ONE_RESULT | types::DOM_CREATE_RESULT => "element",
            _ => "result",
        };
        Some((ticket, payload.get(field).cloned().unwrap_or(Value::Null)))
    }

    /// Give up on a read. Returns its ticket if it was still pending.
    pub fn expire(&mut self, request_id: &str) -> Option<u64> {
        self.pending.remove(request_id).map(|p| p.ticket)
    }

    /// Number of reads awaiting a reply.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Start observing `selector`. Returns the observer id and the
    /// `dom:observe` payload.
    pub fn observe(&mut self, selector: &str, callback: u64) -> (String, Value) {
        let id = uuid::Uuid::new_v4().to_string();
        let payload = observe_payload(&id, selector);
        self.observers.push(Observer {
            id: id.clone(),
            selector: selector.to_string(),
            callback,
        });
        (id, payload)
    }

    /// Stop observer `id`. Returns its callback and the `dom:stop-observe`
    /// payload.
    pub fn stop_observe(&mut self, id: &str) -> Option<(u64, Value)> {
        let index = self.observers.iter().position(|o| o.id == id)?;
        let observer = self.observers.remove(index);
        Some((observer.callback, json!({ "observerId": observer.id })))
    }

    /// Callback of observer `id`.
    #[must_use]
    pub fn observer_callback(&self, id: &str) -> Option<u64> {
        self.observers.iter().find(|o| o.id == id).map(|o| o.callback)
    }

    /// Run `callback` whenever the client reports a ready document.
    pub fn on_ready(&mut self, callback: u64) {
        self.ready.push(callback);
    }

    /// Handle `dom:ready`: the callbacks to invoke and one fresh
    /// `dom:observe` payload per active observer, in registration order.
    #[must_use]
    pub fn rearm(&self) -> (Vec<u64>, Vec<Value>) {
        let payloads = self
            .observers
            .iter()
            .map(|o| observe_payload(&o.id, &o.selector))
            .collect();
        (self.ready.clone(), payloads)
    }

    /// Listen for `event` on element `element_id`. Returns the listener id
    /// and the `dom:manipulate` payload installing it.
    pub fn listen(&mut self, element_id: &str, event: &str, callback: u64) -> (String, Value) {
        let id = uuid::Uuid::new_v4().to_string();
        self.listeners.insert(
            id.clone(),
            ElementListener {
                element_id: element_id.to_string(),
                callback,
            },
        );
        let payload = json!({
            "elementId": element_id,
            "action": "addEventListener",
            "params": { "event": event, "listenerId": id },
        });
        (id, payload)
    }

    /// Remove listener `id`. Returns its callback and the `dom:manipulate`
    /// payload uninstalling it.
    pub fn unlisten(&mut self, id: &str) -> Option<(u64, Value)> {
        let listener = self.listeners.remove(id)?;
        let payload = json!({
            "elementId": listener.element_id,
            "action": "removeEventListener",
            "params": { "listenerId": id },
        });
        Some((listener.callback, payload))
    }

    /// Callback of element listener `id`.
    #[must_use]
    pub fn listener_callback(&self, id: &str) -> Option<u64> {
        self.listeners.get(id).map(|l| l.callback)
    }

    /// Drop everything. Returns the callbacks to release and the tickets
    /// still awaiting a reply.
    pub fn clear(&mut self) -> (Vec<u64>, Vec<u64>) {
        let mut callbacks: Vec<u64> = self.observers.drain(..).map(|o| o.callback).collect();
        callbacks.append(&mut self.ready);
        callbacks.extend(self.listeners.drain().map(|(_, l)| l.callback));
        let tickets = self.pending.drain().map(|(_, p)| p.ticket).collect();
        (callbacks, tickets)
    }
}

fn observe_payload(id: &str, selector: &str) -> Value {
    json!({ "selector": selector, "observerId": id })
}

/// Vet an element manipulation before it reaches the client.
///
/// HTML payloads are sanitized; attributes, properties and styles the DOM
/// safety filter rejects are refused outright.
///
/// # Errors
///
/// [`RuntimeError::Unauthorized`](crate::error::RuntimeError::Unauthorized)
/// when the filter rejects the manipulation.
pub fn check_manipulation(action: &str, params: Value) -> RuntimeResult<Value> {
    let op = format!("dom.{action}");
    let text = |key: &str| params.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    match action {
        "setAttribute" => {
            let (name, value) = (text("name"), text("value"));
            if !is_safe_attribute(&name, &value) {
                return Err(denied(&op, &name));
            }
        },
        "setProperty" => {
            let name = text("name");
            if !is_safe_property(&name) {
                return Err(denied(&op, &name));
            }
        },
        "setStyle" | "setCssText" => {
            let css = match params.get("value").or_else(|| params.get("styles")) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            if is_unsafe_css(&css) {
                return Err(denied(&op, "style"));
            }
        },
        "setHref" | "setSrc" => {
            let url = text("value");
            if is_dangerous_url(&url) {
                return Err(denied(&op, &url));
            }
        },
        "setInnerHTML" | "setOuterHTML" | "insertAdjacentHTML" => {
            let mut params = params;
            if let Some(raw) = params.get("html").and_then(Value::as_str) {
                let html = sanitize_html_checked(raw).ok_or_else(|| denied(&op, "html"))?;
                params["html"] = Value::String(html);
            }
            return Ok(params);
        },
        _ => {},
    }
    Ok(params)
}
