//! Per-plugin event bus.
//!
//! Every loaded plugin owns one [`PluginBus`]. Inbound envelopes routed to
//! the plugin are fanned out to the listeners registered for their type.
//! Outbound events are stamped with the plugin id and handed to the
//! plugin's [`OutboundBatcher`](crate::OutboundBatcher).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::batch::OutboundBatcher;
use crate::envelope::Envelope;
use crate::error::{EventError, EventResult};

/// Default buffer of channel-mode listeners.
pub const DEFAULT_LISTENER_BUFFER: usize = 16;

/// Callback invoked for each delivered envelope.
pub type EventCallback = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// How a listener receives events.
#[derive(Clone)]
pub enum Delivery {
    /// Call the function synchronously from the dispatching thread. The
    /// runtime's callbacks only enqueue work on the plugin scheduler.
    Callback(EventCallback),
    /// Push into a bounded channel; events beyond the buffer are dropped.
    Channel(mpsc::Sender<Envelope>),
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Callback(_) => f.write_str("Callback"),
            Self::Channel(tx) => f.debug_tuple("Channel").field(&tx.capacity()).finish(),
        }
    }
}

#[derive(Debug)]
struct Listener {
    event_types: Vec<String>,
    delivery: Delivery,
}

/// Event bus of one plugin.
pub struct PluginBus {
    extension_id: String,
    listeners: RwLock<HashMap<ListenerId, Listener>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    buffer: usize,
    outbound: OutboundBatcher,
}

impl std::fmt::Debug for PluginBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginBus")
            .field("extension_id", &self.extension_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PluginBus {
    /// Create a bus whose outbound events go through `outbound`.
    #[must_use]
    pub fn new(extension_id: impl Into<String>, outbound: OutboundBatcher, buffer: usize) -> Self {
        Self {
            extension_id: extension_id.into(),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            buffer: buffer.max(1),
            outbound,
        }
    }

    /// Owning plugin.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Whether [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Register a listener for `event_types`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Closed`] after teardown.
    pub fn register(&self, event_types: &[&str], delivery: Delivery) -> EventResult<ListenerId> {
        if self.is_closed() {
            return Err(EventError::Closed {
                extension_id: self.extension_id.clone(),
            });
        }
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener = Listener {
            event_types: event_types.iter().map(|t| (*t).to_string()).collect(),
            delivery,
        };
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, listener);
        trace!(extension_id = %self.extension_id, ?id, ?event_types, "listener registered");
        Ok(id)
    }

    /// Register a callback listener.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Closed`] after teardown.
    pub fn on(
        &self,
        event_types: &[&str],
        callback: impl Fn(Envelope) + Send + Sync + 'static,
    ) -> EventResult<ListenerId> {
        self.register(event_types, Delivery::Callback(Arc::new(callback)))
    }

    /// Register a channel listener with the bus's buffer size.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Closed`] after teardown.
    pub fn subscribe(&self, event_types: &[&str]) -> EventResult<(ListenerId, mpsc::Receiver<Envelope>)> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = self.register(event_types, Delivery::Channel(tx))?;
        Ok((id, rx))
    }

    /// Remove a listener. Dropping its sender closes a channel listener.
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    /// Deliver an inbound envelope to every matching listener.
    ///
    /// Returns how many listeners accepted it. Dropped after teardown.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        if self.is_closed() {
            trace!(extension_id = %self.extension_id, event_type = %envelope.event_type, "bus closed, event dropped");
            return 0;
        }
        // Snapshot deliveries so callbacks may register or unregister.
        let targets: Vec<(ListenerId, Delivery)> = {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let mut matching: Vec<_> = listeners
                .iter()
                .filter(|(_, l)| l.event_types.iter().any(|t| *t == envelope.event_type))
                .map(|(id, l)| (*id, l.delivery.clone()))
                .collect();
            matching.sort_by_key(|(id, _)| *id);
            matching
        };

        let mut delivered: usize = 0;
        for (id, delivery) in targets {
            match delivery {
                Delivery::Callback(cb) => {
                    cb(envelope.clone());
                    delivered = delivered.saturating_add(1);
                },
                Delivery::Channel(tx) => match tx.try_send(envelope.clone()) {
                    Ok(()) => delivered = delivered.saturating_add(1),
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            extension_id = %self.extension_id,
                            listener = ?id,
                            event_type = %envelope.event_type,
                            "listener buffer full, event dropped"
                        );
                    },
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        self.unregister(id);
                    },
                },
            }
        }
        delivered
    }

    /// Send an event to the client, stamped with this plugin's id.
    ///
    /// Ignored after teardown.
    pub fn send(&self, event_type: &str, payload: Value) {
        if self.is_closed() {
            return;
        }
        self.outbound
            .queue(Envelope::new(event_type, payload).for_extension(self.extension_id.clone()));
    }

    /// Send an event bypassing the batcher, used for the final events of a
    /// plugin after its bus is closed.
    pub fn send_now(&self, event_type: &str, payload: Value) {
        self.outbound
            .publish_now(Envelope::new(event_type, payload).for_extension(self.extension_id.clone()));
    }

    /// Unregister every listener and drop further inbound events.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let removed = {
            let mut listeners = self
                .listeners
                .write()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let n = listeners.len();
            listeners.clear();
            n
        };
        self.outbound.flush();
        debug!(extension_id = %self.extension_id, listeners = removed, "plugin bus closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::EventHub;
    use serde_json::json;
    use std::sync::Mutex;

    fn bus() -> (EventHub, Arc<PluginBus>) {
        let hub = EventHub::new();
        let bus = hub.register_plugin("p");
        (hub, bus)
    }

    #[tokio::test]
    async fn test_callback_delivery_in_order() {
        let (_hub, bus) = bus();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.on(&["x"], move |e| s.lock().unwrap().push(e.payload)).unwrap();
        for i in 0..5 {
            bus.dispatch(&Envelope::new("x", json!(i)));
        }
        bus.dispatch(&Envelope::new("y", json!(99)));
        assert_eq!(*seen.lock().unwrap(), (0..5).map(|i| json!(i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_channel_listener_drops_on_overflow() {
        let (_hub, bus) = bus();
        let (_id, mut rx) = bus.subscribe(&["x"]).unwrap();
        let accepted: usize = (0..20).map(|i| bus.dispatch(&Envelope::new("x", json!(i)))).sum();
        assert_eq!(accepted, DEFAULT_LISTENER_BUFFER);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.payload, json!(0));
    }

    #[tokio::test]
    async fn test_unregister_closes_channel() {
        let (_hub, bus) = bus();
        let (id, mut rx) = bus.subscribe(&["x"]).unwrap();
        assert!(bus.unregister(id));
        assert!(rx.recv().await.is_none());
        assert_eq!(bus.dispatch(&Envelope::new("x", json!(1))), 0);
    }

    #[tokio::test]
    async fn test_close_drops_everything() {
        let (_hub, bus) = bus();
        let (_id, mut rx) = bus.subscribe(&["x"]).unwrap();
        bus.close();
        assert!(rx.recv().await.is_none());
        assert_eq!(bus.dispatch(&Envelope::new("x", json!(1))), 0);
        assert!(bus.subscribe(&["x"]).is_err());
    }
}
