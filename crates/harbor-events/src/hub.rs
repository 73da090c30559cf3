//! Routing between the client connection and plugin buses.
//!
//! The hub owns one [`PluginBus`] per loaded plugin. Inbound envelopes from
//! the client are routed to the addressed plugin, or to every plugin when
//! unaddressed. Everything the plugins send is merged into one broadcast
//! stream read through [`OutboundReceiver`].

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::batch::{DEFAULT_BATCH_SIZE, DEFAULT_BATCH_WINDOW, OutboundBatcher};
use crate::bus::{DEFAULT_LISTENER_BUFFER, PluginBus};
use crate::envelope::Envelope;
use crate::error::{EventError, EventResult};

/// Default capacity of the outbound broadcast channel.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// Tunables of an [`EventHub`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubOptions {
    /// Buffer of channel-mode listeners.
    pub listener_buffer: usize,
    /// Maximum events per outbound batch.
    pub batch_size: usize,
    /// Coalescing window of outbound batches.
    pub batch_window: Duration,
    /// Capacity of the outbound broadcast channel.
    pub outbound_capacity: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            listener_buffer: DEFAULT_LISTENER_BUFFER,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_window: DEFAULT_BATCH_WINDOW,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Client-facing event router.
#[derive(Debug, Clone)]
pub struct EventHub {
    plugins: Arc<DashMap<String, Arc<PluginBus>>>,
    outbound: broadcast::Sender<Arc<Envelope>>,
    options: HubOptions,
}

impl EventHub {
    /// Create a hub with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(HubOptions::default())
    }

    /// Create a hub with explicit options.
    #[must_use]
    pub fn with_options(options: HubOptions) -> Self {
        let (outbound, _) = broadcast::channel(options.outbound_capacity.max(1));
        Self {
            plugins: Arc::new(DashMap::new()),
            outbound,
            options,
        }
    }

    /// Options the hub was built with.
    #[must_use]
    pub fn options(&self) -> HubOptions {
        self.options
    }

    /// Create the bus of `extension_id`, closing any previous one.
    pub fn register_plugin(&self, extension_id: &str) -> Arc<PluginBus> {
        let batcher = OutboundBatcher::new(
            extension_id,
            self.outbound.clone(),
            self.options.batch_window,
            self.options.batch_size,
        );
        let bus = Arc::new(PluginBus::new(
            extension_id,
            batcher,
            self.options.listener_buffer,
        ));
        if let Some(previous) = self.plugins.insert(extension_id.to_string(), Arc::clone(&bus)) {
            previous.close();
        }
        debug!(extension_id, "plugin bus registered");
        bus
    }

    /// Close and forget the bus of `extension_id`.
    pub fn unregister_plugin(&self, extension_id: &str) -> bool {
        match self.plugins.remove(extension_id) {
            Some((_, bus)) => {
                bus.close();
                debug!(extension_id, "plugin bus unregistered");
                true
            },
            None => false,
        }
    }

    /// Bus of `extension_id`.
    #[must_use]
    pub fn plugin(&self, extension_id: &str) -> Option<Arc<PluginBus>> {
        self.plugins.get(extension_id).map(|b| Arc::clone(b.value()))
    }

    /// Ids of plugins with a registered bus.
    #[must_use]
    pub fn plugin_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Route an inbound envelope from the client.
    ///
    /// Returns the number of listeners that accepted it.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::UnknownPlugin`] when the envelope is addressed
    /// to a plugin without a bus.
    pub fn dispatch(&self, envelope: &Envelope) -> EventResult<usize> {
        trace!(event_type = %envelope.event_type, extension_id = ?envelope.extension_id, "inbound event");
        match &envelope.extension_id {
            Some(id) => {
                let bus = self.plugin(id).ok_or_else(|| EventError::UnknownPlugin {
                    extension_id: id.clone(),
                })?;
                Ok(bus.dispatch(envelope))
            },
            None => {
                // Snapshot first so a callback can register or drop a plugin.
                let buses: Vec<Arc<PluginBus>> =
                    self.plugins.iter().map(|b| Arc::clone(b.value())).collect();
                Ok(buses
                    .iter()
                    .map(|bus| bus.dispatch(envelope))
                    .fold(0usize, usize::saturating_add))
            },
        }
    }

    /// Decode and route a raw client message.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Payload`] for malformed JSON, otherwise as
    /// [`dispatch`](Self::dispatch).
    pub fn dispatch_json(&self, raw: &str) -> EventResult<usize> {
        let envelope: Envelope = serde_json::from_str(raw).map_err(|source| EventError::Payload {
            event_type: String::from("<envelope>"),
            source,
        })?;
        self.dispatch(&envelope)
    }

    /// Publish a host-originated envelope to the client.
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.outbound.send(Arc::new(envelope)).unwrap_or(0)
    }

    /// Receive everything sent towards the client.
    #[must_use]
    pub fn subscribe(&self) -> OutboundReceiver {
        OutboundReceiver {
            receiver: self.outbound.subscribe(),
            extension_id: None,
        }
    }

    /// Receive only what `extension_id` sends.
    #[must_use]
    pub fn subscribe_plugin(&self, extension_id: impl Into<String>) -> OutboundReceiver {
        OutboundReceiver {
            receiver: self.outbound.subscribe(),
            extension_id: Some(extension_id.into()),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader of the outbound stream.
pub struct OutboundReceiver {
    receiver: broadcast::Receiver<Arc<Envelope>>,
    extension_id: Option<String>,
}

impl OutboundReceiver {
    fn matches(&self, envelope: &Envelope) -> bool {
        match &self.extension_id {
            Some(id) => envelope.extension_id.as_deref() == Some(id.as_str()),
            None => true,
        }
    }

    /// Receive the next envelope. Lagging skips the lost envelopes with a
    /// warning. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => {
                    if self.matches(&envelope) {
                        return Some(envelope);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "outbound receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Envelope>> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => {
                    if self.matches(&envelope) {
                        return Some(envelope);
                    }
                },
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "outbound receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Receive the next envelope and unpack a batch into its events.
    pub async fn recv_flat(&mut self) -> Option<Vec<Envelope>> {
        let envelope = self.recv().await?;
        Some(Arc::unwrap_or_clone(envelope).flatten())
    }
}

impl std::fmt::Debug for OutboundReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundReceiver")
            .field("extension_id", &self.extension_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PLUGIN_BATCH_EVENTS, TRAY_RENDER, TRAY_RENDER_ALL, TRAY_UPDATED};
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder(bus: &PluginBus, ty: &'static str) -> Arc<Mutex<Vec<Envelope>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        bus.on(&[ty], move |e| s.lock().unwrap().push(e)).unwrap();
        seen
    }

    #[tokio::test]
    async fn test_addressed_and_broadcast_routing() {
        let hub = EventHub::new();
        let a = hub.register_plugin("a");
        let b = hub.register_plugin("b");
        let seen_a = recorder(&a, TRAY_RENDER);
        let seen_b = recorder(&b, TRAY_RENDER);

        hub.dispatch(&Envelope::new(TRAY_RENDER, json!({})).for_extension("a"))
            .unwrap();
        assert_eq!(seen_a.lock().unwrap().len(), 1);
        assert_eq!(seen_b.lock().unwrap().len(), 0);

        let n = hub.dispatch_json(r#"{"type":"tray:render"}"#).unwrap();
        assert_eq!(n, 2);
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_an_error() {
        let hub = EventHub::new();
        let err = hub
            .dispatch(&Envelope::new(TRAY_RENDER_ALL, json!(null)).for_extension("ghost"))
            .unwrap_err();
        assert!(matches!(err, EventError::UnknownPlugin { .. }));
        assert!(hub.dispatch_json("{nope").is_err());
    }

    #[tokio::test]
    async fn test_unregister_drops_events() {
        let hub = EventHub::new();
        let a = hub.register_plugin("a");
        let seen = recorder(&a, TRAY_RENDER);
        assert!(hub.unregister_plugin("a"));
        assert!(a.is_closed());
        assert_eq!(hub.dispatch_json(r#"{"type":"tray:render"}"#).unwrap(), 0);
        assert!(seen.lock().unwrap().is_empty());
        assert!(!hub.unregister_plugin("a"));
    }

    #[tokio::test]
    async fn test_outbound_carries_extension_id() {
        let hub = EventHub::new();
        let mut all = hub.subscribe();
        let mut only_b = hub.subscribe_plugin("b");
        let a = hub.register_plugin("a");
        let b = hub.register_plugin("b");

        a.send(TRAY_UPDATED, json!({"n": 1}));
        let got = all.recv().await.unwrap();
        assert_eq!(got.extension_id.as_deref(), Some("a"));

        b.send(TRAY_UPDATED, json!({"n": 2}));
        let got = only_b.recv().await.unwrap();
        assert_eq!(got.payload, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_outbound_burst_is_batched() {
        let hub = EventHub::with_options(HubOptions {
            batch_window: Duration::from_millis(50),
            ..HubOptions::default()
        });
        let mut rx = hub.subscribe_plugin("a");
        let a = hub.register_plugin("a");
        for i in 0..3 {
            a.send(TRAY_UPDATED, json!(i));
        }
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.event_type, PLUGIN_BATCH_EVENTS);
        let events = Arc::unwrap_or_clone(batch).flatten();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.extension_id.as_deref() == Some("a")));
    }

    #[tokio::test]
    async fn test_reregister_closes_previous_bus() {
        let hub = EventHub::new();
        let first = hub.register_plugin("a");
        let second = hub.register_plugin("a");
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(hub.plugin_ids(), vec!["a".to_string()]);
    }
}
