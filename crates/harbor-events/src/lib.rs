//! Harbor Events - client <-> extension event routing.
//!
//! This crate provides:
//! - The wire [`Envelope`] and the event type names
//! - A per-plugin [`PluginBus`] with callback and channel listeners
//! - The [`EventHub`] routing client messages to plugins and merging their
//!   outbound traffic, coalesced into batches
//!
//! # Example
//!
//! ```rust
//! use harbor_events::{Envelope, EventHub};
//! use serde_json::json;
//!
//! # async fn example() {
//! let hub = EventHub::new();
//! let mut outbound = hub.subscribe();
//! let bus = hub.register_plugin("my-plugin");
//!
//! bus.on(&["tray:render"], |_event| { /* render */ }).unwrap();
//! hub.dispatch(&Envelope::new("tray:render", json!({}))).unwrap();
//!
//! bus.send("tray:updated", json!({"components": null}));
//! let sent = outbound.recv().await.unwrap();
//! assert_eq!(sent.extension_id.as_deref(), Some("my-plugin"));
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;
pub mod types;

mod batch;
mod bus;
mod envelope;
mod error;
mod hub;

pub use batch::{DEFAULT_BATCH_SIZE, DEFAULT_BATCH_WINDOW, OutboundBatcher};
pub use bus::{DEFAULT_LISTENER_BUFFER, Delivery, EventCallback, ListenerId, PluginBus};
pub use envelope::Envelope;
pub use error::{EventError, EventResult};
pub use hub::{DEFAULT_OUTBOUND_CAPACITY, EventHub, HubOptions, OutboundReceiver};
