//! Prelude module - commonly used types for convenient import.
//!
//! Use `use harbor_events::prelude::*;` to import all essential types.

pub use crate::{
    Delivery, Envelope, EventError, EventHub, EventResult, HubOptions, ListenerId,
    OutboundReceiver, PluginBus,
};
