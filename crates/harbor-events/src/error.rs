//! Event error types.

use thiserror::Error;

/// Errors raised by the event layer.
#[derive(Debug, Error)]
pub enum EventError {
    /// The plugin's bus was closed during teardown.
    #[error("event bus of {extension_id} is closed")]
    Closed {
        /// Owner of the bus.
        extension_id: String,
    },

    /// No bus is registered for the addressed plugin.
    #[error("no plugin registered with id {extension_id}")]
    UnknownPlugin {
        /// Addressed plugin.
        extension_id: String,
    },

    /// A payload did not have the expected shape.
    #[error("invalid payload for {event_type}: {source}")]
    Payload {
        /// Event whose payload failed to decode.
        event_type: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// Result type for event operations.
pub type EventResult<T> = Result<T, EventError>;
