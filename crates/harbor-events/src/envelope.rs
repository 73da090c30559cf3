//! Wire envelope shared by client and host.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{EventError, EventResult};
use crate::types::PLUGIN_BATCH_EVENTS;

/// `{ extensionId?, type, payload }`.
///
/// Inbound envelopes without an extension id are broadcast to every plugin.
/// Outbound envelopes always carry the id of the plugin that sent them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Addressed or originating plugin.
    #[serde(rename = "extensionId", default, skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    /// Event type such as `tray:render`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event-specific payload.
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an unaddressed envelope.
    #[must_use]
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            extension_id: None,
            event_type: event_type.into(),
            payload,
        }
    }

    /// Address the envelope to (or stamp it with) `extension_id`.
    #[must_use]
    pub fn for_extension(mut self, extension_id: impl Into<String>) -> Self {
        self.extension_id = Some(extension_id.into());
        self
    }

    /// Whether the envelope targets every plugin.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.extension_id.is_none()
    }

    /// Decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Payload`] if the payload has another shape.
    pub fn payload_as<T: DeserializeOwned>(&self) -> EventResult<T> {
        T::deserialize(&self.payload).map_err(|source| EventError::Payload {
            event_type: self.event_type.clone(),
            source,
        })
    }

    /// Value of `payload.requestId`, if present.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        self.payload.get("requestId").and_then(Value::as_str)
    }

    /// Wrap several envelopes of one plugin into a `plugin:batch-events`
    /// envelope.
    #[must_use]
    pub fn batch(extension_id: &str, events: Vec<Envelope>) -> Self {
        Self::new(PLUGIN_BATCH_EVENTS, json!({ "events": events })).for_extension(extension_id)
    }

    /// Undo [`batch`](Self::batch); a plain envelope yields itself.
    #[must_use]
    pub fn flatten(self) -> Vec<Envelope> {
        if self.event_type != PLUGIN_BATCH_EVENTS {
            return vec![self];
        }
        self.payload
            .get("events")
            .cloned()
            .and_then(|v| serde_json::from_value::<Vec<Envelope>>(v).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let env = Envelope::new("tray:updated", json!({"a": 1})).for_extension("my-plugin");
        let text = serde_json::to_string(&env).unwrap();
        assert_eq!(
            text,
            r#"{"extensionId":"my-plugin","type":"tray:updated","payload":{"a":1}}"#
        );
        let back: Envelope = serde_json::from_str(r#"{"type":"tray:render-all"}"#).unwrap();
        assert!(back.is_broadcast());
        assert_eq!(back.payload, Value::Null);
    }

    #[test]
    fn test_batch_flatten() {
        let events = vec![
            Envelope::new("a", json!(1)).for_extension("p"),
            Envelope::new("b", json!(2)).for_extension("p"),
        ];
        let batch = Envelope::batch("p", events.clone());
        assert_eq!(batch.event_type, PLUGIN_BATCH_EVENTS);
        assert_eq!(batch.flatten(), events);
    }

    #[test]
    fn test_payload_as_and_request_id() {
        #[derive(Deserialize)]
        struct Submitted {
            #[serde(rename = "formName")]
            form_name: String,
        }
        let env = Envelope::new("tray:form-submitted", json!({"formName": "f", "requestId": "r1"}));
        assert_eq!(env.payload_as::<Submitted>().unwrap().form_name, "f");
        assert_eq!(env.request_id(), Some("r1"));
        assert!(env.payload_as::<Vec<u8>>().is_err());
    }
}
