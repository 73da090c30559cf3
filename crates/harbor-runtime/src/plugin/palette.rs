//! Command palette contributed by a plugin.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{RuntimeError, RuntimeResult};

/// One palette entry as sent by the script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaletteItem {
    /// Text shown.
    pub label: String,
    /// Value reported on selection.
    pub value: String,
    /// Group heading.
    #[serde(default)]
    pub heading: Option<String>,
    /// Script callback run on selection.
    #[serde(default)]
    pub callback: Option<u64>,
}

/// Palette state of one plugin.
#[derive(Debug, Default)]
pub struct Palette {
    options: Value,
    items: Vec<PaletteItem>,
    on_open: Vec<u64>,
    on_close: Vec<u64>,
}

impl Palette {
    /// Create a palette described by `options` (placeholder, shortcut).
    #[must_use]
    pub fn new(options: Value) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Replace the items. Returns the callbacks of the previous items and
    /// the `command-palette:updated` payload.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidArgument`] if an item lacks a label or value.
    pub fn set_items(&mut self, items: &Value) -> RuntimeResult<(Vec<u64>, Value)> {
        let items: Vec<PaletteItem> = serde_json::from_value(items.clone())
            .map_err(|e| RuntimeError::invalid_argument("commandPalette.setItems", e.to_string()))?;
        let previous = std::mem::replace(&mut self.items, items);
        let released = previous.into_iter().filter_map(|i| i.callback).collect();
        Ok((released, self.updated()))
    }

    /// `command-palette:updated` payload.
    #[must_use]
    pub fn updated(&self) -> Value {
        let items: Vec<Value> = self
            .items
            .iter()
            .map(|i| json!({ "label": i.label, "value": i.value, "heading": i.heading }))
            .collect();
        json!({
            "placeholder": self.options.get("placeholder").cloned().unwrap_or(Value::Null),
            "keyboardShortcut": self.options.get("keyboardShortcut").cloned().unwrap_or(Value::Null),
            "items": items,
        })
    }

    /// Callback of the item with `value`.
    #[must_use]
    pub fn selected(&self, value: &str) -> Option<u64> {
        self.items
            .iter()
            .find(|i| i.value == value)
            .and_then(|i| i.callback)
    }

    /// Run `callback` when the palette opens.
    pub fn on_open(&mut self, callback: u64) {
        self.on_open.push(callback);
    }

    /// Run `callback` when the palette closes.
    pub fn on_close(&mut self, callback: u64) {
        self.on_close.push(callback);
    }

    /// Callbacks for an open (`true`) or close.
    #[must_use]
    pub fn toggled(&self, open: bool) -> Vec<u64> {
        if open { self.on_open.clone() } else { self.on_close.clone() }
    }

    /// Forget every callback, returning them.
    pub fn clear(&mut self) -> Vec<u64> {
        let mut callbacks: Vec<u64> = self.items.drain(..).filter_map(|i| i.callback).collect();
        callbacks.append(&mut self.on_open);
        callbacks.append(&mut self.on_close);
        callbacks
    }
}
