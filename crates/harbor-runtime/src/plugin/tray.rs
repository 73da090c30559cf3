//! The plugin's tray icon and its panel.

use serde_json::{Value, json};

use crate::plugin::diff::Reconciler;

/// Tray state of one plugin.
#[derive(Debug, Default)]
pub struct Tray {
    options: Value,
    reconciler: Reconciler,
    has_render: bool,
    open: bool,
    on_open: Vec<u64>,
    on_close: Vec<u64>,
}

impl Tray {
    /// Create a tray described by `options` (icon, tooltip, size...).
    #[must_use]
    pub fn new(options: Value) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Options the tray was created with.
    #[must_use]
    pub fn options(&self) -> &Value {
        &self.options
    }

    /// Record that the script registered a render function.
    pub fn set_render(&mut self) {
        self.has_render = true;
        self.reconciler.reset();
    }

    /// Whether a render function exists.
    #[must_use]
    pub fn has_render(&self) -> bool {
        self.has_render
    }

    /// Reconcile a freshly rendered tree and build the `tray:updated`
    /// payload.
    pub fn updated(&mut self, tree: Value) -> Value {
        let components = self.reconciler.apply(tree);
        json!({ "components": components, "options": self.options })
    }

    /// `tray:badge-updated` payload.
    #[must_use]
    pub fn badge(number: u64, intent: Option<&str>) -> Value {
        json!({ "badgeNumber": number, "badgeIntent": intent.unwrap_or("info") })
    }

    /// Run `callback` when the panel opens.
    pub fn on_open(&mut self, callback: u64) {
        self.on_open.push(callback);
    }

    /// Run `callback` when the panel closes.
    pub fn on_close(&mut self, callback: u64) {
        self.on_close.push(callback);
    }

    /// Record an open or close reported by the client and return the
    /// callbacks to run.
    pub fn set_open(&mut self, open: bool) -> Vec<u64> {
        self.open = open;
        if open { self.on_open.clone() } else { self.on_close.clone() }
    }

    /// Whether the client reported the panel as open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Forget every callback, returning them.
    pub fn clear(&mut self) -> Vec<u64> {
        let mut callbacks = std::mem::take(&mut self.on_open);
        callbacks.append(&mut self.on_close);
        callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_updates_keep_ids() {
        let mut tray = Tray::new(json!({ "tooltipText": "Hello" }));
        tray.set_render();
        assert!(tray.has_render());
        let first = tray.updated(json!({ "id": "a", "type": "text", "props": { "text": "1" } }));
        assert_eq!(first["options"]["tooltipText"], "Hello");
        let second = tray.updated(json!({ "id": "b", "type": "text", "props": { "text": "2" } }));
        assert_eq!(second["components"]["id"], "a");
        assert_eq!(second["components"]["props"]["text"], "2");
    }

    #[test]
    fn test_open_close_callbacks() {
        let mut tray = Tray::new(Value::Null);
        tray.on_open(1);
        tray.on_close(2);
        assert_eq!(tray.set_open(true), vec![1]);
        assert!(tray.is_open());
        assert_eq!(tray.set_open(false), vec![2]);
        assert_eq!(tray.clear(), vec![1, 2]);
        assert!(tray.set_open(true).is_empty());
        assert_eq!(Tray::badge(3, None), json!({ "badgeNumber": 3, "badgeIntent": "info" }));
    }
}
