//! Webview surfaces: a component slot plus an optional sandboxed document.

use harbor_capabilities::dom_filter::sanitize_html_checked;
use serde_json::{Value, json};

use crate::error::RuntimeResult;
use crate::plugin::components::denied;
use crate::plugin::diff::Reconciler;

/// Webview state of one plugin.
#[derive(Debug, Default)]
pub struct Webview {
    options: Value,
    reconciler: Reconciler,
    has_render: bool,
    mounted: bool,
    on_mount: Vec<u64>,
    on_sync: Vec<u64>,
}

impl Webview {
    /// Create a webview described by `options` (slot, size...).
    #[must_use]
    pub fn new(options: Value) -> Self {
        Self {
            options,
            ..Self::default()
        }
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

    /// Whether the client mounted the webview.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Reconcile a freshly rendered tree and build the `webview:updated`
    /// payload.
    pub fn updated(&mut self, tree: Value) -> Value {
        let components = self.reconciler.apply(tree);
        json!({ "components": components, "options": self.options })
    }

    /// `webview:iframe` payload for `html`, sanitized.
    ///
    /// # Errors
    ///
    /// [`crate::RuntimeError::Unauthorized`] when the document is still unsafe
    /// after sanitizing.
    pub fn iframe(&self, html: &str) -> RuntimeResult<Value> {
        let content = sanitize_html_checked(html).ok_or_else(|| denied("webviewSetContent", "html"))?;
        Ok(json!({ "content": content, "options": self.options }))
    }

    /// Run `callback` when the client mounts the webview.
    pub fn on_mount(&mut self, callback: u64) {
        self.on_mount.push(callback);
    }

    /// Run `callback(key, value)` on `webview:sync-state`.
    pub fn on_sync(&mut self, callback: u64) {
        self.on_sync.push(callback);
    }

    /// Handle `webview:mounted`: the callbacks to run.
    pub fn mounted(&mut self) -> Vec<u64> {
        self.mounted = true;
        // A remount starts from an empty slot.
        self.reconciler.reset();
        self.on_mount.clone()
    }

    /// Callbacks for `webview:sync-state`.
    #[must_use]
    pub fn sync_callbacks(&self) -> Vec<u64> {
        self.on_sync.clone()
    }

    /// Forget every callback, returning them.
    pub fn clear(&mut self) -> Vec<u64> {
        let mut callbacks = std::mem::take(&mut self.on_mount);
        callbacks.append(&mut self.on_sync);
        callbacks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iframe_is_sanitized() {
        let view = Webview::new(json!({ "slot": "screen" }));
        let payload = view
            .iframe(r#"<div onclick="x()">hi</div><script>steal()</script>"#)
            .unwrap();
        let content = payload["content"].as_str().unwrap();
        assert!(content.contains("hi"));
        assert!(!content.contains("onclick"));
        assert!(!content.contains("steal"));
        assert_eq!(payload["options"]["slot"], "screen");
    }

    #[test]
    fn test_iframe_unquoted_forms() {
        let view = Webview::new(Value::Null);
        let payload = view.iframe("<a href=javascript:alert(1)>x</a><img/onerror=alert(1) src=x>").unwrap();
        let content = payload["content"].as_str().unwrap();
        assert!(!content.contains("javascript"));
        assert!(!content.contains("onerror"));
        assert!(view.iframe("<p>javascript:alert(1)</p>").is_err());
    }

    #[test]
    fn test_mount_resets_baseline() {
        let mut view = Webview::new(Value::Null);
        view.set_render();
        view.on_mount(4);
        view.updated(json!({ "id": "a", "type": "div", "props": {} }));
        assert_eq!(view.mounted(), vec![4]);
        assert!(view.is_mounted());
        let out = view.updated(json!({ "id": "b", "type": "div", "props": {} }));
        assert_eq!(out["components"]["id"], "b");
        view.on_sync(5);
        assert_eq!(view.sync_callbacks(), vec![5]);
        assert_eq!(view.clear(), vec![4, 5]);
    }
}
