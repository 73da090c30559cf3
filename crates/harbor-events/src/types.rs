//! Event type names.
//!
//! Client-to-host names are what plugins listen for; host-to-client names
//! are what the runtime emits.

// ---------------------------------------------------------------------------
// Client -> host
// ---------------------------------------------------------------------------

/// The client asks one plugin to render its tray.
pub const TRAY_RENDER: &str = "tray:render";
/// The client asks every plugin to render its tray.
pub const TRAY_RENDER_ALL: &str = "tray:render-all";
/// A tray was opened in the client.
pub const TRAY_OPENED: &str = "tray:opened";
/// A tray was closed in the client.
pub const TRAY_CLOSED: &str = "tray:closed";
/// A component handler (`onClick`, `onChange`...) fired.
pub const TRAY_HANDLER_TRIGGERED: &str = "tray:handler-triggered";
/// A form was submitted.
pub const TRAY_FORM_SUBMITTED: &str = "tray:form-submitted";
/// The client navigated.
pub const SCREEN_CHANGED: &str = "screen:changed";
/// A webview was mounted.
pub const WEBVIEW_MOUNTED: &str = "webview:mounted";
/// The client pushes webview state back to the plugin.
pub const WEBVIEW_SYNC_STATE: &str = "webview:sync-state";
/// The client DOM is ready (also sent after navigation).
pub const DOM_READY: &str = "dom:ready";
/// Reply to `dom:query`.
pub const DOM_QUERY_RESULT: &str = "dom:query-result";
/// Reply to `dom:query-one`.
pub const DOM_QUERY_ONE_RESULT: &str = "dom:query-one-result";
/// Reply to a read through `dom:manipulate`, or an element change.
pub const DOM_ELEMENT_UPDATED: &str = "dom:element-updated";
/// Matches of an active observer.
pub const DOM_OBSERVE_RESULT: &str = "dom:observe-result";
/// Reply to `dom:create`.
pub const DOM_CREATE_RESULT: &str = "dom:create-result";
/// An element event listener fired.
pub const DOM_EVENT: &str = "dom:event";
/// The client sends the current value of a field ref.
pub const FIELD_REF_SEND_VALUE: &str = "fieldref:send-value";
/// A command palette item was selected.
pub const COMMAND_PALETTE_ITEM_SELECTED: &str = "command-palette:item-selected";
/// The command palette was opened.
pub const COMMAND_PALETTE_OPENED: &str = "command-palette:opened";
/// The command palette was closed.
pub const COMMAND_PALETTE_CLOSED: &str = "command-palette:closed";

// ---------------------------------------------------------------------------
// Host -> client
// ---------------------------------------------------------------------------

/// A rendered (diffed) tray tree.
pub const TRAY_UPDATED: &str = "tray:updated";
/// Open the tray.
pub const TRAY_OPEN: &str = "tray:open";
/// Close the tray.
pub const TRAY_CLOSE: &str = "tray:close";
/// New tray badge.
pub const TRAY_BADGE_UPDATED: &str = "tray:badge-updated";
/// A rendered (diffed) webview tree.
pub const WEBVIEW_UPDATED: &str = "webview:updated";
/// Sanitized webview document.
pub const WEBVIEW_IFRAME: &str = "webview:iframe";
/// Query all matching elements.
pub const DOM_QUERY: &str = "dom:query";
/// Query the first matching element.
pub const DOM_QUERY_ONE: &str = "dom:query-one";
/// Create an element.
pub const DOM_CREATE: &str = "dom:create";
/// Call an element operation.
pub const DOM_MANIPULATE: &str = "dom:manipulate";
/// Start observing a selector.
pub const DOM_OBSERVE: &str = "dom:observe";
/// Stop an observer.
pub const DOM_STOP_OBSERVE: &str = "dom:stop-observe";
/// Set a field ref's value in the client.
pub const FIELD_REF_SET_VALUE: &str = "fieldref:set-value";
/// Command palette contents changed.
pub const COMMAND_PALETTE_UPDATED: &str = "command-palette:updated";
/// Open the command palette.
pub const COMMAND_PALETTE_OPEN: &str = "command-palette:open";
/// Close the command palette.
pub const COMMAND_PALETTE_CLOSE: &str = "command-palette:close";
/// Set values of a rendered form.
pub const FORM_SET_VALUES: &str = "form:set-values";
/// Reset a rendered form, or one of its fields.
pub const FORM_RESET: &str = "form:reset";
/// Navigate the client to a path.
pub const SCREEN_NAVIGATE_TO: &str = "screen:navigate-to";
/// Ask the client for its current screen.
pub const SCREEN_GET_CURRENT: &str = "screen:get-current";
/// Show a toast.
pub const TOAST: &str = "toast";
/// Several outbound events coalesced into one.
pub const PLUGIN_BATCH_EVENTS: &str = "plugin:batch-events";
/// The plugin hit its exception limit and was unloaded.
pub const PLUGIN_FATAL_ERROR: &str = "plugin:fatal-error";
/// The plugin was unloaded.
pub const PLUGIN_UNLOADED: &str = "plugin:unloaded";
