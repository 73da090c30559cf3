//! Host side of the plugin context.
//!
//! [`PluginCore`] owns everything a loaded plugin keeps outside its
//! interpreter: the UI surfaces, timers, bus listeners and the exception
//! counter. Script code reaches it through the `ui` host namespace served
//! by [`UiModule`]; the client reaches it through bus events routed by
//! [`PluginCore::on_event`]. Neither path runs script code directly. Both
//! queue callbacks on the interpreter's completion queue, whose waker
//! schedules one pump on the plugin's scheduler, so callbacks of one plugin
//! never run concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};
use std::time::Duration;

use harbor_events::{Envelope, ListenerId, PluginBus, types};
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::host::{Args, Completions, HostContext, HostModule, unknown_method};
use crate::interpreter::{InterruptHandle, Interpreter};
use crate::options::RuntimeOptions;
use crate::plugin::components;
use crate::plugin::dom::{self, DomRpc};
use crate::plugin::field_refs::FieldRefs;
use crate::plugin::forms::{self, Forms};
use crate::plugin::palette::Palette;
use crate::plugin::state::StateStore;
use crate::plugin::throttle::RenderThrottle;
use crate::plugin::tray::Tray;
use crate::plugin::webview::Webview;
use crate::scheduler::Scheduler;

/// Client events a plugin listens to.
pub const INBOUND_EVENTS: &[&str] = &[
    types::TRAY_RENDER,
    types::TRAY_RENDER_ALL,
    types::TRAY_OPENED,
    types::TRAY_CLOSED,
    types::TRAY_HANDLER_TRIGGERED,
    types::TRAY_FORM_SUBMITTED,
    types::SCREEN_CHANGED,
    types::WEBVIEW_MOUNTED,
    types::WEBVIEW_SYNC_STATE,
    types::DOM_READY,
    types::DOM_QUERY_RESULT,
    types::DOM_QUERY_ONE_RESULT,
    types::DOM_ELEMENT_UPDATED,
    types::DOM_OBSERVE_RESULT,
    types::DOM_CREATE_RESULT,
    types::DOM_EVENT,
    types::FIELD_REF_SEND_VALUE,
    types::COMMAND_PALETTE_ITEM_SELECTED,
    types::COMMAND_PALETTE_OPENED,
    types::COMMAND_PALETTE_CLOSED,
];

/// Called with the extension id once a plugin unloaded itself.
pub type UnloadHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Surface a render function draws into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    /// The tray panel.
    Tray,
    /// The webview component slot.
    Webview,
}

impl RenderTarget {
    /// Name passed to the script's render entry.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tray => "tray",
            Self::Webview => "webview",
        }
    }
}

// ---------------------------------------------------------------------------
// UI state
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct UiState {
    state: StateStore,
    field_refs: FieldRefs,
    forms: Forms,
    dom: DomRpc,
    tray: Option<Tray>,
    webview: Option<Webview>,
    palette: Option<Palette>,
    handlers: HashMap<String, u64>,
    handler_names: HashMap<String, String>,
    navigate: Vec<u64>,
}

impl UiState {
    fn new(options: &RuntimeOptions) -> Self {
        Self {
            state: StateStore::new(),
            field_refs: FieldRefs::new(options.max_field_refs),
            forms: Forms::default(),
            dom: DomRpc::new(),
            tray: None,
            webview: None,
            palette: None,
            handlers: HashMap::new(),
            handler_names: HashMap::new(),
            navigate: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Timer {
    task: AbortHandle,
    callback: u64,
}

/// Callback invocations and outbound events collected under the UI lock
/// and delivered after it is released.
#[derive(Debug, Default)]
struct Effects {
    invoke: Vec<(u64, Vec<Value>)>,
    send: Vec<(&'static str, Value)>,
    resolve: Vec<(u64, Value)>,
    render: Vec<RenderTarget>,
}

impl Effects {
    fn invoke_all(&mut self, callbacks: Vec<u64>, args: &[Value]) {
        self.invoke
            .extend(callbacks.into_iter().map(|cb| (cb, args.to_vec())));
    }
}

// ---------------------------------------------------------------------------
// Core
// ---------------------------------------------------------------------------

/// Host-side state of one loaded plugin.
pub struct PluginCore {
    me: Weak<PluginCore>,
    extension_id: String,
    bus: Arc<PluginBus>,
    scheduler: Scheduler<Interpreter>,
    options: Arc<RuntimeOptions>,
    handle: Option<Handle>,
    completions: OnceLock<Arc<Completions>>,
    interrupt: OnceLock<InterruptHandle>,
    ui: Mutex<UiState>,
    tray_throttle: RenderThrottle,
    webview_throttle: RenderThrottle,
    pump_pending: AtomicBool,
    exceptions: AtomicUsize,
    fatal: AtomicBool,
    stopping: AtomicBool,
    timers: Mutex<HashMap<u64, Timer>>,
    next_timer: AtomicU64,
    listeners: Mutex<Vec<ListenerId>>,
    on_unload: RwLock<Option<UnloadHook>>,
}

impl std::fmt::Debug for PluginCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCore")
            .field("extension_id", &self.extension_id)
            .field("exceptions", &self.exception_count())
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}

impl PluginCore {
    pub(crate) fn new(
        extension_id: String,
        bus: Arc<PluginBus>,
        scheduler: Scheduler<Interpreter>,
        options: Arc<RuntimeOptions>,
        handle: Option<Handle>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            extension_id,
            bus,
            scheduler,
            ui: Mutex::new(UiState::new(&options)),
            tray_throttle: RenderThrottle::new(options.render_interval),
            webview_throttle: RenderThrottle::new(options.render_interval),
            options,
            handle,
            completions: OnceLock::new(),
            interrupt: OnceLock::new(),
            pump_pending: AtomicBool::new(false),
            exceptions: AtomicUsize::new(0),
            fatal: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            timers: Mutex::new(HashMap::new()),
            next_timer: AtomicU64::new(0),
            listeners: Mutex::new(Vec::new()),
            on_unload: RwLock::new(None),
        })
    }

    /// Owning extension.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// The plugin's event bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<PluginBus> {
        &self.bus
    }

    /// Uncaught exceptions so far.
    #[must_use]
    pub fn exception_count(&self) -> usize {
        self.exceptions.load(Ordering::Acquire)
    }

    /// Whether teardown started.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn scheduler(&self) -> &Scheduler<Interpreter> {
        &self.scheduler
    }

    pub(crate) fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    fn ui(&self) -> MutexGuard<'_, UiState> {
        self.ui.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn throttle(&self, target: RenderTarget) -> &RenderThrottle {
        match target {
            RenderTarget::Tray => &self.tray_throttle,
            RenderTarget::Webview => &self.webview_throttle,
        }
    }

    /// Wire the interpreter's completion queue to this plugin's scheduler.
    pub(crate) fn attach(&self, completions: Arc<Completions>, interrupt: InterruptHandle) {
        let me = self.me.clone();
        completions.set_waker(Some(Arc::new(move || {
            if let Some(core) = me.upgrade() {
                core.schedule_pump();
            }
        })));
        let _ = self.completions.set(completions);
        let _ = self.interrupt.set(interrupt);
    }

    pub(crate) fn set_unload_hook(&self, hook: UnloadHook) {
        *self.on_unload.write().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub(crate) fn add_listener(&self, id: ListenerId) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
    }

    fn apply(&self, effects: Effects) {
        for (event_type, payload) in effects.send {
            self.bus.send(event_type, payload);
        }
        if let Some(completions) = self.completions.get() {
            for (ticket, value) in effects.resolve {
                completions.resolve(ticket, Ok(value));
            }
            for (callback, args) in effects.invoke {
                completions.invoke(callback, args);
            }
        }
        for target in effects.render {
            self.request_render(target);
        }
    }

    // -----------------------------------------------------------------------
    // Pumping and exceptions
    // -----------------------------------------------------------------------

    /// Queue one pump of the completion queue, unless one is already queued.
    fn schedule_pump(&self) {
        if self.pump_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let me = self.me.clone();
        self.scheduler.submit_async(move |it| {
            let Some(core) = me.upgrade() else {
                return Ok(());
            };
            core.pump_pending.store(false, Ordering::Release);
            for message in it.pump()? {
                core.on_exception(&message);
            }
            Ok(())
        });
    }

    /// Count an uncaught exception. Reaching the limit unloads the plugin.
    pub(crate) fn on_exception(&self, message: &str) {
        let count = self.exceptions.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        warn!(extension_id = %self.extension_id, error = %message, count, "uncaught plugin exception");
        if count < self.options.max_exceptions || self.fatal.swap(true, Ordering::AcqRel) {
            return;
        }
        error!(extension_id = %self.extension_id, count, "too many exceptions, unloading plugin");
        self.bus.send_now(
            types::PLUGIN_FATAL_ERROR,
            json!({ "error": message, "exceptions": count }),
        );
        // Teardown joins the worker, which may be the current thread.
        let me = self.me.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("harbor-unload-{}", self.extension_id))
            .spawn(move || {
                if let Some(core) = me.upgrade() {
                    core.shutdown();
                    let hook = core
                        .on_unload
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    if let Some(hook) = hook {
                        hook(&core.extension_id);
                    }
                }
            });
        if let Err(e) = spawned {
            error!(extension_id = %self.extension_id, error = %e, "failed to spawn unload thread");
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Schedule a render of `target`, coalesced with any pending one.
    pub(crate) fn request_render(&self, target: RenderTarget) {
        if self.is_stopping() {
            return;
        }
        let Some(delay) = self.throttle(target).request() else {
            return;
        };
        match &self.handle {
            Some(handle) if !delay.is_zero() => {
                let me = self.me.clone();
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(core) = me.upgrade() {
                        core.queue_render(target);
                    }
                });
            },
            _ => self.queue_render(target),
        }
    }

    fn queue_render(&self, target: RenderTarget) {
        let me = self.me.clone();
        self.scheduler.submit_async(move |it| match me.upgrade() {
            Some(core) => core.render(it, target),
            None => Ok(()),
        });
    }

    fn render(&self, it: &mut Interpreter, target: RenderTarget) -> RuntimeResult<()> {
        self.throttle(target).begin();
        let ready = {
            let ui = self.ui();
            match target {
                RenderTarget::Tray => ui.tray.as_ref().is_some_and(Tray::has_render),
                RenderTarget::Webview => ui.webview.as_ref().is_some_and(Webview::has_render),
            }
        };
        if !ready {
            return Ok(());
        }
        let tree = it.entry("render", &json!({ "target": target.as_str() }))?;
        let update = {
            let mut ui = self.ui();
            match target {
                RenderTarget::Tray => ui
                    .tray
                    .as_mut()
                    .map(|t| (types::TRAY_UPDATED, t.updated(tree))),
                RenderTarget::Webview => ui
                    .webview
                    .as_mut()
                    .map(|w| (types::WEBVIEW_UPDATED, w.updated(tree))),
            }
        };
        if let Some((event_type, payload)) = update {
            self.bus.send(event_type, payload);
        }
        Ok(())
    }

    fn renderable(ui: &UiState) -> Vec<RenderTarget> {
        let mut targets = Vec::new();
        if ui.tray.as_ref().is_some_and(Tray::has_render) {
            targets.push(RenderTarget::Tray);
        }
        if ui.webview.as_ref().is_some_and(|w| w.has_render() && w.is_mounted()) {
            targets.push(RenderTarget::Webview);
        }
        targets
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    fn start_timer(&self, completions: &Arc<Completions>, callback: u64, delay: Duration, repeat: bool) -> RuntimeResult<u64> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| RuntimeError::ServiceDown("no async runtime for timers".into()))?;
        let id = self.next_timer.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        let completions = Arc::clone(completions);
        let me = self.me.clone();
        let task = handle.spawn(async move {
            if repeat {
                let mut interval = tokio::time::interval(delay.max(Duration::from_millis(1)));
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    completions.invoke(callback, Vec::new());
                }
            } else {
                tokio::time::sleep(delay).await;
                if let Some(core) = me.upgrade() {
                    core.timers
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&id);
                }
                completions.invoke_once(callback, Vec::new());
            }
        });
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Timer {
                    task: task.abort_handle(),
                    callback,
                },
            );
        Ok(id)
    }

    fn clear_timer(&self, completions: &Completions, id: u64) -> bool {
        let timer = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match timer {
            Some(timer) => {
                timer.task.abort();
                completions.release(timer.callback);
                true
            },
            None => false,
        }
    }

    /// Abort every timer.
    pub(crate) fn abort_timers(&self) {
        let timers: Vec<Timer> = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, t)| t)
            .collect();
        for timer in &timers {
            timer.task.abort();
        }
        if !timers.is_empty() {
            debug!(extension_id = %self.extension_id, count = timers.len(), "timers cancelled");
        }
    }

    fn dom_deadline(&self, request_id: String) {
        let Some(handle) = &self.handle else {
            return;
        };
        let me = self.me.clone();
        let timeout = self.options.dom_response_timeout;
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(core) = me.upgrade() else {
                return;
            };
            let ticket = core.ui().dom.expire(&request_id);
            if let (Some(ticket), Some(completions)) = (ticket, core.completions.get()) {
                debug!(extension_id = %core.extension_id, request_id = %request_id, "DOM read timed out");
                completions.resolve(ticket, Ok(Value::Null));
            }
        });
    }

    // -----------------------------------------------------------------------
    // Inbound events
    // -----------------------------------------------------------------------

    /// Route one client event to the callbacks waiting for it.
    pub fn on_event(&self, envelope: &Envelope) {
        if self.is_stopping() {
            return;
        }
        let payload = &envelope.payload;
        let text = |key: &str| payload.get(key).and_then(Value::as_str).unwrap_or_default();
        let field = |key: &str| payload.get(key).cloned().unwrap_or(Value::Null);
        let mut fx = Effects::default();
        {
            let mut ui = self.ui();
            match envelope.event_type.as_str() {
                types::TRAY_RENDER | types::TRAY_RENDER_ALL => {
                    if ui.tray.is_some() {
                        fx.render.push(RenderTarget::Tray);
                    }
                },
                types::TRAY_OPENED | types::TRAY_CLOSED => {
                    let open = envelope.event_type == types::TRAY_OPENED;
                    if let Some(tray) = ui.tray.as_mut() {
                        fx.invoke_all(tray.set_open(open), &[]);
                        if open {
                            fx.render.push(RenderTarget::Tray);
                        }
                    }
                },
                types::TRAY_HANDLER_TRIGGERED => {
                    if let Some(cb) = ui.handlers.get(text("handlerName")) {
                        fx.invoke.push((*cb, vec![field("event")]));
                    }
                },
                types::TRAY_FORM_SUBMITTED => {
                    fx.invoke_all(ui.forms.handlers(text("formName")), &[field("data")]);
                },
                types::SCREEN_CHANGED => {
                    fx.invoke_all(ui.navigate.clone(), &[payload.clone()]);
                },
                types::WEBVIEW_MOUNTED => {
                    if let Some(view) = ui.webview.as_mut() {
                        fx.invoke_all(view.mounted(), &[]);
                        fx.render.push(RenderTarget::Webview);
                    }
                },
                types::WEBVIEW_SYNC_STATE => {
                    if let Some(view) = ui.webview.as_ref() {
                        fx.invoke_all(view.sync_callbacks(), &[field("key"), field("value")]);
                    }
                },
                types::DOM_READY => {
                    let (ready, observers) = ui.dom.rearm();
                    fx.send
                        .extend(observers.into_iter().map(|p| (types::DOM_OBSERVE, p)));
                    fx.invoke_all(ready, &[]);
                },
                types::DOM_QUERY_RESULT
                | types::DOM_QUERY_ONE_RESULT
                | types::DOM_CREATE_RESULT
                | types::DOM_ELEMENT_UPDATED => {
                    if let Some(settled) = ui.dom.reply(&envelope.event_type, payload) {
                        fx.resolve.push(settled);
                    }
                },
                types::DOM_OBSERVE_RESULT => {
                    if let Some(cb) = ui.dom.observer_callback(text("observerId")) {
                        fx.invoke.push((cb, vec![field("elements")]));
                    }
                },
                types::DOM_EVENT => {
                    if let Some(cb) = ui.dom.listener_callback(text("listenerId")) {
                        fx.invoke.push((cb, vec![field("event")]));
                    }
                },
                types::FIELD_REF_SEND_VALUE => {
                    ui.field_refs.set_local(text("fieldRef"), field("value"));
                },
                types::COMMAND_PALETTE_ITEM_SELECTED => {
                    if let Some(cb) = ui.palette.as_ref().and_then(|p| p.selected(text("value"))) {
                        fx.invoke.push((cb, vec![field("value")]));
                    }
                },
                types::COMMAND_PALETTE_OPENED | types::COMMAND_PALETTE_CLOSED => {
                    let open = envelope.event_type == types::COMMAND_PALETTE_OPENED;
                    if let Some(palette) = ui.palette.as_ref() {
                        fx.invoke_all(palette.toggled(open), &[]);
                    }
                },
                other => debug!(extension_id = %self.extension_id, event_type = %other, "unhandled plugin event"),
            }
        }
        self.apply(fx);
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Tear the plugin down. Blocks until the worker exited.
    ///
    /// Order: bus listeners, timers, cleanup callbacks (newest first), the
    /// scheduler, then the interpreter is interrupted.
    pub fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(extension_id = %self.extension_id, "stopping plugin");

        let listeners = std::mem::take(&mut *self.listeners.lock().unwrap_or_else(PoisonError::into_inner));
        for id in listeners {
            self.bus.unregister(id);
        }

        self.abort_timers();

        if !self.scheduler.on_worker() && !self.scheduler.is_stopped() {
            let cleanup = self.scheduler.submit_blocking(
                |it| {
                    it.entry("cleanup", &Value::Null)?;
                    it.pump()
                },
                self.options.submit_timeout,
            );
            match cleanup {
                Ok(errors) => {
                    for message in errors {
                        warn!(extension_id = %self.extension_id, error = %message, "cleanup callback failed");
                    }
                },
                Err(e) => warn!(extension_id = %self.extension_id, error = %e, "cleanup did not complete"),
            }
        }

        self.scheduler.stop();
        if let Some(interrupt) = self.interrupt.get() {
            interrupt.interrupt();
        }

        self.bus.send_now(types::PLUGIN_UNLOADED, json!({}));
        self.bus.close();
        self.scheduler.join();
        info!(extension_id = %self.extension_id, "plugin stopped");
    }
}

// ---------------------------------------------------------------------------
// Host module
// ---------------------------------------------------------------------------

/// The `ui` namespace: state, timers, handlers and UI surfaces.
#[derive(Debug)]
pub struct UiModule {
    core: Weak<PluginCore>,
}

impl UiModule {
    /// Serve the plugin owning `core`.
    #[must_use]
    pub fn new(core: &Arc<PluginCore>) -> Self {
        Self {
            core: Arc::downgrade(core),
        }
    }

    fn core(&self, cx: &HostContext) -> RuntimeResult<Arc<PluginCore>> {
        self.core.upgrade().ok_or_else(|| RuntimeError::SchedulerStopped {
            extension_id: cx.extension_id().to_string(),
        })
    }
}

fn millis(args: &Args<'_>, i: usize) -> Duration {
    Duration::from_millis(args.opt_u64(i).unwrap_or(0))
}

fn require<'a, T>(surface: Option<&'a mut T>, op: &str, what: &str) -> RuntimeResult<&'a mut T> {
    surface.ok_or_else(|| RuntimeError::invalid_argument(op, format!("no {what} was created")))
}

impl HostModule for UiModule {
    fn namespace(&self) -> &'static str {
        "ui"
    }

    #[allow(clippy::too_many_lines)]
    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        let core = self.core(cx)?;
        let completions = cx.completions();
        let op = args.op();
        let mut fx = Effects::default();
        let result = {
            let mut ui = core.ui();
            match method {
                // State and effects.
                "stateNew" => json!(ui.state.create(args.value(0).clone())),
                "stateGet" => ui.state.get(args.u64(0)?).cloned().unwrap_or(Value::Null),
                "stateSet" => {
                    let change = ui.state.set(args.u64(0)?, args.value(1).clone());
                    if change.changed {
                        fx.invoke_all(change.effects, &[]);
                        fx.render = PluginCore::renderable(&ui);
                    }
                    for cb in change.throttled {
                        warn!(extension_id = %core.extension_id, callback = cb, "effect is running too often, skipped");
                    }
                    json!(change.changed)
                },
                "effect" => {
                    let callback = args.u64(0)?;
                    let deps: Vec<u64> = args.decode(1).unwrap_or_default();
                    if deps.is_empty() {
                        completions.invoke_once(callback, Vec::new());
                        json!(0)
                    } else {
                        json!(ui.state.add_effect(callback, deps))
                    }
                },
                "cancelEffect" => {
                    if let Some(cb) = ui.state.remove_effect(args.u64(0)?) {
                        completions.release(cb);
                    }
                    Value::Null
                },

                // Timers.
                "setTimeout" | "setInterval" => {
                    drop(ui);
                    let repeat = method == "setInterval";
                    return Ok(json!(core.start_timer(completions, args.u64(0)?, millis(args, 1), repeat)?));
                },
                "clearTimer" => {
                    drop(ui);
                    return Ok(json!(core.clear_timer(completions, args.u64(0)?)));
                },

                // Handlers and field refs.
                "registerHandler" => {
                    if let Some(previous) = ui.handlers.insert(args.str(0)?.to_string(), args.u64(1)?) {
                        completions.release(previous);
                    }
                    Value::Null
                },
                "eventHandlerName" => {
                    let key = args.str(0)?.to_string();
                    let name = ui
                        .handler_names
                        .entry(key)
                        .or_insert_with(|| format!("__eventHandler__{}", uuid::Uuid::new_v4()))
                        .clone();
                    json!(name)
                },
                "fieldRef" => json!(ui.field_refs.create(args.opt_str(0), args.value(1).clone())?),
                "fieldRefGet" => ui.field_refs.get(args.str(0)?).cloned().unwrap_or(Value::Null),
                "fieldRefSet" => {
                    let payload = ui.field_refs.set(args.str(0)?, args.value(1).clone())?;
                    fx.send.push((types::FIELD_REF_SET_VALUE, payload));
                    Value::Null
                },

                // Components and forms.
                "component" => components::build(args.str(0)?, args.rest(1))?,
                "formField" => forms::field(args.str(0)?, args.opt_str(1), args.value(2))?,
                "formRender" => forms::render(args.str(0)?, args.value(1))?,
                "formOnSubmit" => {
                    ui.forms.on_submit(args.str(0)?, args.u64(1)?);
                    Value::Null
                },
                "formSetValues" => {
                    fx.send.push((types::FORM_SET_VALUES, forms::set_values(args.str(0)?, args.value(1).clone())));
                    Value::Null
                },
                "formReset" => {
                    fx.send.push((types::FORM_RESET, forms::reset(args.str(0)?, args.opt_str(1))));
                    Value::Null
                },
                "toast" => {
                    let intent = args.opt_str(1).unwrap_or("info");
                    fx.send.push((types::TOAST, json!({ "message": args.str(0)?, "intent": intent })));
                    Value::Null
                },

                // Tray.
                "trayNew" => {
                    ui.tray = Some(Tray::new(args.value(0).clone()));
                    Value::Null
                },
                "trayRender" => {
                    require(ui.tray.as_mut(), op, "tray")?.set_render();
                    Value::Null
                },
                "trayUpdate" => {
                    require(ui.tray.as_mut(), op, "tray")?;
                    fx.render.push(RenderTarget::Tray);
                    Value::Null
                },
                "trayOpen" | "trayClose" => {
                    require(ui.tray.as_mut(), op, "tray")?;
                    let event = if method == "trayOpen" { types::TRAY_OPEN } else { types::TRAY_CLOSE };
                    fx.send.push((event, json!({})));
                    Value::Null
                },
                "trayOnOpen" => {
                    require(ui.tray.as_mut(), op, "tray")?.on_open(args.u64(0)?);
                    Value::Null
                },
                "trayOnClose" => {
                    require(ui.tray.as_mut(), op, "tray")?.on_close(args.u64(0)?);
                    Value::Null
                },
                "trayBadge" => {
                    require(ui.tray.as_mut(), op, "tray")?;
                    fx.send.push((
                        types::TRAY_BADGE_UPDATED,
                        Tray::badge(args.opt_u64(0).unwrap_or(0), args.opt_str(1)),
                    ));
                    Value::Null
                },

                // Webview.
                "webviewNew" => {
                    ui.webview = Some(Webview::new(args.value(0).clone()));
                    Value::Null
                },
                "webviewRender" => {
                    require(ui.webview.as_mut(), op, "webview")?.set_render();
                    Value::Null
                },
                "webviewUpdate" => {
                    require(ui.webview.as_mut(), op, "webview")?;
                    fx.render.push(RenderTarget::Webview);
                    Value::Null
                },
                "webviewSetContent" => {
                    let payload = require(ui.webview.as_mut(), op, "webview")?.iframe(args.str(0)?)?;
                    fx.send.push((types::WEBVIEW_IFRAME, payload));
                    Value::Null
                },
                "webviewOnMount" => {
                    require(ui.webview.as_mut(), op, "webview")?.on_mount(args.u64(0)?);
                    Value::Null
                },
                "webviewOnSync" => {
                    require(ui.webview.as_mut(), op, "webview")?.on_sync(args.u64(0)?);
                    Value::Null
                },

                // Command palette.
                "paletteNew" => {
                    ui.palette = Some(Palette::new(args.value(0).clone()));
                    Value::Null
                },
                "paletteSetItems" => {
                    let (released, payload) = require(ui.palette.as_mut(), op, "command palette")?.set_items(args.value(0))?;
                    for cb in released {
                        completions.release(cb);
                    }
                    fx.send.push((types::COMMAND_PALETTE_UPDATED, payload));
                    Value::Null
                },
                "paletteOpen" | "paletteClose" => {
                    require(ui.palette.as_mut(), op, "command palette")?;
                    let event = if method == "paletteOpen" {
                        types::COMMAND_PALETTE_OPEN
                    } else {
                        types::COMMAND_PALETTE_CLOSE
                    };
                    fx.send.push((event, json!({})));
                    Value::Null
                },
                "paletteOnOpen" => {
                    require(ui.palette.as_mut(), op, "command palette")?.on_open(args.u64(0)?);
                    Value::Null
                },
                "paletteOnClose" => {
                    require(ui.palette.as_mut(), op, "command palette")?.on_close(args.u64(0)?);
                    Value::Null
                },

                // Screen.
                "screenOnNavigate" => {
                    ui.navigate.push(args.u64(0)?);
                    Value::Null
                },
                "screenNavigate" => {
                    let params = match args.value(1) {
                        Value::Null => json!({}),
                        other => other.clone(),
                    };
                    fx.send.push((types::SCREEN_NAVIGATE_TO, json!({ "path": args.str(0)?, "searchParams": params })));
                    Value::Null
                },
                "screenLoadCurrent" => {
                    fx.send.push((types::SCREEN_GET_CURRENT, json!({})));
                    Value::Null
                },

                // DOM-RPC.
                "domQuery" | "domQueryOne" => {
                    let (request, reply) = if method == "domQuery" {
                        (types::DOM_QUERY, types::DOM_QUERY_RESULT)
                    } else {
                        (types::DOM_QUERY_ONE, types::DOM_QUERY_ONE_RESULT)
                    };
                    let selector = args.str(0)?;
                    let ticket = completions.ticket();
                    let request_id = ui.dom.request(ticket, reply);
                    fx.send.push((request, json!({ "selector": selector, "requestId": request_id })));
                    drop(ui);
                    core.apply(fx);
                    core.dom_deadline(request_id);
                    return Ok(json!(ticket));
                },
                "domCreate" => {
                    let tag = args.str(0)?.to_string();
                    let ticket = completions.ticket();
                    let request_id = ui.dom.request(ticket, types::DOM_CREATE_RESULT);
                    fx.send.push((types::DOM_CREATE, json!({ "tagName": tag, "requestId": request_id })));
                    drop(ui);
                    core.apply(fx);
                    core.dom_deadline(request_id);
                    return Ok(json!(ticket));
                },
                "domManipulate" => {
                    let element_id = args.str(0)?.to_string();
                    let action = args.str(1)?.to_string();
                    let params = dom::check_manipulation(&action, args.value(2).clone())?;
                    if dom::is_read_action(&action) {
                        let ticket = completions.ticket();
                        let request_id = ui.dom.request(ticket, types::DOM_ELEMENT_UPDATED);
                        fx.send.push((
                            types::DOM_MANIPULATE,
                            json!({ "elementId": element_id, "action": action, "params": params, "requestId": request_id }),
                        ));
                        drop(ui);
                        core.apply(fx);
                        core.dom_deadline(request_id);
                        return Ok(json!(ticket));
                    }
                    fx.send.push((
                        types::DOM_MANIPULATE,
                        json!({ "elementId": element_id, "action": action, "params": params }),
                    ));
                    Value::Null
                },
                "domObserve" => {
                    let (id, payload) = ui.dom.observe(args.str(0)?, args.u64(1)?);
                    fx.send.push((types::DOM_OBSERVE, payload));
                    json!(id)
                },
                "domStopObserve" => {
                    if let Some((cb, payload)) = ui.dom.stop_observe(args.str(0)?) {
                        completions.release(cb);
                        fx.send.push((types::DOM_STOP_OBSERVE, payload));
                    }
                    Value::Null
                },
                "domOnReady" => {
                    ui.dom.on_ready(args.u64(0)?);
                    Value::Null
                },
                "domListen" => {
                    let (id, payload) = ui.dom.listen(args.str(0)?, args.str(1)?, args.u64(2)?);
                    fx.send.push((types::DOM_MANIPULATE, payload));
                    json!(id)
                },
                "domUnlisten" => {
                    if let Some((cb, payload)) = ui.dom.unlisten(args.str(0)?) {
                        completions.release(cb);
                        fx.send.push((types::DOM_MANIPULATE, payload));
                    }
                    Value::Null
                },
                _ => return Err(unknown_method("ui", method)),
            }
        };
        core.apply(fx);
        Ok(result)
    }

    fn shutdown(&self) {
        if let Some(core) = self.core.upgrade() {
            core.abort_timers();
        }
    }
}
