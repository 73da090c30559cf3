//! Long-lived plugin extensions.
//!
//! A plugin owns one interpreter on its own [`Scheduler`]. Every script
//! callback, whether it comes from a client event, a timer or a settled host
//! call, is queued on the interpreter's completion queue and run by a single
//! pump job on the worker, so script code never runs concurrently with
//! itself.

pub mod components;
pub mod context;
pub mod diff;
pub mod dom;
pub mod field_refs;
pub mod forms;
pub mod palette;
pub mod state;
pub mod throttle;
pub mod tray;
pub mod webview;

use std::sync::Arc;

use harbor_core::LoadErrorCode;
use harbor_events::PluginBus;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

pub use context::{INBOUND_EVENTS, PluginCore, RenderTarget, UiModule, UnloadHook};

use crate::error::{RuntimeError, RuntimeResult};
use crate::interpreter::{Interpreter, InterpreterConfig, PLUGIN_SCRIPT};
use crate::scheduler::Scheduler;

/// Result of running a hook chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HookOutcome {
    /// The event after every handler ran, without the chain helpers.
    pub event: Value,
    /// Whether a handler called `preventDefault`.
    pub prevented: bool,
    /// Handlers that ran.
    pub handled: usize,
}

/// A loaded plugin.
#[derive(Debug)]
pub struct Plugin {
    core: Arc<PluginCore>,
}

impl Plugin {
    /// Start the worker, evaluate the payload and run `init` plus every
    /// `$ui.register` callback, then subscribe to the plugin's client events.
    ///
    /// Blocks until initialisation finished.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidExtension`] with
    /// [`LoadErrorCode::CompilationError`] if the payload does not evaluate,
    /// or [`LoadErrorCode::ConstructorError`] if `init` or a registered
    /// callback throws synchronously.
    pub fn load(config: InterpreterConfig, bus: Arc<PluginBus>) -> RuntimeResult<Self> {
        let extension_id = config.extension_id().to_string();
        let options = Arc::clone(config.options());
        let handle = config.handle().cloned();

        let scheduler: Scheduler<Interpreter> = Scheduler::new(extension_id.clone());
        let core = PluginCore::new(extension_id.clone(), Arc::clone(&bus), scheduler.clone(), options, handle);
        let weak = Arc::downgrade(&core);
        scheduler.set_error_handler(Arc::new(move |e| {
            if let Some(core) = weak.upgrade() {
                core.on_exception(&e.to_string());
            }
        }));

        let config = config
            .with_module(Arc::new(UiModule::new(&core)))
            .with_script(PLUGIN_SCRIPT);
        let init_core = Arc::clone(&core);
        let id = extension_id.clone();
        let started = scheduler.start(move || {
            let mut it = Interpreter::new(config)?;
            init_core.attach(Arc::clone(it.completions()), it.interrupt_handle());
            it.entry("pluginInit", &Value::Null).map_err(|e| match e {
                RuntimeError::Script { message } => RuntimeError::InvalidExtension {
                    extension_id: id,
                    code: LoadErrorCode::ConstructorError,
                    reason: message,
                },
                other => other,
            })?;
            for message in it.pump()? {
                init_core.on_exception(&message);
            }
            Ok(it)
        });
        if let Err(e) = started {
            scheduler.stop();
            bus.close();
            return Err(e);
        }

        let weak = Arc::downgrade(&core);
        let listener = bus.on(INBOUND_EVENTS, move |envelope| {
            if let Some(core) = weak.upgrade() {
                core.on_event(&envelope);
            }
        });
        match listener {
            Ok(id) => core.add_listener(id),
            Err(e) => warn!(extension_id = %extension_id, error = %e, "plugin could not subscribe to client events"),
        }

        info!(extension_id = %extension_id, "plugin loaded");
        Ok(Self { core })
    }

    /// Owning extension.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        self.core.extension_id()
    }

    /// Uncaught exceptions so far.
    #[must_use]
    pub fn exception_count(&self) -> usize {
        self.core.exception_count()
    }

    /// Whether teardown started, including the automatic one after too many
    /// exceptions.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.core.is_stopping()
    }

    /// Shared host-side state.
    #[must_use]
    pub fn core(&self) -> &Arc<PluginCore> {
        &self.core
    }

    /// Run `hook` once the plugin unloads itself.
    pub fn set_unload_hook(&self, hook: UnloadHook) {
        self.core.set_unload_hook(hook);
    }

    /// Run the `$app.on<Name>` handlers registered for `name`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Script`] if a handler throws, [`RuntimeError::Timeout`]
    /// past the call timeout, [`RuntimeError::SchedulerStopped`] once the
    /// plugin stopped.
    pub async fn trigger_hook(&self, name: &str, event: Value) -> RuntimeResult<HookOutcome> {
        let args = json!({ "name": name, "event": event });
        let core = Arc::clone(&self.core);
        let outcome = self
            .core
            .scheduler()
            .submit_timeout(
                move |it| {
                    let outcome = it.entry("hook", &args)?;
                    for message in it.pump()? {
                        core.on_exception(&message);
                    }
                    Ok(outcome)
                },
                self.core.options().call_timeout,
            )
            .await?;
        Ok(serde_json::from_value(outcome)?)
    }

    /// Evaluate `code` on the plugin's worker and return its JSON value.
    ///
    /// # Errors
    ///
    /// As [`trigger_hook`](Self::trigger_hook).
    pub async fn evaluate(&self, code: &str) -> RuntimeResult<Value> {
        let code = code.to_string();
        self.core
            .scheduler()
            .submit_timeout(move |it| it.eval(&code), self.core.options().call_timeout)
            .await
    }

    /// Tear the plugin down without blocking the async runtime.
    pub async fn stop(&self) {
        let core = Arc::clone(&self.core);
        if let Err(e) = tokio::task::spawn_blocking(move || core.shutdown()).await {
            warn!(extension_id = %self.extension_id(), error = %e, "plugin teardown task failed");
        }
    }

    /// Tear the plugin down, blocking until the worker exited.
    pub fn shutdown(&self) {
        self.core.shutdown();
    }
}

impl Drop for Plugin {
    fn drop(&mut self) {
        if !self.core.is_stopping() {
            self.core.abort_timers();
            self.core.scheduler().stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RuntimeOptions;
    use harbor_events::types;
    use harbor_events::{Envelope, EventHub, OutboundReceiver};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const ID: &str = "test-plugin";

    struct Harness {
        hub: EventHub,
        out: OutboundReceiver,
        seen: VecDeque<Envelope>,
        plugin: Plugin,
    }

    async fn load_with(source: &str, options: RuntimeOptions) -> RuntimeResult<Harness> {
        let hub = EventHub::new();
        let out = hub.subscribe();
        let bus = hub.register_plugin(ID);
        let config = InterpreterConfig::new(ID, source).with_options(Arc::new(options));
        let plugin = tokio::task::spawn_blocking(move || Plugin::load(config, bus))
            .await
            .unwrap()?;
        Ok(Harness {
            hub,
            out,
            seen: VecDeque::new(),
            plugin,
        })
    }

    async fn load(source: &str) -> Harness {
        let options = RuntimeOptions {
            render_interval: Duration::from_millis(10),
            ..RuntimeOptions::default()
        };
        load_with(source, options).await.unwrap()
    }

    impl Harness {
        fn dispatch(&self, event_type: &str, payload: Value) {
            self.hub
                .dispatch(&Envelope::new(event_type, payload).for_extension(ID))
                .unwrap();
        }

        async fn next(&mut self, event_type: &str) -> Envelope {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if let Some(i) = self.seen.iter().position(|e| e.event_type == event_type) {
                        return self.seen.remove(i).unwrap();
                    }
                    let batch = self.out.recv_flat().await.expect("hub closed");
                    self.seen.extend(batch);
                }
            })
            .await
            .unwrap_or_else(|_| panic!("no {event_type} event"))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tray_ids_survive_rerender() {
        let mut h = load(
            r#"
            function init() {
              $ui.register((ctx) => {
                const label = ctx.state("B");
                const tray = ctx.newTray({ tooltipText: "demo" });
                ctx.registerEventHandler("bump", () => label.set("B2"));
                tray.render(() => tray.stack([tray.button("A"), tray.button(label.get())]));
              });
            }
            "#,
        )
        .await;

        h.dispatch(types::TRAY_RENDER, json!({}));
        let first = h.next(types::TRAY_UPDATED).await;
        let children = first.payload["components"]["props"]["children"].clone();
        assert_eq!(children[1]["props"]["label"], "B");
        assert_eq!(first.payload["options"]["tooltipText"], "demo");

        h.dispatch(types::TRAY_HANDLER_TRIGGERED, json!({ "handlerName": "bump", "event": {} }));
        let second = h.next(types::TRAY_UPDATED).await;
        let after = &second.payload["components"];
        assert_eq!(after["id"], first.payload["components"]["id"]);
        assert_eq!(after["props"]["children"][0]["id"], children[0]["id"]);
        assert_eq!(after["props"]["children"][1]["id"], children[1]["id"]);
        assert_eq!(after["props"]["children"][1]["props"]["label"], "B2");

        h.plugin.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hook_chain() {
        let h = load(
            r#"
            $app.onGetAnime((e) => { e.anime.title = e.anime.title.toUpperCase(); e.next(); });
            $app.onGetAnime((e) => { e.preventDefault(); });
            "#,
        )
        .await;
        let outcome = h
            .plugin
            .trigger_hook("getAnime", json!({ "anime": { "title": "frieren" } }))
            .await
            .unwrap();
        assert_eq!(outcome.event["anime"]["title"], "FRIEREN");
        assert!(outcome.prevented);
        assert_eq!(outcome.handled, 2);

        let none = h.plugin.trigger_hook("other", json!({ "x": 1 })).await.unwrap();
        assert_eq!(none.handled, 0);
        assert!(!none.prevented);
        h.plugin.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dom_query_reply_resolves() {
        let mut h = load(
            r#"
            $ui.register((ctx) => {
              ctx.dom.query(".card").then((els) => ctx.toast.info(els[0].id));
            });
            "#,
        )
        .await;
        let request = h.next(types::DOM_QUERY).await;
        assert_eq!(request.payload["selector"], ".card");
        let request_id = request.payload["requestId"].as_str().unwrap().to_string();

        h.dispatch(
            types::DOM_QUERY_RESULT,
            json!({ "requestId": request_id, "elements": [{ "id": "el-1", "tagName": "DIV" }] }),
        );
        let toast = h.next(types::TOAST).await;
        assert_eq!(toast.payload["message"], "el-1");
        h.plugin.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dom_ready_rearms_observers() {
        let mut h = load(
            r#"
            $ui.register((ctx) => {
              ctx.dom.observe(".episode", (els) => ctx.toast.info(String(els.length)));
            });
            "#,
        )
        .await;
        let first = h.next(types::DOM_OBSERVE).await;
        let observer = first.payload["observerId"].clone();

        h.dispatch(types::DOM_READY, json!({}));
        let again = h.next(types::DOM_OBSERVE).await;
        assert_eq!(again.payload["observerId"], observer);
        assert_eq!(again.payload["selector"], ".episode");

        h.dispatch(
            types::DOM_OBSERVE_RESULT,
            json!({ "observerId": observer, "elements": [{ "id": "a" }, { "id": "b" }] }),
        );
        assert_eq!(h.next(types::TOAST).await.payload["message"], "2");
        h.plugin.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_field_ref_tracks_client_value() {
        let h = load(
            r#"
            var ref;
            $ui.register((ctx) => { ref = ctx.fieldRef("query", "a"); });
            "#,
        )
        .await;
        let id = h.plugin.evaluate("ref.__fieldRef").await.unwrap();
        h.dispatch(types::FIELD_REF_SEND_VALUE, json!({ "fieldRef": id, "value": "b" }));

        let mut current = Value::Null;
        for _ in 0..50 {
            current = h.plugin.evaluate("ref.current").await.unwrap();
            if current == "b" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(current, "b");
        h.plugin.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_callbacks_never_overlap() {
        let h = load(
            r#"
            var active = 0, maxActive = 0, count = 0;
            $ui.register((ctx) => {
              ctx.registerEventHandler("tick", () => {
                active += 1;
                maxActive = Math.max(maxActive, active);
                for (let i = 0; i < 1000; i++) {}
                count += 1;
                active -= 1;
              });
            });
            "#,
        )
        .await;
        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let hub = h.hub.clone();
                tokio::spawn(async move {
                    for _ in 0..10 {
                        hub.dispatch(
                            &Envelope::new(types::TRAY_HANDLER_TRIGGERED, json!({ "handlerName": "tick" }))
                                .for_extension(ID),
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        let mut count = Value::Null;
        for _ in 0..100 {
            count = h.plugin.evaluate("count").await.unwrap();
            if count == 50 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count, 50);
        assert_eq!(h.plugin.evaluate("maxActive").await.unwrap(), 1);
        h.plugin.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timer_fires() {
        let mut h = load(r#"$ui.register((ctx) => { ctx.setTimeout(() => ctx.toast.success("tick"), 10); });"#).await;
        let toast = h.next(types::TOAST).await;
        assert_eq!(toast.payload["message"], "tick");
        assert_eq!(toast.payload["intent"], "success");
        h.plugin.stop().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cleanup_runs_newest_first() {
        let mut h = load(
            r#"
            $ui.register((ctx) => {
              ctx.onCleanup(() => ctx.toast.info("first"));
              ctx.onCleanup(() => ctx.toast.info("second"));
            });
            "#,
        )
        .await;
        h.plugin.stop().await;
        assert!(h.plugin.is_stopping());

        let a = h.next(types::TOAST).await;
        let b = h.next(types::TOAST).await;
        assert_eq!(a.payload["message"], "second");
        assert_eq!(b.payload["message"], "first");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exception_limit_unloads() {
        let options = RuntimeOptions {
            max_exceptions: 3,
            ..RuntimeOptions::default()
        };
        let mut h = load_with(
            r#"$ui.register((ctx) => ctx.registerEventHandler("boom", () => { throw new Error("boom"); }));"#,
            options,
        )
        .await
        .unwrap();
        let unloaded = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&unloaded);
        h.plugin
            .set_unload_hook(Arc::new(move |_| flag.store(true, Ordering::SeqCst)));

        for _ in 0..3 {
            h.dispatch(types::TRAY_HANDLER_TRIGGERED, json!({ "handlerName": "boom" }));
        }
        let fatal = h.next(types::PLUGIN_FATAL_ERROR).await;
        assert!(fatal.payload["error"].as_str().unwrap().contains("boom"));
        h.next(types::PLUGIN_UNLOADED).await;

        for _ in 0..100 {
            if unloaded.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(unloaded.load(Ordering::SeqCst));
        assert!(h.plugin.is_stopping());
        assert_eq!(h.plugin.exception_count(), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_throwing_init_is_a_constructor_error() {
        let err = load_with(r#"function init() { throw new Error("bad init"); }"#, RuntimeOptions::default())
            .await
            .err()
            .unwrap();
        match err {
            RuntimeError::InvalidExtension { code, reason, .. } => {
                assert_eq!(code, LoadErrorCode::ConstructorError);
                assert!(reason.contains("bad init"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ungranted_namespace_is_absent() {
        let h = load(r#"var osType = typeof $os;"#).await;
        assert_eq!(h.plugin.evaluate("osType").await.unwrap(), "undefined");
        let r = h.plugin.evaluate("$os.cmd('ls')").await;
        assert!(matches!(r, Err(RuntimeError::Script { .. })));
        assert_eq!(h.plugin.evaluate("1 + 1").await.unwrap(), 2);
        h.plugin.stop().await;
    }
}
