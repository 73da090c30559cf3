//! Sandboxed JavaScript interpreter.
//!
//! An [`Interpreter`] is one QuickJS runtime plus the host bindings its
//! extension was granted. It is single-threaded by contract: whoever holds
//! `&mut Interpreter` is the only code touching it. Pools hand interpreters
//! to one caller at a time and plugins keep theirs on a scheduler worker.
//!
//! Scripts and the host exchange JSON text only. Scripts call the host
//! through `__harbor_hostcall(op, argsJson)`; the host calls into scripts
//! through `__harbor_entry(kind, argsJson)`, which always answers with an
//! `{"ok": value}` or `{"err": {kind, message}}` envelope.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use harbor_capabilities::CapabilityGate;
use harbor_core::LoadErrorCode;
use rquickjs::{CatchResultExt, CaughtError, Context, Function, Runtime};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tracing::{debug, trace};

use crate::error::{RuntimeError, RuntimeResult};
use crate::host::services::{SERVICE_NAMES, service_binding};
use crate::host::{Completions, HostContext, HostModule, HostRegistry, Services};
use crate::options::RuntimeOptions;

/// Globals, polyfills and per-namespace bindings.
const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// Plugin context (`$ui`, `$ctx`, `$app` hooks).
pub const PLUGIN_SCRIPT: &str = include_str!("plugin.js");

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Everything needed to build an [`Interpreter`].
pub struct InterpreterConfig {
    extension_id: String,
    version: String,
    source: String,
    gate: CapabilityGate,
    options: Arc<RuntimeOptions>,
    services: Services,
    handle: Option<Handle>,
    modules: Vec<Arc<dyn HostModule>>,
    scripts: Vec<&'static str>,
}

impl std::fmt::Debug for InterpreterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterpreterConfig")
            .field("extension_id", &self.extension_id)
            .field("source_len", &self.source.len())
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl InterpreterConfig {
    /// Interpreter for `source` owned by `extension_id`, with no permissions.
    #[must_use]
    pub fn new(extension_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            extension_id: extension_id.into(),
            version: String::new(),
            source: source.into(),
            gate: CapabilityGate::deny_all(),
            options: Arc::new(RuntimeOptions::default()),
            services: Services::default(),
            handle: Handle::try_current().ok(),
            modules: Vec::new(),
            scripts: Vec::new(),
        }
    }

    /// Extension version reported by `$app.getVersion()`.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Compiled permissions.
    #[must_use]
    pub fn with_gate(mut self, gate: CapabilityGate) -> Self {
        self.gate = gate;
        self
    }

    /// Limits and deadlines.
    #[must_use]
    pub fn with_options(mut self, options: Arc<RuntimeOptions>) -> Self {
        self.options = options;
        self
    }

    /// External collaborators.
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Async runtime for background work.
    #[must_use]
    pub fn with_handle(mut self, handle: Option<Handle>) -> Self {
        self.handle = handle;
        self
    }

    /// Install an extra host module on top of the standard ones.
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn HostModule>) -> Self {
        self.modules.push(module);
        self
    }

    /// Evaluate `script` after the bootstrap and before the payload.
    #[must_use]
    pub fn with_script(mut self, script: &'static str) -> Self {
        self.scripts.push(script);
        self
    }

    /// Owning extension.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Limits the interpreter will be built with.
    #[must_use]
    pub fn options(&self) -> &Arc<RuntimeOptions> {
        &self.options
    }

    /// Async runtime the interpreter will use.
    #[must_use]
    pub fn handle(&self) -> Option<&Handle> {
        self.handle.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

/// Cross-thread switch that aborts running script code.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    /// Abort script code at its next interrupt check.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Allow script code to run again.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Whether an interrupt is pending.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScriptFailure {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderStart {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    call: Option<u64>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    panic: Option<ScriptFailure>,
}

#[derive(Debug, Deserialize)]
struct ProviderStatus {
    status: String,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error: Option<ScriptFailure>,
}

/// One sandboxed script instance.
pub struct Interpreter {
    extension_id: String,
    context: Context,
    runtime: Runtime,
    host: Arc<HostContext>,
    registry: Arc<HostRegistry>,
    interrupt: InterruptHandle,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("extension_id", &self.extension_id)
            .field("registry", &self.registry)
            .field("interrupted", &self.interrupt.is_interrupted())
            .finish_non_exhaustive()
    }
}

fn engine(e: &rquickjs::Error) -> RuntimeError {
    RuntimeError::Engine(e.to_string())
}

fn compilation_error(extension_id: &str, reason: String) -> RuntimeError {
    RuntimeError::InvalidExtension {
        extension_id: extension_id.to_string(),
        code: LoadErrorCode::CompilationError,
        reason,
    }
}

/// Text of a caught exception, with the QuickJS reference error wording
/// normalized to `x is not defined`.
fn caught_message(e: &CaughtError<'_>) -> String {
    let message = match e {
        CaughtError::Exception(ex) => ex.message().unwrap_or_else(|| e.to_string()),
        _ => e.to_string(),
    };
    normalize_message(&message)
}

fn normalize_message(message: &str) -> String {
    match message.strip_prefix('\'').and_then(|m| m.split_once("' is not defined")) {
        Some((name, rest)) => format!("{name} is not defined{rest}"),
        None => message.to_string(),
    }
}

impl Interpreter {
    /// Build the runtime, install granted bindings and evaluate the payload.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidExtension`] with
    /// [`LoadErrorCode::CompilationError`] if the payload does not evaluate,
    /// [`RuntimeError::Engine`] if the engine cannot be created.
    pub fn new(config: InterpreterConfig) -> RuntimeResult<Self> {
        let InterpreterConfig {
            extension_id,
            version,
            source,
            gate,
            options,
            services,
            handle,
            modules,
            scripts,
        } = config;

        let runtime = Runtime::new().map_err(|e| engine(&e))?;
        runtime.set_memory_limit(options.memory_limit);
        runtime.set_max_stack_size(options.max_stack);
        let interrupt = InterruptHandle::default();
        let flag = interrupt.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || flag.is_interrupted())));
        let context = Context::full(&runtime).map_err(|e| engine(&e))?;

        let host = Arc::new(HostContext::new(
            extension_id.clone(),
            gate,
            options,
            services,
            handle,
        ));
        let mut registry = HostRegistry::standard(&host);
        for module in modules {
            registry.install(module);
        }
        let registry = Arc::new(registry);

        let config_json = Self::bootstrap_config(&extension_id, &version, &host, &registry).to_string();
        let interpreter = Self {
            extension_id,
            context,
            runtime,
            host,
            registry,
            interrupt,
        };

        interpreter
            .context
            .with(|ctx| -> RuntimeResult<()> {
                let registry = Arc::clone(&interpreter.registry);
                let host = Arc::clone(&interpreter.host);
                let hostcall = Function::new(ctx.clone(), move |op: String, args: String| -> String {
                    registry.dispatch(&host, &op, &args)
                })
                .map_err(|e| engine(&e))?;
                ctx.globals()
                    .set("__harbor_hostcall", hostcall)
                    .map_err(|e| engine(&e))?;

                let install: Function = ctx
                    .eval(BOOTSTRAP)
                    .catch(&ctx)
                    .map_err(|e| RuntimeError::Engine(format!("bootstrap: {}", caught_message(&e))))?;
                install
                    .call::<_, ()>((config_json,))
                    .catch(&ctx)
                    .map_err(|e| RuntimeError::Engine(format!("bootstrap: {}", caught_message(&e))))?;
                for script in &scripts {
                    ctx.eval::<(), _>(*script)
                        .catch(&ctx)
                        .map_err(|e| RuntimeError::Engine(format!("prelude: {}", caught_message(&e))))?;
                }

                // A global script, so top-level `class` and `let` bindings
                // stay visible to the entry points.
                ctx.eval::<(), _>(source.as_str())
                    .catch(&ctx)
                    .map_err(|e| compilation_error(&interpreter.extension_id, caught_message(&e)))?;
                ctx.eval::<(), _>(
                    "globalThis.__harbor_provider = typeof Provider === 'function' ? Provider : undefined;",
                )
                .catch(&ctx)
                .map_err(|e| compilation_error(&interpreter.extension_id, caught_message(&e)))?;
                Ok(())
            })?;

        debug!(extension_id = %interpreter.extension_id, "interpreter ready");
        Ok(interpreter)
    }

    fn bootstrap_config(extension_id: &str, version: &str, host: &HostContext, registry: &HostRegistry) -> Value {
        let namespaces: Vec<&str> = [
            "fs",
            "filepath",
            "cmd",
            "archive",
            "downloader",
            "store",
            "storage",
            "notification",
            "ui",
        ]
        .into_iter()
        .filter(|ns| registry.has(ns))
        .collect();
        let services: Vec<Value> = SERVICE_NAMES
            .iter()
            .filter_map(|name| service_binding(name).map(|(global, scope)| (*name, global, scope)))
            .filter(|(_, _, scope)| host.gate().has_scope(scope))
            .map(|(name, global, _)| json!([name, global]))
            .collect();
        json!({
            "extensionId": extension_id,
            "version": version,
            "namespaces": namespaces,
            "services": services,
        })
    }

    /// Owning extension.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Host context shared with the bindings.
    #[must_use]
    pub fn host(&self) -> &Arc<HostContext> {
        &self.host
    }

    /// Completion queue of the bindings.
    #[must_use]
    pub fn completions(&self) -> &Arc<Completions> {
        self.host.completions()
    }

    /// Handle that interrupts this interpreter from any thread.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Abort running script code.
    pub fn interrupt(&self) {
        self.interrupt.interrupt();
    }

    /// Allow script code to run again.
    pub fn clear_interrupt(&self) {
        self.interrupt.clear();
    }

    /// Whether the namespace `ns` is installed.
    #[must_use]
    pub fn has_namespace(&self, ns: &str) -> bool {
        self.registry.has(ns)
    }

    fn script_error(&self, e: &CaughtError<'_>) -> RuntimeError {
        if self.interrupt.is_interrupted() {
            return RuntimeError::Cancelled(format!("{} interrupted", self.extension_id));
        }
        RuntimeError::script(caught_message(e))
    }

    /// Evaluate `code` as a global script and return its value as JSON.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Script`] if the code throws, [`RuntimeError::Cancelled`]
    /// if it was interrupted.
    pub fn eval(&mut self, code: &str) -> RuntimeResult<Value> {
        let wrapped = format!("JSON.stringify((0, eval)({}) ?? null)", Value::String(code.to_string()));
        let text: Option<String> = self
            .context
            .with(|ctx| ctx.eval::<Option<String>, _>(wrapped).catch(&ctx).map_err(|e| self.script_error(&e)))?;
        match text {
            Some(text) => Ok(serde_json::from_str(&text)?),
            None => Ok(Value::Null),
        }
    }

    /// Call the bootstrap entry point `kind`.
    ///
    /// # Errors
    ///
    /// Whatever the entry reports, mapped through [`RuntimeError::script`].
    pub fn entry(&mut self, kind: &str, args: &Value) -> RuntimeResult<Value> {
        let args = args.to_string();
        let kind = kind.to_string();
        trace!(extension_id = %self.extension_id, kind = %kind, "entry");
        let reply: String = self.context.with(|ctx| {
            let entry: Function = ctx.globals().get("__harbor_entry").map_err(|e| engine(&e))?;
            entry
                .call::<_, String>((kind, args))
                .catch(&ctx)
                .map_err(|e| self.script_error(&e))
        })?;
        let mut envelope: serde_json::Map<String, Value> = serde_json::from_str(&reply)?;
        if let Some(err) = envelope.remove("err") {
            let failure: ScriptFailure = serde_json::from_value(err)?;
            return Err(self.failure(failure));
        }
        Ok(envelope.remove("ok").unwrap_or(Value::Null))
    }

    fn failure(&self, failure: ScriptFailure) -> RuntimeError {
        if self.interrupt.is_interrupted() {
            return RuntimeError::Cancelled(format!("{} interrupted", self.extension_id));
        }
        match failure.kind.as_str() {
            "Cancelled" => RuntimeError::Cancelled(failure.message),
            _ => RuntimeError::script(failure.message),
        }
    }

    /// Run queued promise jobs. Returns how many ran.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Cancelled`] when interrupted mid-job.
    pub fn run_jobs(&mut self) -> RuntimeResult<usize> {
        let mut ran: usize = 0;
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => ran = ran.saturating_add(1),
                Ok(false) => return Ok(ran),
                Err(e) => {
                    if self.interrupt.is_interrupted() {
                        return Err(RuntimeError::Cancelled(format!("{} interrupted", self.extension_id)));
                    }
                    // A job that throws has already rejected its promise.
                    trace!(extension_id = %self.extension_id, error = %e, "promise job failed");
                    ran = ran.saturating_add(1);
                },
            }
        }
    }

    /// Deliver ready completions to the script, then run promise jobs,
    /// until both are quiet.
    ///
    /// Returns the messages of exceptions thrown by delivered callbacks.
    ///
    /// # Errors
    ///
    /// As [`entry`](Self::entry).
    pub fn pump(&mut self) -> RuntimeResult<Vec<String>> {
        let mut errors = Vec::new();
        loop {
            let jobs = self.run_jobs()?;
            let settled = self.entry("settle", &Value::Null)?;
            let processed = settled.get("processed").and_then(Value::as_u64).unwrap_or(0);
            if let Some(list) = settled.get("errors").and_then(Value::as_array) {
                errors.extend(
                    list.iter()
                        .filter_map(|e| e.get("message").and_then(Value::as_str))
                        .map(normalize_message),
                );
            }
            if jobs == 0 && processed == 0 {
                return Ok(errors);
            }
        }
    }

    /// Whether the payload defines a `Provider` class.
    ///
    /// # Errors
    ///
    /// As [`entry`](Self::entry).
    pub fn has_provider_class(&mut self) -> RuntimeResult<bool> {
        Ok(self.entry("providerInfo", &Value::Null)?["hasClass"].as_bool().unwrap_or(false))
    }

    /// Construct the provider once to prove it can be.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidExtension`] with
    /// [`LoadErrorCode::ConstructorError`] if there is no `Provider` class or
    /// its constructor throws.
    pub fn check_provider(&mut self) -> RuntimeResult<()> {
        let info = self.entry("providerInfo", &json!({ "construct": true }))?;
        if info["hasClass"].as_bool() != Some(true) {
            return Err(RuntimeError::InvalidExtension {
                extension_id: self.extension_id.clone(),
                code: LoadErrorCode::ConstructorError,
                reason: "payload does not define a Provider class".into(),
            });
        }
        if let Some(message) = info["error"].as_str() {
            return Err(RuntimeError::InvalidExtension {
                extension_id: self.extension_id.clone(),
                code: LoadErrorCode::ConstructorError,
                reason: message.to_string(),
            });
        }
        Ok(())
    }

    /// Invoke `method` on a fresh provider instance and await its result.
    ///
    /// Promises are polled every `options.promise_poll` until `deadline`.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::MethodNotFound`] if the provider has no such method.
    /// - [`RuntimeError::ProviderPanic`] if the method throws synchronously.
    /// - [`RuntimeError::Rejected`] if its promise rejects.
    /// - [`RuntimeError::Timeout`] if the promise is still pending at `deadline`.
    pub fn call_provider(&mut self, method: &str, args: &[Value], deadline: Instant) -> RuntimeResult<Value> {
        let started = Instant::now();
        let start: ProviderStart = serde_json::from_value(
            self.entry("providerCall", &json!({ "method": method, "args": args }))?,
        )?;
        if start.missing {
            return Err(RuntimeError::MethodNotFound {
                extension_id: self.extension_id.clone(),
                method: method.to_string(),
            });
        }
        if let Some(panic) = start.panic {
            return Err(RuntimeError::ProviderPanic {
                context: format!("{}.{method}", self.extension_id),
                message: normalize_message(&panic.message),
            });
        }
        let Some(call) = start.call else {
            return Ok(start.value.unwrap_or(Value::Null));
        };

        let poll = self.host.options().promise_poll.max(Duration::from_millis(1));
        let outcome = loop {
            let _errors = self.pump()?;
            let status: ProviderStatus =
                serde_json::from_value(self.entry("providerStatus", &json!({ "call": call }))?)?;
            match status.status.as_str() {
                "fulfilled" => break Ok(status.value.unwrap_or(Value::Null)),
                "rejected" => {
                    break Err(RuntimeError::Rejected {
                        message: status.error.map(|e| e.message).unwrap_or_default(),
                    });
                },
                "missing" => break Err(RuntimeError::Internal(format!("provider call {call} vanished"))),
                _ => {},
            }
            let now = Instant::now();
            if now >= deadline {
                break Err(RuntimeError::Timeout {
                    operation: format!("{}.{method}", self.extension_id),
                    elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(poll.min(deadline.saturating_duration_since(now)));
        };
        if outcome.is_err() {
            let _ = self.entry("providerForget", &json!({ "call": call }));
        }
        outcome
    }

    /// Invoke the global function `name` with `args`, without awaiting.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Script`] if the function is missing or throws.
    pub fn invoke(&mut self, name: &str, args: &[Value]) -> RuntimeResult<Value> {
        self.entry("invoke", &json!({ "name": name, "args": args }))
    }

    /// Run a closure with the raw engine context. Reserved for tests and
    /// diagnostics.
    #[cfg(test)]
    pub(crate) fn with_ctx<R>(&self, f: impl for<'js> FnOnce(rquickjs::Ctx<'js>) -> R) -> R {
        self.context.with(f)
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.registry.shutdown();
        self.completions().set_waker(None);
        debug!(extension_id = %self.extension_id, "interpreter dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use harbor_capabilities::PathPlaceholders;
    use harbor_core::{PermissionManifest, Scope};

    fn interpreter(source: &str) -> Interpreter {
        Interpreter::new(InterpreterConfig::new("test-ext", source)).unwrap()
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[test]
    fn test_provider_roundtrip() {
        let mut it = interpreter(
            r#"class Provider { async search(q) { return [{ id: "a", title: q }]; } }"#,
        );
        let out = it.call_provider("search", &[json!("naruto")], far()).unwrap();
        assert_eq!(out, json!([{ "id": "a", "title": "naruto" }]));
    }

    #[test]
    fn test_rejection_and_missing_method() {
        let mut it = interpreter(r#"class Provider { async fn() { throw new Error("nope"); } }"#);
        let err = it.call_provider("fn", &[], far()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Script);
        assert!(err.to_string().contains("nope"));

        let err = it.call_provider("absent", &[], far()).unwrap_err();
        assert!(matches!(err, RuntimeError::MethodNotFound { .. }));
    }

    #[test]
    fn test_sync_throw_is_panic() {
        let mut it = interpreter(r#"class Provider { boom() { throw new Error("kaput"); } }"#);
        let err = it.call_provider("boom", &[], far()).unwrap_err();
        assert!(matches!(err, RuntimeError::ProviderPanic { ref message, .. } if message.contains("kaput")));
    }

    #[test]
    fn test_pending_promise_times_out() {
        let mut it = interpreter(r"class Provider { wait() { return new Promise(() => {}); } }");
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = it.call_provider("wait", &[], deadline).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_compilation_error() {
        let err = Interpreter::new(InterpreterConfig::new("broken", "class {")).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidExtension {
                code: LoadErrorCode::CompilationError,
                ..
            }
        ));
    }

    #[test]
    fn test_constructor_check() {
        let mut it = interpreter("function search() { return 1; }");
        assert!(!it.has_provider_class().unwrap());
        assert!(it.check_provider().is_err());

        let mut it = interpreter(r#"class Provider { constructor() { throw new Error("no"); } }"#);
        let err = it.check_provider().unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidExtension {
                code: LoadErrorCode::ConstructorError,
                ..
            }
        ));
    }

    #[test]
    fn test_missing_scope_is_reference_error() {
        let mut it = interpreter("");
        let err = it.eval("$os.tempDir()").unwrap_err();
        assert!(err.to_string().contains("$os is not defined"), "{err}");
        // Still usable afterwards.
        assert_eq!(it.eval("1 + 1").unwrap(), json!(2));
    }

    #[test]
    fn test_granted_scope_installs_globals() {
        let manifest = PermissionManifest {
            scopes: vec![Scope::System],
            ..Default::default()
        };
        let mut it = Interpreter::new(
            InterpreterConfig::new("sys", "")
                .with_gate(CapabilityGate::new(&manifest, &PathPlaceholders::default())),
        )
        .unwrap();
        assert_eq!(it.eval("typeof $os.tempDir").unwrap(), "function");
        assert_eq!(it.eval("typeof $filepath.join").unwrap(), "function");
        assert_eq!(it.eval("typeof $store").unwrap(), "undefined");
    }

    #[test]
    fn test_globals() {
        let mut it = interpreter("");
        assert_eq!(it.eval(r#"$toString($toBytes("héllo"))"#).unwrap(), "héllo");
        assert_eq!(it.eval(r#"$replace("a-b", "-", "+")"#).unwrap(), "a+b");
        assert_eq!(it.eval("crypto.randomUUID().length").unwrap(), 36);
        assert_eq!(
            it.eval(r#"new URLSearchParams({ q: "a b", n: 1 }).toString()"#).unwrap(),
            "q=a+b&n=1"
        );
        assert_eq!(
            it.eval(r#"new TextDecoder().decode(new TextEncoder().encode("ok"))"#).unwrap(),
            "ok"
        );
        let out = it
            .eval(
                r#"(() => {
                    const $ = LoadDoc('<ul><li class="a">One</li><li>Two</li></ul>');
                    return $("li").map((i, el) => el.text());
                })()"#,
            )
            .unwrap();
        assert_eq!(out, json!(["One", "Two"]));
    }

    #[test]
    fn test_interrupt_aborts_loop() {
        let mut it = interpreter("function spin() { for (;;) {} }");
        let handle = it.interrupt_handle();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.interrupt();
        });
        let err = it.invoke("spin", &[]).unwrap_err();
        t.join().unwrap();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        it.clear_interrupt();
        assert_eq!(it.eval("2 * 3").unwrap(), json!(6));
    }

    #[test]
    fn test_normalize_message() {
        assert_eq!(normalize_message("'$os' is not defined"), "$os is not defined");
        assert_eq!(normalize_message("boom"), "boom");
    }

    #[test]
    fn test_ctx_access() {
        let it = interpreter("var answer = 42;");
        let v: i32 = it.with_ctx(|ctx| ctx.globals().get("answer").unwrap());
        assert_eq!(v, 42);
    }
}
