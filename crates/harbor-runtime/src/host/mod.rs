//! Host bindings exposed to interpreters.
//!
//! Scripts reach the host through a single native function taking an
//! operation name (`namespace.method`) and a JSON argument array. Each
//! namespace is served by one [`HostModule`]. Modules are installed per
//! interpreter according to the extension's granted scopes, so a binding
//! that was never installed cannot be reached even by calling the native
//! function directly.
//!
//! Work that outlives the call (HTTP requests, downloads, timers, command
//! output) hands its result back through [`Completions`]; the interpreter
//! drains them on its own thread.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use harbor_capabilities::CapabilityGate;
use harbor_core::Scope;
use harbor_storage::KvStore;
use serde_json::{Value, json};
use tokio::runtime::Handle;
use tracing::{trace, warn};

use crate::error::{RuntimeError, RuntimeResult, panic_message};
use crate::options::RuntimeOptions;

pub mod archive;
pub mod command;
pub mod console;
pub mod document;
pub mod downloader;
pub mod fetch;
pub mod filepath;
pub mod fs;
pub mod notification;
pub mod services;
pub mod store;
pub mod util;

pub use services::{ExternalService, Notifier, Services};

// ---------------------------------------------------------------------------
// Module trait
// ---------------------------------------------------------------------------

/// One namespace of host operations.
pub trait HostModule: Send + Sync {
    /// Namespace prefix of the operations served (`fs`, `fetch`...).
    fn namespace(&self) -> &'static str;

    /// Serve `method` with the decoded argument array.
    ///
    /// # Errors
    ///
    /// Any error is rethrown inside the script with its [`kind`](RuntimeError::kind).
    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value>;

    /// Release background work (tasks, child processes). Called when the
    /// owning interpreter is dropped or its plugin stops.
    fn shutdown(&self) {}
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

/// Positional arguments of one host operation.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    op: &'a str,
    values: &'a [Value],
}

impl<'a> Args<'a> {
    /// Wrap the arguments of `op`.
    #[must_use]
    pub fn new(op: &'a str, values: &'a [Value]) -> Self {
        Self { op, values }
    }

    /// Operation name, for error messages.
    #[must_use]
    pub fn op(&self) -> &'a str {
        self.op
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Argument `i`, `null` when missing.
    #[must_use]
    pub fn value(&self, i: usize) -> &'a Value {
        self.values.get(i).unwrap_or(&Value::Null)
    }

    /// Arguments from `i` on.
    #[must_use]
    pub fn rest(&self, i: usize) -> &'a [Value] {
        self.values.get(i..).unwrap_or(&[])
    }

    fn missing(&self, i: usize, what: &str) -> RuntimeError {
        RuntimeError::invalid_argument(self.op, format!("argument {i} must be {what}"))
    }

    /// Required string argument.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidArgument`] if absent or not a string.
    pub fn str(&self, i: usize) -> RuntimeResult<&'a str> {
        self.value(i).as_str().ok_or_else(|| self.missing(i, "a string"))
    }

    /// Optional string argument.
    #[must_use]
    pub fn opt_str(&self, i: usize) -> Option<&'a str> {
        self.value(i).as_str()
    }

    /// Required non-negative integer argument.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidArgument`] if absent or not a non-negative number.
    pub fn u64(&self, i: usize) -> RuntimeResult<u64> {
        self.opt_u64(i).ok_or_else(|| self.missing(i, "a non-negative integer"))
    }

    /// Optional non-negative integer argument. Fractions are truncated.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn opt_u64(&self, i: usize) -> Option<u64> {
        let v = self.value(i);
        v.as_u64().or_else(|| {
            v.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u64)
        })
    }

    /// Boolean argument, `false` when absent.
    #[must_use]
    pub fn bool(&self, i: usize) -> bool {
        self.value(i).as_bool().unwrap_or(false)
    }

    /// Required array of strings.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidArgument`] unless every element is a string.
    pub fn strings(&self, i: usize) -> RuntimeResult<Vec<String>> {
        match self.value(i) {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| self.missing(i, "an array of strings")),
            _ => Err(self.missing(i, "an array of strings")),
        }
    }

    /// Decode argument `i` into `T`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidArgument`] if the shape does not match.
    pub fn decode<T: serde::de::DeserializeOwned>(&self, i: usize) -> RuntimeResult<T> {
        T::deserialize(self.value(i))
            .map_err(|e| RuntimeError::invalid_argument(self.op, format!("argument {i}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Completions
// ---------------------------------------------------------------------------

/// Called whenever a completion becomes ready.
pub type Waker = Arc<dyn Fn() + Send + Sync>;

/// Results and callback invocations waiting to be delivered to a script.
///
/// A *ticket* names one pending promise; a *callback* names a script
/// function registered for repeated invocation (watchers, timers).
#[derive(Default)]
pub struct Completions {
    queue: Mutex<VecDeque<Value>>,
    outstanding: AtomicUsize,
    next_ticket: AtomicU64,
    waker: RwLock<Option<Waker>>,
}

impl std::fmt::Debug for Completions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completions")
            .field("ready", &self.ready())
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl Completions {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the function called when something becomes ready.
    pub fn set_waker(&self, waker: Option<Waker>) {
        *self.waker.write().unwrap_or_else(PoisonError::into_inner) = waker;
    }

    fn wake(&self) {
        let waker = self
            .waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }

    fn push(&self, item: Value) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(item);
        self.wake();
    }

    /// Open a ticket for a promise the script is about to await.
    pub fn ticket(&self) -> u64 {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.next_ticket
            .fetch_add(1, Ordering::Relaxed)
            .saturating_add(1)
    }

    /// Settle a ticket.
    pub fn resolve(&self, ticket: u64, result: RuntimeResult<Value>) {
        let item = match result {
            Ok(value) => json!({ "ticket": ticket, "ok": value }),
            Err(e) => json!({ "ticket": ticket, "err": error_json(&e) }),
        };
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        self.push(item);
    }

    /// Invoke script callback `callback` with `args`.
    pub fn invoke(&self, callback: u64, args: Vec<Value>) {
        self.push(json!({ "callback": callback, "args": args }));
    }

    /// Invoke `callback` one last time and forget it.
    pub fn invoke_once(&self, callback: u64, args: Vec<Value>) {
        self.push(json!({ "callback": callback, "args": args, "release": true }));
    }

    /// Forget `callback` without invoking it.
    pub fn release(&self, callback: u64) {
        self.push(json!({ "callback": callback, "drop": true }));
    }

    /// Take everything ready, in arrival order.
    pub fn drain(&self) -> Vec<Value> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    /// Number of items ready for delivery.
    #[must_use]
    pub fn ready(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of tickets not yet settled.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Everything a host module may consult while serving a call.
pub struct HostContext {
    extension_id: String,
    gate: CapabilityGate,
    options: Arc<RuntimeOptions>,
    completions: Arc<Completions>,
    handle: Option<Handle>,
    services: Services,
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("extension_id", &self.extension_id)
            .field("scopes", &self.gate.scopes())
            .finish_non_exhaustive()
    }
}

impl HostContext {
    /// Create a context for one interpreter.
    #[must_use]
    pub fn new(
        extension_id: impl Into<String>,
        gate: CapabilityGate,
        options: Arc<RuntimeOptions>,
        services: Services,
        handle: Option<Handle>,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            gate,
            options,
            completions: Arc::new(Completions::new()),
            handle,
            services,
        }
    }

    /// Owning extension.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Compiled permissions.
    #[must_use]
    pub fn gate(&self) -> &CapabilityGate {
        &self.gate
    }

    /// Runtime limits.
    #[must_use]
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Completion queue of the interpreter.
    #[must_use]
    pub fn completions(&self) -> &Arc<Completions> {
        &self.completions
    }

    /// External collaborators.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Async runtime used for background work.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ServiceDown`] when the interpreter was built outside
    /// a Tokio runtime.
    pub fn handle(&self) -> RuntimeResult<&Handle> {
        self.handle
            .as_ref()
            .ok_or_else(|| RuntimeError::ServiceDown("no async runtime available".into()))
    }

    /// Run `future` to completion from interpreter code.
    ///
    /// # Errors
    ///
    /// As [`handle`](Self::handle), or [`RuntimeError::ProviderPanic`] if
    /// the future panicked.
    pub fn block_on<F>(&self, future: F) -> RuntimeResult<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let handle = self.handle()?;
        if Handle::try_current().is_err() {
            return Ok(handle.block_on(future));
        }
        // Blocking a thread that already belongs to the runtime is not
        // allowed, so drive the future from a scoped helper thread.
        std::thread::scope(|scope| {
            scope
                .spawn(|| handle.block_on(future))
                .join()
                .map_err(|p| RuntimeError::ProviderPanic {
                    context: "block_on".into(),
                    message: panic_message(p.as_ref()),
                })
        })
    }

    /// The key-value store behind `$storage`.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::ServiceDown`] if none was configured.
    pub fn kv_store(&self) -> RuntimeResult<Arc<dyn KvStore>> {
        self.services
            .kv_store()
            .ok_or_else(|| RuntimeError::ServiceDown("storage is not available".into()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The modules installed in one interpreter.
#[derive(Default)]
pub struct HostRegistry {
    modules: HashMap<&'static str, Arc<dyn HostModule>>,
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.modules.keys().collect();
        names.sort();
        f.debug_struct("HostRegistry").field("modules", &names).finish()
    }
}

impl HostRegistry {
    /// Modules every interpreter gets, plus those unlocked by the granted
    /// scopes.
    #[must_use]
    pub fn standard(cx: &HostContext) -> Self {
        let mut registry = Self::default();
        registry.install(Arc::new(util::UtilModule));
        registry.install(Arc::new(console::ConsoleModule));
        registry.install(Arc::new(fetch::FetchModule::new()));
        registry.install(Arc::new(document::DocumentModule::default()));
        registry.install(Arc::new(services::ServiceModule));
        if cx.gate().has_scope(&Scope::System) {
            registry.install(Arc::new(fs::FsModule::default()));
            registry.install(Arc::new(filepath::FilepathModule));
            registry.install(Arc::new(command::CommandModule::default()));
            registry.install(Arc::new(archive::ArchiveModule));
            registry.install(Arc::new(downloader::DownloaderModule::default()));
        }
        if cx.gate().has_scope(&Scope::Storage) {
            registry.install(Arc::new(store::StoreModule::default()));
            registry.install(Arc::new(store::StorageModule));
        }
        if cx.gate().has_scope(&Scope::Notification) {
            registry.install(Arc::new(notification::NotificationModule));
        }
        registry
    }

    /// Add (or replace) a module.
    pub fn install(&mut self, module: Arc<dyn HostModule>) {
        self.modules.insert(module.namespace(), module);
    }

    /// Whether `namespace` is installed.
    #[must_use]
    pub fn has(&self, namespace: &str) -> bool {
        self.modules.contains_key(namespace)
    }

    /// Serve one call and encode the outcome as `{"ok": v}` or
    /// `{"err": {"kind", "message"}}`.
    #[must_use]
    pub fn dispatch(&self, cx: &HostContext, op: &str, args_json: &str) -> String {
        let outcome = self.call(cx, op, args_json);
        let envelope = match outcome {
            Ok(value) => json!({ "ok": value }),
            Err(e) => {
                if matches!(e, RuntimeError::Unauthorized(_)) {
                    warn!(extension_id = %cx.extension_id(), op, error = %e, "host call denied");
                } else {
                    trace!(extension_id = %cx.extension_id(), op, error = %e, "host call failed");
                }
                json!({ "err": error_json(&e) })
            },
        };
        envelope.to_string()
    }

    fn call(&self, cx: &HostContext, op: &str, args_json: &str) -> RuntimeResult<Value> {
        let (namespace, method) = op
            .split_once('.')
            .ok_or_else(|| RuntimeError::invalid_argument(op, "operation must be namespace.method"))?;
        let module = self
            .modules
            .get(namespace)
            .ok_or_else(|| RuntimeError::script(format!("{namespace} is not available")))?;
        let values: Vec<Value> = if args_json.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(args_json)?
        };
        let args = Args::new(op, &values);
        std::panic::catch_unwind(AssertUnwindSafe(|| module.call(cx, method, &args))).unwrap_or_else(
            |p| {
                Err(RuntimeError::ProviderPanic {
                    context: op.to_string(),
                    message: panic_message(p.as_ref()),
                })
            },
        )
    }

    /// Shut every module down.
    pub fn shutdown(&self) {
        for module in self.modules.values() {
            module.shutdown();
        }
    }
}

/// Error as seen by scripts.
#[must_use]
pub fn error_json(e: &RuntimeError) -> Value {
    json!({ "kind": e.kind().as_str(), "message": e.to_string() })
}

pub(crate) fn unknown_method(namespace: &str, method: &str) -> RuntimeError {
    RuntimeError::script(format!("{namespace}.{method} is not a function"))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use harbor_capabilities::PathPlaceholders;
    use harbor_core::PermissionManifest;

    /// Context granting `manifest`, bound to the current runtime if any.
    pub(crate) fn context(manifest: &PermissionManifest) -> HostContext {
        HostContext::new(
            "test-ext",
            CapabilityGate::new(manifest, &PathPlaceholders::default()),
            Arc::new(RuntimeOptions::default()),
            Services::default(),
            Handle::try_current().ok(),
        )
    }

    /// Call `op` through a one-module registry.
    pub(crate) fn call(
        module: Arc<dyn HostModule>,
        cx: &HostContext,
        op: &str,
        args: Value,
    ) -> RuntimeResult<Value> {
        let mut registry = HostRegistry::default();
        registry.install(module);
        registry.call(cx, op, &args.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::PermissionManifest;

    #[test]
    fn test_completions_ticket_accounting() {
        let c = Completions::new();
        let woken = Arc::new(AtomicUsize::new(0));
        let w = Arc::clone(&woken);
        c.set_waker(Some(Arc::new(move || {
            w.fetch_add(1, Ordering::SeqCst);
        })));
        let t1 = c.ticket();
        let t2 = c.ticket();
        assert_ne!(t1, t2);
        assert_eq!(c.outstanding(), 2);
        c.resolve(t1, Ok(json!(1)));
        c.resolve(t2, Err(RuntimeError::script("bad")));
        c.invoke(7, vec![json!("x")]);
        assert_eq!(c.outstanding(), 0);
        assert_eq!(woken.load(Ordering::SeqCst), 3);
        let items = c.drain();
        assert_eq!(items[0], json!({"ticket": t1, "ok": 1}));
        assert_eq!(items[1]["err"]["kind"], "Script");
        assert_eq!(items[2], json!({"callback": 7, "args": ["x"]}));
        assert_eq!(c.ready(), 0);
    }

    #[test]
    fn test_dispatch_envelopes() {
        let cx = testing::context(&PermissionManifest::default());
        let registry = HostRegistry::standard(&cx);
        assert!(!registry.has("fs"));
        let ok: Value = serde_json::from_str(&registry.dispatch(&cx, "util.toBytes", r#"["hi"]"#)).unwrap();
        assert_eq!(ok["ok"], "aGk=");
        let err: Value = serde_json::from_str(&registry.dispatch(&cx, "fs.readFile", r#"["/x"]"#)).unwrap();
        assert!(err["err"]["message"].as_str().unwrap().contains("fs is not available"));
        let err: Value = serde_json::from_str(&registry.dispatch(&cx, "nodot", "[]")).unwrap();
        assert_eq!(err["err"]["kind"], "Error");
    }

    #[test]
    fn test_args_helpers() {
        let values = vec![json!("a"), json!(3.9), json!(["x", "y"]), json!(true)];
        let args = Args::new("t.op", &values);
        assert_eq!(args.str(0).unwrap(), "a");
        assert_eq!(args.u64(1).unwrap(), 3);
        assert_eq!(args.strings(2).unwrap(), vec!["x", "y"]);
        assert!(args.bool(3));
        assert!(args.str(9).is_err());
        assert_eq!(args.rest(2).len(), 2);
    }
}
