//! Provider call bridge.
//!
//! A provider extension is a payload defining `class Provider`. Every call
//! leases an interpreter from the extension's pool, constructs a fresh
//! provider instance, awaits the returned promise by polling and hands the
//! interpreter back, whatever the outcome.

pub mod flavors;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use harbor_capabilities::CapabilityGate;
use harbor_telemetry::CallContext;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{Instrument, debug, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::host::Services;
use crate::interpreter::{Interpreter, InterpreterConfig};
use crate::options::RuntimeOptions;
use crate::pool::{Initializer, Pool};
use crate::pool_manager::PoolManager;

pub use flavors::{
    BaseExtension, CustomSourceProvider, JsCustomSourceProvider, JsMangaProvider, JsMediaPlayerProvider,
    JsOnlinestreamProvider, JsTorrentProvider, MangaProvider, MediaPlayerProvider, OnlinestreamProvider,
    TorrentProvider,
};

/// Serialize one call argument.
///
/// # Errors
///
/// [`RuntimeError::MarshalError`] if `value` does not serialize.
pub fn arg<T: Serialize + ?Sized>(value: &T) -> RuntimeResult<Value> {
    serde_json::to_value(value).map_err(|e| RuntimeError::MarshalError(e.to_string()))
}

/// Everything needed to build interpreters for one provider extension.
#[derive(Clone)]
pub struct ProviderSpec {
    extension_id: String,
    version: String,
    source: String,
    gate: CapabilityGate,
    options: Arc<RuntimeOptions>,
    services: Services,
    handle: Option<Handle>,
}

impl std::fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("extension_id", &self.extension_id)
            .field("version", &self.version)
            .field("source_len", &self.source.len())
            .finish_non_exhaustive()
    }
}

impl ProviderSpec {
    /// Spec for `source` owned by `extension_id`, with no permissions.
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
        }
    }

    /// Version reported to the script.
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

    /// Async runtime for background host work.
    #[must_use]
    pub fn with_handle(mut self, handle: Option<Handle>) -> Self {
        self.handle = handle;
        self
    }

    /// Owning extension.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// Build one interpreter.
    ///
    /// # Errors
    ///
    /// As [`Interpreter::new`].
    pub fn build(&self) -> RuntimeResult<Interpreter> {
        Interpreter::new(
            InterpreterConfig::new(self.extension_id.clone(), self.source.clone())
                .with_version(self.version.clone())
                .with_gate(self.gate.clone())
                .with_options(Arc::clone(&self.options))
                .with_services(self.services.clone())
                .with_handle(self.handle.clone()),
        )
    }

    /// Build one interpreter and prove `new Provider()` succeeds.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidExtension`] with `CompilationError` or
    /// `ConstructorError`.
    pub fn compile(&self) -> RuntimeResult<Interpreter> {
        let mut interpreter = self.build()?;
        interpreter.check_provider()?;
        Ok(interpreter)
    }

    fn initializer(&self) -> Initializer<Interpreter> {
        let spec = self.clone();
        Arc::new(move || spec.build())
    }
}

/// Typed request/response access to one provider extension.
#[derive(Clone)]
pub struct ProviderBridge {
    extension_id: String,
    pool: Arc<Pool<Interpreter>>,
    options: Arc<RuntimeOptions>,
}

impl std::fmt::Debug for ProviderBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBridge")
            .field("extension_id", &self.extension_id)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl ProviderBridge {
    /// Compile `spec` once, register its pool with `pools` and seed it with
    /// the compiled interpreter. Blocks while compiling.
    ///
    /// # Errors
    ///
    /// As [`ProviderSpec::compile`].
    pub fn load(spec: &ProviderSpec, pools: &PoolManager<Interpreter>) -> RuntimeResult<Self> {
        let compiled = spec.compile()?;
        // A reload gets a fresh pool. The previous bridge keeps serving from
        // its own pool until its extension is torn down.
        let pool = pools.replace(spec.extension_id(), || spec.initializer());
        if !pool.seed(compiled) {
            debug!(extension_id = %spec.extension_id(), "compiled interpreter not seeded");
        }
        Ok(Self::new(spec.extension_id(), pool, Arc::clone(&spec.options)))
    }

    /// Bridge over an existing pool.
    #[must_use]
    pub fn new(extension_id: impl Into<String>, pool: Arc<Pool<Interpreter>>, options: Arc<RuntimeOptions>) -> Self {
        Self {
            extension_id: extension_id.into(),
            pool,
            options,
        }
    }

    /// Owning extension.
    #[must_use]
    pub fn extension_id(&self) -> &str {
        &self.extension_id
    }

    /// The interpreter pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<Pool<Interpreter>> {
        &self.pool
    }

    /// Invoke `method` within the configured call timeout.
    ///
    /// # Errors
    ///
    /// See [`call_raw_within`](Self::call_raw_within).
    pub async fn call_raw(&self, method: &str, args: Vec<Value>) -> RuntimeResult<Value> {
        self.call_raw_within(method, args, self.options.call_timeout).await
    }

    /// Invoke `method`, giving up after `timeout` overall.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::PoolExhausted`] / [`RuntimeError::PoolClosed`] when no
    ///   interpreter can be leased.
    /// - [`RuntimeError::MethodNotFound`], [`RuntimeError::ProviderPanic`],
    ///   [`RuntimeError::Rejected`], [`RuntimeError::Timeout`] from the call.
    pub async fn call_raw_within(&self, method: &str, args: Vec<Value>, timeout: Duration) -> RuntimeResult<Value> {
        let context = CallContext::new(self.extension_id.clone(), "provider", method.to_string());
        let span = context.span();
        async move {
            let started = Instant::now();
            let deadline = started.checked_add(timeout).unwrap_or(started);
            let lease = self.pool.get(self.options.acquire_timeout.min(timeout)).await?;
            let method_name = method.to_string();
            let (lease, result) = tokio::task::spawn_blocking(move || {
                let mut lease = lease;
                let result = lease.call_provider(&method_name, &args, deadline);
                (lease, result)
            })
            .await
            .map_err(|e| RuntimeError::ProviderPanic {
                context: format!("{}.{method}", self.extension_id),
                message: e.to_string(),
            })?;
            match &result {
                Err(RuntimeError::Cancelled(_)) => lease.discard(),
                _ => drop(lease),
            }
            match &result {
                Ok(_) => debug!(elapsed_ms = context.elapsed_ms(), "provider call finished"),
                Err(e) => warn!(elapsed_ms = context.elapsed_ms(), error = %e, "provider call failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Invoke `method` and decode the result into `R`.
    ///
    /// # Errors
    ///
    /// As [`call_raw`](Self::call_raw), plus [`RuntimeError::MarshalError`] if
    /// the result does not fit `R`.
    pub async fn call<R: DeserializeOwned>(&self, method: &str, args: Vec<Value>) -> RuntimeResult<R> {
        let raw = self.call_raw(method, args).await?;
        serde_json::from_value(raw)
            .map_err(|e| RuntimeError::MarshalError(format!("{}.{method} result: {e}", self.extension_id)))
    }

    /// Close the pool and interrupt its interpreters.
    pub fn shutdown(&self) {
        self.pool.cleanup();
    }
}
