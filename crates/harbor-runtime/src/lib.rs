//! Harbor Runtime - sandboxed script execution for extensions.
//!
//! This crate provides:
//! - The embedded [`Interpreter`] with capability-gated host bindings
//! - Bounded interpreter [`Pool`]s, one per provider extension
//! - A single-worker [`Scheduler`] serialising all script work of a plugin
//! - Typed provider bridges ([`ProviderBridge`] and its flavors)
//! - The [`Plugin`] engine: state, effects, tray, webview, forms, DOM and
//!   command palette, driven by client events
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use harbor_runtime::{InterpreterConfig, Plugin};
//! use harbor_events::EventHub;
//!
//! # fn example() -> harbor_runtime::RuntimeResult<()> {
//! let hub = EventHub::new();
//! let bus = hub.register_plugin("my-plugin");
//! let config = InterpreterConfig::new("my-plugin", "$ui.register((ctx) => {});");
//! let plugin = Plugin::load(config, bus)?;
//! plugin.shutdown();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod host;
pub mod interpreter;
pub mod plugin;
pub mod prelude;
pub mod provider;

mod error;
mod options;
mod pool;
mod pool_manager;
mod scheduler;

pub use error::{ErrorKind, RuntimeError, RuntimeResult};
pub use host::{Args, Completions, HostContext, HostModule, Services};
pub use interpreter::{Interpreter, InterpreterConfig, InterruptHandle};
pub use options::RuntimeOptions;
pub use plugin::{HookOutcome, Plugin, UnloadHook};
pub use pool::{Initializer, Lease, Pool, PoolMetrics, Poolable};
pub use pool_manager::PoolManager;
pub use provider::{ProviderBridge, ProviderSpec};
pub use scheduler::{ErrorHandler, Scheduler};
