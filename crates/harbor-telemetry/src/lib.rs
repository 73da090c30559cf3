//! Harbor Telemetry - logging setup and extension call spans.
//!
//! This crate provides:
//! - Subscriber setup with selectable format and target
//! - Per-call contexts that tag log lines with the extension and operation
//!
//! # Example
//!
//! ```rust,no_run
//! use harbor_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), harbor_telemetry::TelemetryError> {
//! let _guard = setup_logging(
//!     &LogConfig::new("info")
//!         .with_format(LogFormat::Json)
//!         .with_directive("harbor_runtime=debug"),
//! )?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::{CallContext, CallGuard, extension_span};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
