//! Commonly used telemetry types.
//!
//! ```rust,no_run
//! use harbor_telemetry::prelude::*;
//!
//! # fn main() -> TelemetryResult<()> {
//! let _guard = setup_logging(&LogConfig::new("debug").with_format(LogFormat::Pretty))?;
//! let _call = CallGuard::new(CallContext::new("nyaa", "anime-torrent-provider", "search"));
//! tracing::info!("searching");
//! # Ok(())
//! # }
//! ```

pub use crate::{TelemetryError, TelemetryResult};

pub use crate::{LogConfig, LogFormat, LogTarget};

pub use crate::{setup_default_logging, setup_logging};

pub use crate::{CallContext, CallGuard, extension_span};
