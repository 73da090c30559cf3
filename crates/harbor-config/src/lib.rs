#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Layered configuration for the Harbor extension host.
//!
//! # Usage
//!
//! ```rust,no_run
//! use harbor_config::HostConfig;
//!
//! let config = HostConfig::load(None).unwrap();
//! println!("pool capacity: {}", config.runtime.pool_capacity);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`HARBOR_*`)
//! 2. **User file** (explicit path, or `<config_dir>/harbor/config.toml`)
//! 3. **Embedded defaults** (`defaults.toml` compiled into the binary)

/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use types::*;

impl HostConfig {
    /// Load configuration with the full precedence chain.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any layer is malformed or the final
    /// configuration fails validation.
    pub fn load(explicit: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(explicit)
    }

    /// Parse a configuration from TOML text layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] on parse or validation failure.
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        let overlay: toml::Value = toml::from_str(text).map_err(|e| ConfigError::ParseError {
            path: "<inline>".to_owned(),
            source: e,
        })?;
        let mut base = toml::Value::try_from(Self::default()).map_err(|e| {
            ConfigError::ValidationError {
                field: "<defaults>".to_owned(),
                message: e.to_string(),
            }
        })?;
        loader::deep_merge(&mut base, &overlay);
        let config: Self = base
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<inline>".to_owned(),
                source: e,
            })?;
        validate::validate(&config)?;
        Ok(config)
    }
}
