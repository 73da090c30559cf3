//! Harbor Bank - the registry of loaded extensions.
//!
//! This crate provides:
//! - The [`Bank`], a concurrent id to [`Extension`] map with `added` and
//!   `removed` signals and named [`BankSubscriber`]s
//! - The [`Loader`], which validates manifests, substitutes user
//!   configuration, checks granted permissions and compiles payloads
//! - Persistent [`PluginSettingsStore`] and [`UserConfigStore`]
//! - Custom-source identifiers ([`IdentifierAllocator`])
//! - Hot reload of the extension directory (feature `watch`)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use harbor_bank::{Bank, Loader};
//! use harbor_storage::MemoryKvStore;
//!
//! # async fn example() -> harbor_bank::BankResult<()> {
//! let bank = Arc::new(Bank::default());
//! let loader = Loader::new("/path/to/extensions", Arc::clone(&bank), Arc::new(MemoryKvStore::new()))?;
//! let report = loader.load_all().await?;
//! println!("loaded {} extensions, {} invalid", report.loaded.len(), report.invalid.len());
//! let provider = bank.manga_provider("my-manga-source")?;
//! # let _ = provider;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;
pub mod settings;
#[cfg(feature = "watch")]
pub mod watcher;

mod bank;
mod error;
mod extension;
mod identifiers;
mod loader;

pub use bank::{Bank, BankChange, BankSubscriber, DEFAULT_SIGNAL_CAPACITY};
pub use error::{BankError, BankResult};
pub use extension::{Extension, ExtensionHandle};
pub use identifiers::IdentifierAllocator;
pub use loader::{InvalidExtension, LoadReport, Loader};
pub use settings::{PluginSettings, PluginSettingsStore, UserConfigStore};
#[cfg(feature = "watch")]
pub use watcher::{ExtensionWatcher, WatchEvent, WatcherConfig};
