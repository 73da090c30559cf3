//! Prelude module - commonly used types for convenient import.
//!
//! Use `use harbor_bank::prelude::*;` to import all essential types.

pub use crate::{
    Bank, BankChange, BankError, BankResult, Extension, ExtensionHandle, InvalidExtension, LoadReport, Loader,
    PluginSettingsStore, UserConfigStore,
};
