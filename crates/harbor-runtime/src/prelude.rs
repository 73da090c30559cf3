//! Prelude module - commonly used types for convenient import.
//!
//! Use `use harbor_runtime::prelude::*;` to import all essential types.

pub use crate::provider::{
    CustomSourceProvider, MangaProvider, MediaPlayerProvider, OnlinestreamProvider, TorrentProvider,
};
pub use crate::{
    ErrorKind, HookOutcome, Interpreter, InterpreterConfig, Plugin, PoolManager, ProviderBridge, ProviderSpec,
    RuntimeError, RuntimeOptions, RuntimeResult, Services,
};
