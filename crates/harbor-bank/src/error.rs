//! Bank error types.

use std::path::PathBuf;

use harbor_core::{CoreError, LoadErrorCode};
use harbor_runtime::RuntimeError;
use harbor_storage::StorageError;
use thiserror::Error;

/// Errors raised by the bank, the loader and the settings stores.
#[derive(Debug, Error)]
pub enum BankError {
    /// No extension is registered under this id.
    #[error("extension not found: {0}")]
    NotFound(String),

    /// The extension exists but is not of the requested kind.
    #[error("extension {id} is a {actual}, not a {expected}")]
    WrongType {
        /// Extension id.
        id: String,
        /// Kind the caller asked for.
        expected: &'static str,
        /// Kind actually registered.
        actual: &'static str,
    },

    /// The extension could not be loaded and was recorded as invalid.
    #[error("extension {id} is invalid ({code}): {reason}")]
    Invalid {
        /// Extension id, or the manifest file name when no id was readable.
        id: String,
        /// Load failure code.
        code: LoadErrorCode,
        /// Human readable reason.
        reason: String,
    },

    /// Manifest validation or user-config resolution failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Building or tearing down the runtime of an extension failed.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// A settings store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Reading or writing a manifest file failed.
    #[error("io error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A blocking load or teardown task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(String),

    /// The directory watcher failed.
    #[error("watcher error: {0}")]
    Watch(String),
}

impl BankError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn task(err: &tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result type for bank operations.
pub type BankResult<T> = Result<T, BankError>;
