//! Runtime error types.

use std::fmt;

use harbor_capabilities::CapabilityError;
use harbor_core::LoadErrorCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by interpreters, pools, schedulers and host bindings.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A path, command or domain is outside the allow-list.
    #[error("{0}")]
    Unauthorized(#[from] CapabilityError),

    /// A deadline passed.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        /// What was being waited for.
        operation: String,
        /// Time waited.
        elapsed_ms: u64,
    },

    /// Host code panicked while serving a call.
    #[error("panic in {context}: {message}")]
    ProviderPanic {
        /// Method or job that panicked.
        context: String,
        /// Panic payload.
        message: String,
    },

    /// Arguments or results could not be converted.
    #[error("marshal error: {0}")]
    MarshalError(String),

    /// The extension cannot be loaded.
    #[error("invalid extension {extension_id} ({code}): {reason}")]
    InvalidExtension {
        /// Extension id.
        extension_id: String,
        /// Load failure code.
        code: LoadErrorCode,
        /// Human readable reason.
        reason: String,
    },

    /// The permission manifest hash does not match the granted hash.
    #[error("permissions of {extension_id} are not granted")]
    PermissionsNotGranted {
        /// Extension id.
        extension_id: String,
    },

    /// Every interpreter of the pool stayed busy until the deadline.
    #[error("interpreter pool of {extension_id} exhausted after {waited_ms}ms")]
    PoolExhausted {
        /// Extension id.
        extension_id: String,
        /// Time waited.
        waited_ms: u64,
    },

    /// The pool was cleaned up.
    #[error("interpreter pool of {extension_id} is closed")]
    PoolClosed {
        /// Extension id.
        extension_id: String,
    },

    /// The scheduler was stopped before the job ran.
    #[error("scheduler of {extension_id} is stopped")]
    SchedulerStopped {
        /// Extension id.
        extension_id: String,
    },

    /// An external system the binding depends on is unavailable.
    #[error("service unavailable: {0}")]
    ServiceDown(String),

    /// The provider object has no such method.
    #[error("method {method} not found on provider {extension_id}")]
    MethodNotFound {
        /// Extension id.
        extension_id: String,
        /// Requested method.
        method: String,
    },

    /// A promise returned by the script was rejected.
    #[error("promise rejected: {message}")]
    Rejected {
        /// Rejection reason.
        message: String,
    },

    /// The script threw.
    #[error("script error: {message}")]
    Script {
        /// Exception message.
        message: String,
    },

    /// The operation was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Invalid arguments passed to a host binding.
    #[error("invalid arguments for {operation}: {message}")]
    InvalidArgument {
        /// Binding operation.
        operation: String,
        /// What was wrong.
        message: String,
    },

    /// Filesystem or process failure.
    #[error("io error in {operation}: {source}")]
    Io {
        /// Binding operation.
        operation: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Interpreter engine failure outside script code.
    #[error("interpreter error: {0}")]
    Engine(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Flat classification of [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// See [`RuntimeError::Unauthorized`].
    Unauthorized,
    /// See [`RuntimeError::Timeout`].
    Timeout,
    /// See [`RuntimeError::ProviderPanic`].
    ProviderPanic,
    /// See [`RuntimeError::MarshalError`].
    MarshalError,
    /// See [`RuntimeError::InvalidExtension`].
    InvalidExtension,
    /// See [`RuntimeError::PermissionsNotGranted`].
    PermissionsNotGranted,
    /// Pool exhausted or closed.
    PoolExhausted,
    /// See [`RuntimeError::SchedulerStopped`].
    SchedulerStopped,
    /// See [`RuntimeError::ServiceDown`].
    ServiceDown,
    /// See [`RuntimeError::MethodNotFound`].
    MethodNotFound,
    /// Script exceptions and promise rejections.
    Script,
    /// See [`RuntimeError::Cancelled`].
    Cancelled,
    /// Bad arguments, IO, engine and internal failures.
    Other,
}

impl ErrorKind {
    /// Name sent to scripts as `error.kind`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::Timeout => "Timeout",
            Self::ProviderPanic => "ProviderPanic",
            Self::MarshalError => "MarshalError",
            Self::InvalidExtension => "InvalidExtension",
            Self::PermissionsNotGranted => "PermissionsNotGranted",
            Self::PoolExhausted => "PoolExhausted",
            Self::SchedulerStopped => "SchedulerStopped",
            Self::ServiceDown => "ServiceDown",
            Self::MethodNotFound => "MethodNotFound",
            Self::Script => "Script",
            Self::Cancelled => "Cancelled",
            Self::Other => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RuntimeError {
    /// Classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ProviderPanic { .. } => ErrorKind::ProviderPanic,
            Self::MarshalError(_) => ErrorKind::MarshalError,
            Self::InvalidExtension { .. } => ErrorKind::InvalidExtension,
            Self::PermissionsNotGranted { .. } => ErrorKind::PermissionsNotGranted,
            Self::PoolExhausted { .. } | Self::PoolClosed { .. } => ErrorKind::PoolExhausted,
            Self::SchedulerStopped { .. } => ErrorKind::SchedulerStopped,
            Self::ServiceDown(_) => ErrorKind::ServiceDown,
            Self::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            Self::Rejected { .. } | Self::Script { .. } => ErrorKind::Script,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::InvalidArgument { .. }
            | Self::Io { .. }
            | Self::Engine(_)
            | Self::Internal(_) => ErrorKind::Other,
        }
    }

    /// Shorthand for [`RuntimeError::InvalidArgument`].
    pub fn invalid_argument(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Shorthand for [`RuntimeError::Io`].
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Shorthand for [`RuntimeError::Script`].
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(e: serde_json::Error) -> Self {
        Self::MarshalError(e.to_string())
    }
}

impl From<harbor_storage::StorageError> for RuntimeError {
    fn from(e: harbor_storage::StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("unknown panic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = RuntimeError::Rejected {
            message: "nope".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Script);
        assert!(err.to_string().contains("nope"));

        let err = RuntimeError::from(CapabilityError::unauthorized("cmd", "open"));
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert!(err.to_string().contains("not authorized"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
