//! Capability error types.

use thiserror::Error;

/// Errors raised when an extension touches a resource it was not granted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The resource is outside the extension's allow-lists.
    #[error("{operation}: {resource} not authorized{}", reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    Unauthorized {
        /// Binding that was called, e.g. `$os.readFile`.
        operation: String,
        /// Path, command line, or URL that was refused.
        resource: String,
        /// Extra detail for the log.
        reason: Option<String>,
    },

    /// The manifest does not declare the scope a binding needs.
    #[error("scope {scope:?} not granted")]
    MissingScope {
        /// The missing scope.
        scope: String,
    },

    /// An allow-list entry could not be compiled.
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern {
        /// The offending entry.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl CapabilityError {
    /// Build an [`Unauthorized`](Self::Unauthorized) error.
    #[must_use]
    pub fn unauthorized(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::Unauthorized {
            operation: operation.into(),
            resource: resource.into(),
            reason: None,
        }
    }
}

/// Result type for capability checks.
pub type CapabilityResult<T> = Result<T, CapabilityError>;
