//! Per-call context for correlating extension activity in logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one host-initiated operation on an extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallContext {
    /// Unique id of this call.
    pub call_id: Uuid,
    /// Extension the call targets.
    pub extension_id: String,
    /// Extension kind (`anime-torrent-provider`, `plugin`, ...).
    pub kind: String,
    /// Method or event name.
    pub operation: String,
    /// When the call started.
    pub started_at: DateTime<Utc>,
}

impl CallContext {
    /// Start a new call context.
    #[must_use]
    pub fn new(
        extension_id: impl Into<String>,
        kind: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            extension_id: extension_id.into(),
            kind: kind.into(),
            operation: operation.into(),
            started_at: Utc::now(),
        }
    }

    /// Milliseconds since the call started.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        #[allow(clippy::arithmetic_side_effects)]
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_milliseconds()
    }

    /// Span carrying the call's identifying fields.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "extension_call",
            call_id = %self.call_id,
            extension_id = %self.extension_id,
            kind = %self.kind,
            operation = %self.operation,
        )
    }
}

/// Span for long-lived work owned by one extension (its scheduler, its pool).
#[must_use]
pub fn extension_span(extension_id: &str) -> tracing::Span {
    tracing::info_span!("extension", extension_id = %extension_id)
}

/// Enters a call span and logs the call duration on drop.
pub struct CallGuard {
    context: CallContext,
    _span: tracing::span::EnteredSpan,
}

impl CallGuard {
    /// Enter the span of `context`.
    #[must_use]
    pub fn new(context: CallContext) -> Self {
        let span = context.span().entered();
        tracing::trace!("call started");
        Self {
            context,
            _span: span,
        }
    }

    /// The wrapped context.
    #[must_use]
    pub fn context(&self) -> &CallContext {
        &self.context
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.context.elapsed_ms(), "call finished");
    }
}
