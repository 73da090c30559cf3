//! Recording host collaborators and logging for tests.

use std::sync::{Mutex, Once, PoisonError};

use harbor_runtime::RuntimeResult;
use harbor_runtime::host::Notifier;

/// A [`Notifier`] that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(extension_id, message)` pairs in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, extension_id: &str, message: &str) -> RuntimeResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((extension_id.to_string(), message.to_string()));
        Ok(())
    }
}

static LOGGING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier() {
        init_test_logging();
        let notifier = RecordingNotifier::new();
        notifier.notify("my-plugin", "hello").unwrap();
        assert_eq!(notifier.sent(), vec![("my-plugin".to_string(), "hello".to_string())]);
    }
}
