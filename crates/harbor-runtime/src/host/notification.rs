//! `$notification.send` (`notification` scope).

use serde_json::Value;
use tracing::debug;

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

pub(crate) struct NotificationModule;

impl HostModule for NotificationModule {
    fn namespace(&self) -> &'static str {
        "notification"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        if method != "send" {
            return Err(unknown_method("notification", method));
        }
        let message = args.str(0)?;
        let notifier = cx
            .services()
            .notifier()
            .ok_or_else(|| RuntimeError::ServiceDown("notifier is not available".into()))?;
        debug!(extension_id = %cx.extension_id(), "notification");
        notifier.notify(cx.extension_id(), message)?;
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Notifier, Services, testing};
    use crate::options::RuntimeOptions;
    use harbor_capabilities::CapabilityGate;
    use harbor_core::PermissionManifest;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, String)>>);

    impl Notifier for Recorder {
        fn notify(&self, extension_id: &str, message: &str) -> RuntimeResult<()> {
            self.0.lock().unwrap().push((extension_id.into(), message.into()));
            Ok(())
        }
    }

    #[test]
    fn test_send_routes_to_notifier() {
        let recorder = Arc::new(Recorder::default());
        let cx = HostContext::new(
            "notify-ext",
            CapabilityGate::deny_all(),
            Arc::new(RuntimeOptions::default()),
            Services::new().with_notifier(recorder.clone()),
            None,
        );
        testing::call(Arc::new(NotificationModule), &cx, "notification.send", json!(["done"])).unwrap();
        assert_eq!(recorder.0.lock().unwrap()[0], ("notify-ext".into(), "done".into()));
    }

    #[test]
    fn test_send_without_notifier() {
        let cx = testing::context(&PermissionManifest::default());
        let err = testing::call(Arc::new(NotificationModule), &cx, "notification.send", json!(["x"]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ServiceDown);
    }
}
