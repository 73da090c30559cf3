//! `console.*` forwarded to `tracing`.

use serde_json::Value;
use tracing::{debug, error, info, trace, warn};

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::RuntimeResult;

pub(crate) struct ConsoleModule;

impl HostModule for ConsoleModule {
    fn namespace(&self) -> &'static str {
        "console"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        let message = args.opt_str(0).unwrap_or_default();
        let extension_id = cx.extension_id();
        match method {
            "log" | "info" => info!(target: "harbor::script", extension_id, "{message}"),
            "warn" => warn!(target: "harbor::script", extension_id, "{message}"),
            "error" => error!(target: "harbor::script", extension_id, "{message}"),
            "debug" => debug!(target: "harbor::script", extension_id, "{message}"),
            "trace" => trace!(target: "harbor::script", extension_id, "{message}"),
            _ => return Err(unknown_method("console", method)),
        }
        Ok(Value::Null)
    }
}
