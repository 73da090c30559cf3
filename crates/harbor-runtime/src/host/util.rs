//! Always-available helpers: byte/string conversion, sleep, ids and the
//! completion drain.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use serde_json::{Value, json};

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

/// Largest buffer `util.randomBytes` hands out.
const MAX_RANDOM_BYTES: u64 = 65_536;

/// Decode a base64 argument.
pub(crate) fn decode_bytes(op: &str, encoded: &str) -> RuntimeResult<Vec<u8>> {
    STANDARD
        .decode(encoded)
        .map_err(|e| RuntimeError::invalid_argument(op, format!("invalid base64: {e}")))
}

/// Encode bytes for a script.
pub(crate) fn encode_bytes(bytes: &[u8]) -> Value {
    Value::String(STANDARD.encode(bytes))
}

pub(crate) struct UtilModule;

impl HostModule for UtilModule {
    fn namespace(&self) -> &'static str {
        "util"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        match method {
            "drain" => Ok(Value::Array(cx.completions().drain())),
            "toBytes" => Ok(encode_bytes(args.str(0)?.as_bytes())),
            "toString" => {
                let bytes = decode_bytes(args.op(), args.str(0)?)?;
                Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            },
            "replace" => Ok(Value::String(
                args.str(0)?.replace(args.str(1)?, args.str(2)?),
            )),
            "sleep" => {
                let requested = Duration::from_millis(args.u64(0)?);
                std::thread::sleep(requested.min(cx.options().call_timeout));
                Ok(Value::Null)
            },
            "uuid" => Ok(json!(uuid::Uuid::new_v4().to_string())),
            "randomBytes" => {
                let n = args.u64(0)?.min(MAX_RANDOM_BYTES);
                let mut buf = vec![0u8; usize::try_from(n).unwrap_or(0)];
                rand::thread_rng().fill_bytes(&mut buf);
                Ok(encode_bytes(&buf))
            },
            _ => Err(unknown_method("util", method)),
        }
    }
}
