//! `harbor call`

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use harbor_config::HostConfig;
use serde_json::Value;

use super::{OutputFormat, print_json};
use crate::host::Host;

/// Parse a command line argument as JSON, keeping bare words as strings.
pub(crate) fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub(crate) async fn run(
    config: &HostConfig,
    dir: Option<PathBuf>,
    id: &str,
    method: &str,
    args: &[String],
    format: OutputFormat,
) -> Result<()> {
    let host = Host::open(config, dir).await?;
    host.loader.load_all().await?;
    let result = call(&host, id, method, args).await;
    host.close().await;
    let value = result?;

    match format {
        OutputFormat::Json => print_json(&value),
        OutputFormat::Pretty => match value {
            Value::String(s) => {
                println!("{s}");
                Ok(())
            },
            other => print_json(&other),
        },
    }
}

async fn call(host: &Host, id: &str, method: &str, args: &[String]) -> Result<Value> {
    let Some(ext) = host.bank.get(id) else {
        if let Some(invalid) = host.loader.invalid(id) {
            bail!("extension '{id}' failed to load: {} ({})", invalid.reason, invalid.code);
        }
        bail!("extension '{id}' not found in {}", host.loader.dir().display());
    };
    let bridge = ext
        .bridge()
        .ok_or_else(|| anyhow!("extension '{id}' is not a script provider"))?;
    let args = args.iter().map(|a| parse_arg(a)).collect();
    bridge
        .call_raw(method, args)
        .await
        .with_context(|| format!("{id}.{method} failed"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arg() {
        assert_eq!(parse_arg("{\"query\":\"x\"}"), json!({"query": "x"}));
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg("\"quoted\""), json!("quoted"));
        assert_eq!(parse_arg("naruto"), json!("naruto"));
    }
}
