//! `harbor grant`

use std::path::PathBuf;

use anyhow::{Context, Result};
use harbor_config::HostConfig;
use serde_json::json;

use super::{OutputFormat, print_json};
use crate::host::Host;

pub(crate) async fn run(config: &HostConfig, dir: Option<PathBuf>, id: &str, format: OutputFormat) -> Result<()> {
    let host = Host::open(config, dir).await?;
    host.loader.load_all().await?;
    let granted = host
        .loader
        .grant_permissions(id)
        .await
        .with_context(|| format!("failed to grant permissions to '{id}'"));
    let loaded = host.bank.contains(id);
    host.close().await;
    let hash = granted?;

    match format {
        OutputFormat::Json => print_json(&json!({ "id": id, "hash": hash, "loaded": loaded }))?,
        OutputFormat::Pretty => println!("Granted {id} ({hash})"),
    }
    Ok(())
}
