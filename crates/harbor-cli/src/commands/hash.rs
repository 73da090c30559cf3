//! `harbor hash`

use std::path::Path;

use anyhow::{Context, Result};
use harbor_core::{ExtensionManifest, permission_hash};
use serde_json::json;

use super::{OutputFormat, print_json};

/// Extension id and permission hash of the manifest at `path`.
pub(crate) async fn manifest_hash(path: &Path) -> Result<(String, String)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let manifest =
        ExtensionManifest::from_json(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    let hash = permission_hash(&manifest.permissions_or_default());
    Ok((manifest.id, hash))
}

pub(crate) async fn run(path: &Path, format: OutputFormat) -> Result<()> {
    let (id, hash) = manifest_hash(path).await?;
    match format {
        OutputFormat::Json => print_json(&json!({ "id": id, "hash": hash }))?,
        OutputFormat::Pretty => println!("{hash}"),
    }
    Ok(())
}
