//! `harbor list`

use std::path::PathBuf;

use anyhow::Result;
use harbor_bank::{Bank, InvalidExtension, LoadReport};
use harbor_config::HostConfig;
use harbor_core::{ExtensionType, Language};
use harbor_runtime::provider::BaseExtension;
use serde::Serialize;

use super::{OutputFormat, print_json};
use crate::host::Host;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadedRow {
    id: String,
    name: String,
    version: String,
    extension_type: Option<ExtensionType>,
    language: Option<Language>,
    builtin: bool,
}

#[derive(Debug, Serialize)]
struct Listing {
    loaded: Vec<LoadedRow>,
    invalid: Vec<InvalidExtension>,
}

fn listing(bank: &Bank, report: LoadReport) -> Listing {
    let mut loaded = Vec::new();
    bank.range(|id, ext| {
        let manifest = ext.manifest();
        loaded.push(LoadedRow {
            id: id.to_string(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            extension_type: manifest.extension_type,
            language: manifest.language,
            builtin: ext.is_builtin(),
        });
        true
    });
    loaded.sort_by(|a, b| a.id.cmp(&b.id));
    let mut invalid = report.invalid;
    invalid.sort_by(|a, b| a.id.cmp(&b.id));
    Listing { loaded, invalid }
}

pub(crate) async fn run(config: &HostConfig, dir: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let host = Host::open(config, dir).await?;
    let report = host.loader.load_all().await?;
    let listing = listing(&host.bank, report);

    match format {
        OutputFormat::Json => print_json(&listing)?,
        OutputFormat::Pretty => {
            println!("Loaded ({})", listing.loaded.len());
            for row in &listing.loaded {
                let kind = row.extension_type.map_or("-", ExtensionType::as_str);
                println!("  {:<28} {:<28} {}", row.id, kind, row.version);
            }
            if !listing.invalid.is_empty() {
                println!("Invalid ({})", listing.invalid.len());
                for row in &listing.invalid {
                    println!("  {:<28} {:<28} {}", row.id, row.code, row.reason);
                }
            }
        },
    }

    host.close().await;
    Ok(())
}
