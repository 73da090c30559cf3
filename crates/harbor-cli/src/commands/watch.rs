//! `harbor watch`

use std::path::PathBuf;

use anyhow::Result;
use harbor_bank::BankChange;
use harbor_config::HostConfig;
use serde_json::{Value, json};
use tracing::info;

use super::{OutputFormat, print_json};
use crate::host::Host;

fn change_json(change: &BankChange) -> Value {
    match change {
        BankChange::Added(id) => json!({ "event": "added", "id": id }),
        BankChange::Removed(id) => json!({ "event": "removed", "id": id }),
        BankChange::CustomSourcesChanged => json!({ "event": "customSourcesChanged" }),
    }
}

fn print_change(change: &BankChange, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&change_json(change))?,
        OutputFormat::Pretty => match change {
            BankChange::Added(id) => println!("+ {id}"),
            BankChange::Removed(id) => println!("- {id}"),
            BankChange::CustomSourcesChanged => println!("~ custom sources"),
        },
    }
    Ok(())
}

pub(crate) async fn run(config: &HostConfig, dir: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let host = Host::open(config, dir).await?;
    let mut changes = host.bank.subscribe("cli");
    let report = host.loader.load_all().await?;
    info!(
        loaded = report.loaded.len(),
        invalid = report.invalid.len(),
        "Initial load finished"
    );
    let watcher = host.loader.watch(config.bank.watch_debounce())?;
    if format == OutputFormat::Pretty {
        println!("Watching {} (Ctrl-C to stop)", host.loader.dir().display());
    }

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Some(change) => print_change(&change, format)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watcher.abort();
    host.bank.unsubscribe("cli");
    host.close().await;
    Ok(())
}
