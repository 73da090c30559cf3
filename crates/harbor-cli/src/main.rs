//! Harbor CLI - load, inspect and call extensions from a terminal.
//!
//! Every command loads an extension directory into a fresh bank, does its
//! work and unloads everything again before exiting.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use harbor_config::HostConfig;
use harbor_telemetry::{LogConfig, setup_logging};

mod commands;
mod host;

use commands::{OutputFormat, call, grant, hash, list, watch};

/// Harbor - extension host
#[derive(Parser)]
#[command(name = "harbor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output format: pretty (default) or json
    #[arg(long, global = true, default_value = "pretty")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an extension directory and list what loaded and what failed
    List {
        /// Extension directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Call a provider method and print the JSON result
    Call {
        /// Extension directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Extension id
        id: String,

        /// Method on the provider instance
        method: String,

        /// Arguments, each parsed as JSON (bare words become strings)
        args: Vec<String>,
    },

    /// Grant a plugin the permissions its manifest asks for
    Grant {
        /// Extension directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Extension id
        id: String,
    },

    /// Load an extension directory and reload manifests as they change
    Watch {
        /// Extension directory (defaults to the configured one)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Print the permission hash of a manifest file
    Hash {
        /// Manifest file
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = HostConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    let mut log_config = LogConfig::try_from(&config.logging).unwrap_or_default();
    if cli.verbose {
        log_config.level = "debug".to_string();
    }
    // Keeps the file appender flushing until exit.
    let _log_guard = match setup_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        },
    };

    let format = OutputFormat::parse(&cli.format);

    match cli.command {
        Commands::List { dir } => list::run(&config, dir, format).await,
        Commands::Call {
            dir,
            id,
            method,
            args,
        } => call::run(&config, dir, &id, &method, &args, format).await,
        Commands::Grant { dir, id } => grant::run(&config, dir, &id, format).await,
        Commands::Watch { dir } => watch::run(&config, dir, format).await,
        Commands::Hash { manifest } => hash::run(&manifest, format).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_with_args() {
        let cli = Cli::try_parse_from([
            "harbor", "call", "--dir", "/tmp/ext", "gogo", "search", "{\"query\":\"x\"}", "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Call {
                dir,
                id,
                method,
                args,
            } => {
                assert_eq!(dir, Some(PathBuf::from("/tmp/ext")));
                assert_eq!(id, "gogo");
                assert_eq!(method, "search");
                assert_eq!(args, vec!["{\"query\":\"x\"}", "7"]);
            },
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["harbor", "list", "--format", "json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, "json");
        assert!(matches!(cli.command, Commands::List { dir: None }));
    }

    #[test]
    fn test_hash_requires_manifest() {
        assert!(Cli::try_parse_from(["harbor", "hash"]).is_err());
    }
}
