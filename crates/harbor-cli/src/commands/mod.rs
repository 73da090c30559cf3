//! Subcommand implementations.

pub(crate) mod call;
pub(crate) mod grant;
pub(crate) mod hash;
pub(crate) mod list;
pub(crate) mod watch;

use anyhow::Result;
use serde::Serialize;

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Pretty,
    Json,
}

impl OutputFormat {
    /// Anything but `json` means pretty.
    pub(crate) fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
