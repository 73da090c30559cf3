//! Command allow-lists.
//!
//! A command is authorized when some scope names the same executable and
//! its argument rules accept the provided arguments position by position.

use std::path::Path;

use harbor_core::{ArgRule, CommandScope};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{CapabilityError, CapabilityResult};
use crate::paths::{AccessMode, PathPolicy};

#[derive(Debug, Clone)]
enum CompiledRule {
    Literal(String),
    Path,
    Any,
    Rest,
    Pattern(Regex),
    Never,
}

#[derive(Debug, Clone)]
struct CompiledScope {
    command: String,
    rules: Vec<CompiledRule>,
}

/// Compiled command scopes of one extension.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    scopes: Vec<CompiledScope>,
}

impl CommandPolicy {
    /// Compile the manifest's command scopes.
    ///
    /// Validator patterns are anchored to the whole argument. A pattern
    /// that fails to compile turns its position into a rule that never
    /// matches.
    #[must_use]
    pub fn new(scopes: &[CommandScope]) -> Self {
        let scopes = scopes
            .iter()
            .map(|scope| CompiledScope {
                command: scope.command.clone(),
                rules: scope
                    .args
                    .iter()
                    .map(|arg| match arg.rule() {
                        ArgRule::Literal(v) => CompiledRule::Literal(v),
                        ArgRule::Path => CompiledRule::Path,
                        ArgRule::Any => CompiledRule::Any,
                        ArgRule::Rest => CompiledRule::Rest,
                        ArgRule::Pattern(p) => match Regex::new(&format!("^(?:{p})$")) {
                            Ok(re) => CompiledRule::Pattern(re),
                            Err(e) => {
                                warn!(command = %scope.command, pattern = %p, error = %e, "invalid argument validator");
                                CompiledRule::Never
                            },
                        },
                        ArgRule::Invalid => CompiledRule::Never,
                    })
                    .collect(),
            })
            .collect();
        Self { scopes }
    }

    /// Whether no command is allowed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Whether `name args...` is allowed. `$PATH` arguments are checked
    /// against `paths` in either mode.
    #[must_use]
    pub fn is_allowed(&self, name: &str, args: &[String], paths: &PathPolicy) -> bool {
        self.scopes
            .iter()
            .filter(|s| s.command == name)
            .any(|s| accepts(&s.rules, args, paths))
    }

    /// Authorize a command for `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unauthorized`] naming the full command line.
    pub fn check(
        &self,
        operation: &str,
        name: &str,
        args: &[String],
        paths: &PathPolicy,
    ) -> CapabilityResult<()> {
        if self.is_allowed(name, args, paths) {
            return Ok(());
        }
        let line = std::iter::once(name)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        debug!(operation, command = %line, "command refused");
        Err(CapabilityError::unauthorized(
            operation,
            format!("command ({line})"),
        ))
    }
}

fn accepts(rules: &[CompiledRule], args: &[String], paths: &PathPolicy) -> bool {
    let mut remaining = args.iter();
    for rule in rules {
        if matches!(rule, CompiledRule::Rest) {
            return true;
        }
        let Some(arg) = remaining.next() else {
            return false;
        };
        let ok = match rule {
            CompiledRule::Literal(v) => v == arg,
            CompiledRule::Path => {
                !arg.is_empty()
                    && (paths.is_allowed(Path::new(arg), AccessMode::Read)
                        || paths.is_allowed(Path::new(arg), AccessMode::Write))
            },
            CompiledRule::Any => true,
            CompiledRule::Pattern(re) => re.is_match(arg),
            CompiledRule::Rest | CompiledRule::Never => false,
        };
        if !ok {
            return false;
        }
    }
    remaining.next().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::PathPlaceholders;
    use harbor_core::CommandArg;

    fn scope(command: &str, args: Vec<CommandArg>) -> CommandScope {
        CommandScope {
            description: None,
            command: command.into(),
            args,
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    fn paths() -> PathPolicy {
        PathPolicy::new(&strings(&["/data/**"]), &[], &PathPlaceholders::default())
    }

    #[test]
    fn test_literal_and_path_rules() {
        let policy = CommandPolicy::new(&[scope(
            "ls",
            vec![CommandArg::literal("-la"), CommandArg::validator("$PATH")],
        )]);
        let p = paths();
        assert!(policy.is_allowed("ls", &strings(&["-la", "/data/x"]), &p));
        assert!(!policy.is_allowed("ls", &strings(&["-l", "/data/x"]), &p));
        assert!(!policy.is_allowed("ls", &strings(&["-la", "/etc"]), &p));
        assert!(!policy.is_allowed("ls", &strings(&["-la"]), &p));
        assert!(!policy.is_allowed("ls", &strings(&["-la", "/data/x", "extra"]), &p));
        assert!(!policy.is_allowed("cat", &strings(&["-la", "/data/x"]), &p));
    }

    #[test]
    fn test_any_and_rest() {
        let policy = CommandPolicy::new(&[
            scope("echo", vec![CommandArg::validator("$ANY")]),
            scope("git", vec![CommandArg::literal("log"), CommandArg::validator("$ARGS")]),
        ]);
        let p = paths();
        assert!(policy.is_allowed("echo", &strings(&["anything"]), &p));
        assert!(!policy.is_allowed("echo", &strings(&["a", "b"]), &p));
        assert!(policy.is_allowed("git", &strings(&["log"]), &p));
        assert!(policy.is_allowed("git", &strings(&["log", "--oneline", "-n", "3"]), &p));
        assert!(!policy.is_allowed("git", &strings(&["push"]), &p));
    }

    #[test]
    fn test_no_args_scope_rejects_args() {
        let policy = CommandPolicy::new(&[scope("date", vec![])]);
        assert!(policy.is_allowed("date", &[], &paths()));
        assert!(!policy.is_allowed("date", &strings(&["-u"]), &paths()));
    }

    #[test]
    fn test_pattern_is_anchored() {
        let policy = CommandPolicy::new(&[scope("sleep", vec![CommandArg::validator("[0-9]+")])]);
        assert!(policy.is_allowed("sleep", &strings(&["10"]), &paths()));
        assert!(!policy.is_allowed("sleep", &strings(&["10; rm -rf /"]), &paths()));
    }

    #[test]
    fn test_check_reports_command_line() {
        let policy = CommandPolicy::default();
        let err = policy
            .check("$os.cmd", "rm", &strings(&["-rf", "/"]), &paths())
            .unwrap_err();
        assert!(err.to_string().contains("rm -rf /"));
    }
}
