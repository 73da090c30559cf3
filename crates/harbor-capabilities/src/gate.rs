//! Per-extension capability gate.

use std::path::{Path, PathBuf};

use harbor_core::{PermissionManifest, Scope};
use url::Url;

use crate::commands::CommandPolicy;
use crate::domains::DomainPolicy;
use crate::error::{CapabilityError, CapabilityResult};
use crate::paths::{AccessMode, PathPlaceholders, PathPolicy};

/// Everything one extension is allowed to do, compiled once at load time.
#[derive(Debug, Clone, Default)]
pub struct CapabilityGate {
    scopes: Vec<Scope>,
    paths: PathPolicy,
    commands: CommandPolicy,
    domains: DomainPolicy,
}

impl CapabilityGate {
    /// Compile a permission manifest.
    #[must_use]
    pub fn new(manifest: &PermissionManifest, placeholders: &PathPlaceholders) -> Self {
        let allow = &manifest.allow;
        Self {
            scopes: manifest.scopes.clone(),
            paths: PathPolicy::new(&allow.read_paths, &allow.write_paths, placeholders),
            commands: CommandPolicy::new(&allow.command_scopes),
            domains: DomainPolicy::new(&allow.domains),
        }
    }

    /// A gate that grants no scope and no path.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::default()
    }

    /// Whether `scope` was declared.
    #[must_use]
    pub fn has_scope(&self, scope: &Scope) -> bool {
        self.scopes.contains(scope)
    }

    /// Declared scopes.
    #[must_use]
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Fail unless `scope` was declared.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MissingScope`].
    pub fn require_scope(&self, scope: &Scope) -> CapabilityResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(CapabilityError::MissingScope {
                scope: scope.as_str().to_string(),
            })
        }
    }

    /// Authorize a path for reading.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unauthorized`].
    pub fn check_read(&self, operation: &str, path: &Path) -> CapabilityResult<PathBuf> {
        self.paths.check(operation, path, AccessMode::Read)
    }

    /// Authorize a path for writing.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unauthorized`].
    pub fn check_write(&self, operation: &str, path: &Path) -> CapabilityResult<PathBuf> {
        self.paths.check(operation, path, AccessMode::Write)
    }

    /// Authorize a command line.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unauthorized`].
    pub fn check_command(&self, operation: &str, name: &str, args: &[String]) -> CapabilityResult<()> {
        self.commands.check(operation, name, args, &self.paths)
    }

    /// Authorize an outbound request.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unauthorized`].
    pub fn check_url(&self, operation: &str, url: &str) -> CapabilityResult<Url> {
        self.domains.check(operation, url)
    }

    /// Compiled path policy.
    #[must_use]
    pub fn paths(&self) -> &PathPolicy {
        &self.paths
    }

    /// Compiled domain policy.
    #[must_use]
    pub fn domains(&self) -> &DomainPolicy {
        &self.domains
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::{AllowList, CommandArg, CommandScope};

    fn gate() -> CapabilityGate {
        let manifest = PermissionManifest {
            scopes: vec![Scope::System],
            allow: AllowList {
                read_paths: vec!["/srv/media/**".into()],
                write_paths: vec!["/srv/out/*".into()],
                command_scopes: vec![CommandScope {
                    description: None,
                    command: "mediainfo".into(),
                    args: vec![CommandArg::validator("$PATH")],
                }],
                domains: vec!["*.example.org".into()],
            },
        };
        CapabilityGate::new(&manifest, &PathPlaceholders::default())
    }

    #[test]
    fn test_scopes() {
        let g = gate();
        assert!(g.require_scope(&Scope::System).is_ok());
        assert!(matches!(
            g.require_scope(&Scope::Storage),
            Err(CapabilityError::MissingScope { .. })
        ));
    }

    #[test]
    fn test_paths_commands_urls() {
        let g = gate();
        assert!(g.check_read("$os.readFile", Path::new("/srv/media/a.mkv")).is_ok());
        assert!(g.check_write("$os.writeFile", Path::new("/srv/media/a.mkv")).is_err());
        assert!(g.check_write("$os.writeFile", Path::new("/srv/out/a.txt")).is_ok());
        assert!(g
            .check_command("$os.cmd", "mediainfo", &["/srv/media/a.mkv".to_string()])
            .is_ok());
        assert!(g.check_command("$os.cmd", "mediainfo", &["/etc/passwd".to_string()]).is_err());
        assert!(g.check_url("fetch", "https://api.example.org/v1").is_ok());
        assert!(g.check_url("fetch", "https://example.com").is_err());
    }

    #[test]
    fn test_deny_all() {
        let g = CapabilityGate::deny_all();
        assert!(g.scopes().is_empty());
        assert!(g.check_read("$os.stat", Path::new("/")).is_err());
    }
}
