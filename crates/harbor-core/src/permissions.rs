//! Content-addressed permission hashing.
//!
//! The hash of a plugin's permission manifest is stored when the user grants
//! permissions. On every load the hash is recomputed; any change to scopes or
//! allow-lists produces a different hash and blocks the plugin until the
//! user grants again.

use serde::Serialize;

use crate::manifest::{CommandArg, PermissionManifest};

/// Canonical, order-independent form of a permission manifest.
#[derive(Serialize)]
struct Normalized<'a> {
    scopes: Vec<&'a str>,
    read_paths: Vec<&'a str>,
    write_paths: Vec<&'a str>,
    commands: Vec<(&'a str, Vec<&'a CommandArg>)>,
    domains: Vec<&'a str>,
}

fn sorted<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut out: Vec<&str> = items.map(str::trim).filter(|s| !s.is_empty()).collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Compute the stable hash of a permission manifest.
///
/// Ordering and duplicates in any list do not affect the hash; command
/// descriptions are ignored. Argument order within a command does.
#[must_use]
pub fn permission_hash(manifest: &PermissionManifest) -> String {
    let mut commands: Vec<(&str, Vec<&CommandArg>)> = manifest
        .allow
        .command_scopes
        .iter()
        .map(|c| (c.command.as_str(), c.args.iter().collect()))
        .collect();
    commands.sort_by(|a, b| {
        a.0.cmp(b.0).then_with(|| {
            let left = serde_json::to_string(&a.1).unwrap_or_default();
            let right = serde_json::to_string(&b.1).unwrap_or_default();
            left.cmp(&right)
        })
    });
    commands.dedup();

    let normalized = Normalized {
        scopes: sorted(manifest.scopes.iter().map(|s| s.as_str())),
        read_paths: sorted(manifest.allow.read_paths.iter().map(String::as_str)),
        write_paths: sorted(manifest.allow.write_paths.iter().map(String::as_str)),
        commands,
        domains: sorted(manifest.allow.domains.iter().map(String::as_str)),
    };

    let canonical = serde_json::to_vec(&normalized).unwrap_or_default();
    blake3::hash(&canonical).to_hex().to_string()
}

/// Whether `manifest` matches the previously granted `granted` hash.
///
/// A manifest that declares nothing needs no grant.
#[must_use]
pub fn is_granted(manifest: &PermissionManifest, granted: Option<&str>) -> bool {
    if manifest.is_empty() {
        return true;
    }
    granted.is_some_and(|g| g == permission_hash(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{AllowList, CommandScope, Scope};

    fn manifest() -> PermissionManifest {
        PermissionManifest {
            scopes: vec![Scope::System, Scope::Storage],
            allow: AllowList {
                read_paths: vec!["$HOME/**".into(), "/tmp/*".into()],
                write_paths: vec![],
                command_scopes: vec![CommandScope {
                    description: Some("list".into()),
                    command: "ls".into(),
                    args: vec![CommandArg::literal("-la"), CommandArg::validator("$PATH")],
                }],
                domains: vec!["example.com".into()],
            },
        }
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = manifest();
        let mut b = manifest();
        b.scopes.reverse();
        b.allow.read_paths.reverse();
        b.allow.read_paths.push("/tmp/*".into());
        b.allow.command_scopes[0].description = Some("changed".into());
        assert_eq!(permission_hash(&a), permission_hash(&b));
    }

    #[test]
    fn test_hash_changes_with_content() {
        let a = manifest();
        let mut b = manifest();
        b.allow.domains.push("evil.com".into());
        assert_ne!(permission_hash(&a), permission_hash(&b));

        let mut c = manifest();
        c.allow.command_scopes[0].args.reverse();
        assert_ne!(permission_hash(&a), permission_hash(&c));
    }

    #[test]
    fn test_granted_check() {
        let m = manifest();
        let hash = permission_hash(&m);
        assert!(is_granted(&m, Some(&hash)));
        assert!(!is_granted(&m, Some("deadbeef")));
        assert!(!is_granted(&m, None));
        assert!(is_granted(&PermissionManifest::default(), None));
    }
}
