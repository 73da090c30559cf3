//! Filesystem allow-lists.
//!
//! Patterns are globs where `*` stays inside one path segment and `**`
//! crosses separators. They may start with a placeholder (`$HOME`, `$TEMP`,
//! `$CACHE`, `$CONFIG`, `$DOWNLOAD`, `$DESKTOP`, `$DOCUMENT`, or any name the
//! host registers) that expands to one or more directories.
//!
//! A candidate path is checked twice: once in its lexically normalized form
//! and once with symlinks resolved along its longest existing prefix. Both
//! forms must be authorized, so a symlink inside an allowed directory cannot
//! point outside of it.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, warn};

use crate::error::{CapabilityError, CapabilityResult};

/// Which allow-list an operation consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only access. Satisfied by either list.
    Read,
    /// Mutating access. Satisfied by the write list only.
    Write,
}

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

/// Values substituted for `$NAME` placeholders in path patterns.
#[derive(Debug, Clone, Default)]
pub struct PathPlaceholders {
    values: BTreeMap<String, Vec<PathBuf>>,
}

impl PathPlaceholders {
    /// Placeholders for the current user's well-known directories.
    #[must_use]
    pub fn from_system() -> Self {
        let mut this = Self::default();
        this.insert("TEMP", vec![std::env::temp_dir()]);
        if let Some(base) = directories::BaseDirs::new() {
            this.insert("HOME", vec![base.home_dir().to_path_buf()]);
            this.insert("CACHE", vec![base.cache_dir().to_path_buf()]);
            this.insert("CONFIG", vec![base.config_dir().to_path_buf()]);
        }
        if let Some(user) = directories::UserDirs::new() {
            if let Some(dir) = user.download_dir() {
                this.insert("DOWNLOAD", vec![dir.to_path_buf()]);
            }
            if let Some(dir) = user.desktop_dir() {
                this.insert("DESKTOP", vec![dir.to_path_buf()]);
            }
            if let Some(dir) = user.document_dir() {
                this.insert("DOCUMENT", vec![dir.to_path_buf()]);
            }
        }
        this
    }

    /// Set the expansion of `$name`. An empty list makes patterns that use
    /// it unmatchable.
    pub fn insert(&mut self, name: impl Into<String>, paths: Vec<PathBuf>) {
        self.values.insert(name.into(), paths);
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        self.insert(name, paths);
        self
    }

    /// Expand every placeholder in `pattern`.
    ///
    /// A placeholder bound to several directories multiplies the pattern.
    /// Unknown placeholders are left as-is and will simply never match.
    #[must_use]
    pub fn expand(&self, pattern: &str) -> Vec<String> {
        let mut names: Vec<&String> = self.values.keys().collect();
        // Longest first so `$HOMEDIR` is not eaten by `$HOME`.
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));

        let mut out = vec![pattern.to_string()];
        for name in names {
            let token = format!("${name}");
            if !out.iter().any(|p| p.contains(&token)) {
                continue;
            }
            let paths = &self.values[name];
            let mut next = Vec::with_capacity(out.len().saturating_mul(paths.len()));
            for p in &out {
                if !p.contains(&token) {
                    next.push(p.clone());
                    continue;
                }
                for dir in paths {
                    next.push(p.replace(&token, &slash(dir)));
                }
            }
            out = next;
        }
        out.into_iter().map(|p| collapse_slashes(&p)).collect()
    }
}

fn slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' && prev_slash {
            continue;
        }
        prev_slash = c == '/';
        out.push(c);
    }
    out
}

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PathPattern {
    source: String,
    matcher: GlobMatcher,
    /// Directory covered wholesale by a trailing `/**` or `/**/*`.
    tree_base: Option<String>,
    /// Directory itself, for patterns ending in `/*`.
    dir_base: Option<String>,
}

impl PathPattern {
    fn compile(source: &str, cwd: &Path) -> CapabilityResult<Self> {
        let absolute = if source.starts_with('/') || source.starts_with('*') || has_drive(source) {
            source.to_string()
        } else {
            collapse_slashes(&format!("{}/{source}", slash(cwd)))
        };
        let matcher = GlobBuilder::new(&absolute)
            .literal_separator(true)
            .build()
            .map_err(|e| CapabilityError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })?
            .compile_matcher();

        let strip = |suffix: &str| absolute.strip_suffix(suffix).map(str::to_string);
        let tree_base = strip("/**/*").or_else(|| strip("/**"));
        let dir_base = if tree_base.is_none() { strip("/*") } else { None };

        Ok(Self {
            source: source.to_string(),
            matcher,
            tree_base,
            dir_base,
        })
    }

    fn matches(&self, path: &str) -> bool {
        if self.matcher.is_match(path) {
            return true;
        }
        if let Some(base) = &self.tree_base
            && !base.contains(['*', '?', '['])
            && (path == base || path.starts_with(&format!("{base}/")))
        {
            return true;
        }
        self.dir_base.as_deref().is_some_and(|base| path == base)
    }
}

fn has_drive(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Make `path` absolute and resolve `.` and `..` without touching the disk.
#[must_use]
pub fn normalize_lexically(path: &Path, cwd: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {},
            Component::ParentDir => {
                out.pop();
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Symlink hops followed before a path is considered unresolvable.
const MAX_SYMLINK_HOPS: usize = 40;

/// Resolve symlinks along the longest existing prefix of an already
/// normalized path and re-append the non-existent remainder.
///
/// Dangling links are followed to their target. A path that cannot be
/// resolved (link loops) comes back unchanged; see [`try_resolve_symlinks`].
#[must_use]
pub fn resolve_symlinks(normalized: &Path) -> PathBuf {
    try_resolve_symlinks(normalized).unwrap_or_else(|| normalized.to_path_buf())
}

/// Like [`resolve_symlinks`], but `None` when resolution does not settle
/// within a bounded number of symlink hops or a link cannot be read.
#[must_use]
pub fn try_resolve_symlinks(normalized: &Path) -> Option<PathBuf> {
    let mut current = normalized.to_path_buf();
    for _ in 0..MAX_SYMLINK_HOPS {
        let mut existing = current.clone();
        let mut rest: Vec<std::ffi::OsString> = Vec::new();
        let followed = loop {
            match std::fs::symlink_metadata(&existing) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    if let Ok(resolved) = std::fs::canonicalize(&existing) {
                        return Some(append_rest(resolved, &rest));
                    }
                    // Dangling: follow one hop by hand.
                    let target = std::fs::read_link(&existing).ok()?;
                    let parent = existing.parent().unwrap_or_else(|| Path::new("/"));
                    let parent = std::fs::canonicalize(parent).ok()?;
                    break append_rest(normalize_lexically(&target, &parent), &rest);
                },
                Ok(_) => {
                    let resolved = std::fs::canonicalize(&existing).ok()?;
                    return Some(append_rest(resolved, &rest));
                },
                Err(_) => match (existing.file_name().map(ToOwned::to_owned), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        rest.push(name);
                        existing = parent.to_path_buf();
                    },
                    _ => return Some(current),
                },
            }
        };
        current = followed;
    }
    None
}

fn append_rest(mut base: PathBuf, rest: &[std::ffi::OsString]) -> PathBuf {
    for part in rest.iter().rev() {
        base.push(part);
    }
    base
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Compiled read/write allow-lists of one extension.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    read: Vec<PathPattern>,
    write: Vec<PathPattern>,
}

impl PathPolicy {
    /// Compile the manifest lists.
    ///
    /// Entries that fail to compile are logged and skipped; they can only
    /// narrow what is allowed.
    #[must_use]
    pub fn new(read: &[String], write: &[String], placeholders: &PathPlaceholders) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let compile = |list: &[String]| -> Vec<PathPattern> {
            list.iter()
                .flat_map(|p| placeholders.expand(p.trim()))
                .filter(|p| !p.is_empty())
                .filter_map(|p| match PathPattern::compile(&p, &cwd) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        warn!(error = %e, "skipping path pattern");
                        None
                    },
                })
                .collect()
        };
        Self {
            read: compile(read),
            write: compile(write),
        }
    }

    /// Whether no path is allowed at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    fn lists(&self, mode: AccessMode) -> impl Iterator<Item = &PathPattern> {
        let read = match mode {
            AccessMode::Read => self.read.as_slice(),
            AccessMode::Write => &[],
        };
        read.iter().chain(self.write.iter())
    }

    fn matches_any(&self, candidate: &Path, mode: AccessMode) -> bool {
        let s = slash(candidate);
        self.lists(mode).any(|p| p.matches(&s))
    }

    /// Whether `path` may be accessed in `mode`.
    #[must_use]
    pub fn is_allowed(&self, path: &Path, mode: AccessMode) -> bool {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let lexical = normalize_lexically(path, &cwd);
        if !self.matches_any(&lexical, mode) {
            return false;
        }
        match try_resolve_symlinks(&lexical) {
            Some(resolved) => resolved == lexical || self.matches_any(&resolved, mode),
            None => false,
        }
    }

    /// Authorize `path` for `operation`, returning its normalized form.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Unauthorized`] if the path is not covered.
    pub fn check(&self, operation: &str, path: &Path, mode: AccessMode) -> CapabilityResult<PathBuf> {
        if self.is_allowed(path, mode) {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
            return Ok(normalize_lexically(path, &cwd));
        }
        debug!(operation, path = %path.display(), ?mode, "path refused");
        Err(CapabilityError::Unauthorized {
            operation: operation.to_string(),
            resource: path.display().to_string(),
            reason: Some(match mode {
                AccessMode::Read => "not authorized for read".to_string(),
                AccessMode::Write => "not authorized for write".to_string(),
            }),
        })
    }

    /// Sources of the compiled patterns, read list first.
    #[must_use]
    pub fn patterns(&self) -> Vec<&str> {
        self.read
            .iter()
            .chain(self.write.iter())
            .map(|p| p.source.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(read: &[&str], write: &[&str]) -> PathPolicy {
        let placeholders = PathPlaceholders::default()
            .with("HOME", vec![PathBuf::from("/home/u")])
            .with("LIBRARY", vec![PathBuf::from("/media/a"), PathBuf::from("/media/b")]);
        let to = |l: &[&str]| l.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        PathPolicy::new(&to(read), &to(write), &placeholders)
    }

    #[test]
    fn test_single_star_stays_in_segment() {
        let p = policy(&["/tmp/*"], &[]);
        assert!(p.is_allowed(Path::new("/tmp/file.txt"), AccessMode::Read));
        assert!(p.is_allowed(Path::new("/tmp"), AccessMode::Read));
        assert!(!p.is_allowed(Path::new("/tmp/a/b.txt"), AccessMode::Read));
    }

    #[test]
    fn test_double_star_crosses_segments() {
        let p = policy(&["$HOME/**"], &[]);
        assert!(p.is_allowed(Path::new("/home/u/a/b/c.txt"), AccessMode::Read));
        assert!(p.is_allowed(Path::new("/home/u"), AccessMode::Read));
        assert!(!p.is_allowed(Path::new("/home/other/x"), AccessMode::Read));
        assert!(!p.is_allowed(Path::new("/home/user2"), AccessMode::Read));
    }

    #[test]
    fn test_traversal_is_normalized_away() {
        let p = policy(&["/home/u/**"], &[]);
        assert!(!p.is_allowed(Path::new("/home/u/../../etc/passwd"), AccessMode::Read));
        assert!(p.is_allowed(Path::new("/home/u/x/../y"), AccessMode::Read));
    }

    #[test]
    fn test_write_list_covers_read_but_not_reverse() {
        let p = policy(&["/r/**"], &["/w/**"]);
        assert!(p.is_allowed(Path::new("/w/file"), AccessMode::Read));
        assert!(p.is_allowed(Path::new("/w/file"), AccessMode::Write));
        assert!(!p.is_allowed(Path::new("/r/file"), AccessMode::Write));
    }

    #[test]
    fn test_multi_path_placeholder() {
        let p = policy(&["$LIBRARY/**"], &[]);
        assert!(p.is_allowed(Path::new("/media/a/show/ep1.mkv"), AccessMode::Read));
        assert!(p.is_allowed(Path::new("/media/b/ep2.mkv"), AccessMode::Read));
        assert!(!p.is_allowed(Path::new("/media/c/ep3.mkv"), AccessMode::Read));
    }

    #[test]
    fn test_empty_policy_denies() {
        let p = policy(&[], &[]);
        assert!(p.is_empty());
        let err = p.check("$os.readFile", Path::new("/etc/hosts"), AccessMode::Read);
        assert!(matches!(err, Err(CapabilityError::Unauthorized { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret"), "x").unwrap();
        let root = resolve_symlinks(allowed.path());
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

        let pattern = format!("{}/**", root.display());
        let p = policy(&[pattern.as_str()], &[]);
        assert!(p.is_allowed(&root.join("plain.txt"), AccessMode::Read));
        assert!(!p.is_allowed(&root.join("link/secret"), AccessMode::Read));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_escape_rejected() {
        let allowed = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let root = resolve_symlinks(allowed.path());
        let planted = resolve_symlinks(outside.path()).join("planted");
        std::os::unix::fs::symlink(&planted, root.join("link")).unwrap();

        let pattern = format!("{}/**", root.display());
        let p = policy(&[], &[pattern.as_str()]);
        assert!(p.check("$os.writeFile", &root.join("link"), AccessMode::Write).is_err());
        assert!(!p.is_allowed(&root.join("link/below"), AccessMode::Write));
        assert!(!planted.exists());
        assert_eq!(resolve_symlinks(&root.join("link")), planted);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_inside_allowed_dir_is_fine() {
        let allowed = tempfile::tempdir().unwrap();
        let root = resolve_symlinks(allowed.path());
        std::os::unix::fs::symlink("later.txt", root.join("alias")).unwrap();

        let pattern = format!("{}/**", root.display());
        let p = policy(&[], &[pattern.as_str()]);
        assert!(p.is_allowed(&root.join("alias"), AccessMode::Write));
        assert_eq!(resolve_symlinks(&root.join("alias")), root.join("later.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_rejected() {
        let allowed = tempfile::tempdir().unwrap();
        let root = resolve_symlinks(allowed.path());
        std::os::unix::fs::symlink(root.join("b"), root.join("a")).unwrap();
        std::os::unix::fs::symlink(root.join("a"), root.join("b")).unwrap();

        let pattern = format!("{}/**", root.display());
        let p = policy(&[pattern.as_str()], &[]);
        assert!(try_resolve_symlinks(&root.join("a")).is_none());
        assert!(!p.is_allowed(&root.join("a"), AccessMode::Read));
    }

    #[test]
    fn test_expand_unknown_placeholder_kept() {
        let ph = PathPlaceholders::default().with("HOME", vec![PathBuf::from("/h/")]);
        assert_eq!(ph.expand("$HOME/x"), vec!["/h/x"]);
        assert_eq!(ph.expand("$NOPE/x"), vec!["$NOPE/x"]);
    }
}
