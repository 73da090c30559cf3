//! `$filepath` and `$mime` (`system` scope).
//!
//! Pure path manipulation is not gated; `glob` and `walk` only report
//! entries the extension may read.

use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use harbor_capabilities::normalize_lexically;
use serde_json::{Value, json};
use walkdir::WalkDir;

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

/// Entries reported by one `walk` or `glob`.
const MAX_ENTRIES: usize = 100_000;

fn text(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}

/// Lexical cleanup that keeps relative paths relative.
pub(crate) fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".into();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {},
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".into(),
        (false, false) => joined,
    }
}

fn ext(path: &str) -> String {
    let base = path.rsplit('/').next().unwrap_or(path);
    base.rfind('.').map(|i| base[i..].to_string()).unwrap_or_default()
}

fn base(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.is_empty() { ".".into() } else { "/".into() };
    }
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".into(),
        Some(i) => clean(&path[..i]),
        None => ".".into(),
    }
}

fn rel(op: &str, base: &str, target: &str) -> RuntimeResult<String> {
    let base = clean(base);
    let target = clean(target);
    if base.starts_with('/') != target.starts_with('/') {
        return Err(RuntimeError::invalid_argument(
            op,
            format!("can't make {target} relative to {base}"),
        ));
    }
    let split = |s: &str| -> Vec<String> {
        Path::new(s)
            .components()
            .filter_map(|c| match c {
                Component::Normal(n) => Some(n.to_string_lossy().into_owned()),
                Component::ParentDir => Some("..".into()),
                _ => None,
            })
            .collect()
    };
    let (b, t) = (split(&base), split(&target));
    let common = b.iter().zip(&t).take_while(|(x, y)| x == y).count();
    if b[common..].iter().any(|p| p == "..") {
        return Err(RuntimeError::invalid_argument(
            op,
            format!("can't make {target} relative to {base}"),
        ));
    }
    let mut out: Vec<String> = b[common..].iter().map(|_| "..".to_string()).collect();
    out.extend(t[common..].iter().cloned());
    Ok(if out.is_empty() { ".".into() } else { out.join("/") })
}

fn glob_match(op: &str, pattern: &str, name: &str) -> RuntimeResult<bool> {
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| RuntimeError::invalid_argument(op, e.to_string()))?;
    Ok(glob.compile_matcher().is_match(name))
}

/// Fixed directory prefix of a glob pattern.
fn glob_root(pattern: &str) -> PathBuf {
    let mut root = PathBuf::new();
    for part in Path::new(pattern).components() {
        let s = part.as_os_str().to_string_lossy();
        if s.contains(['*', '?', '[', '{']) {
            break;
        }
        root.push(part.as_os_str());
    }
    root
}

pub(crate) struct FilepathModule;

impl FilepathModule {
    fn walk(cx: &HostContext, args: &Args<'_>) -> RuntimeResult<Value> {
        let root = cx.gate().check_read(args.op(), Path::new(args.str(0)?))?;
        let mut out = Vec::new();
        for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    out.push(json!({ "path": e.path().map(text), "error": e.to_string() }));
                    continue;
                },
            };
            if !cx.gate().paths().is_allowed(entry.path(), harbor_capabilities::AccessMode::Read) {
                continue;
            }
            out.push(json!({
                "path": text(entry.path()),
                "name": entry.file_name().to_string_lossy(),
                "isDir": entry.file_type().is_dir(),
            }));
            if out.len() >= MAX_ENTRIES {
                break;
            }
        }
        Ok(Value::Array(out))
    }

    fn glob(cx: &HostContext, args: &Args<'_>) -> RuntimeResult<Value> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let pattern = normalize_lexically(Path::new(args.str(0)?), &cwd);
        let pattern = pattern.to_string_lossy().into_owned();
        let matcher = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| RuntimeError::invalid_argument(args.op(), e.to_string()))?
            .compile_matcher();
        let root = glob_root(&pattern);
        let depth = Path::new(&pattern).components().count();
        let mut out = Vec::new();
        for entry in WalkDir::new(&root)
            .max_depth(depth)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if matcher.is_match(path)
                && cx.gate().paths().is_allowed(path, harbor_capabilities::AccessMode::Read)
            {
                out.push(text(path));
                if out.len() >= MAX_ENTRIES {
                    break;
                }
            }
        }
        Ok(Value::Array(out))
    }
}

impl HostModule for FilepathModule {
    fn namespace(&self) -> &'static str {
        "filepath"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        let op = args.op();
        match method {
            "join" => {
                let parts: Vec<String> = args
                    .rest(0)
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(if parts.is_empty() {
                    json!("")
                } else {
                    json!(clean(&parts.join("/")))
                })
            },
            "base" => Ok(json!(base(args.str(0)?))),
            "dir" => Ok(json!(dir(args.str(0)?))),
            "ext" => Ok(json!(ext(args.str(0)?))),
            "clean" => Ok(json!(clean(args.str(0)?))),
            "isAbs" => Ok(json!(Path::new(args.str(0)?).is_absolute())),
            "abs" => {
                let cwd = std::env::current_dir().map_err(|e| RuntimeError::io(op, e))?;
                Ok(text(&normalize_lexically(Path::new(args.str(0)?), &cwd)))
            },
            "split" => {
                let path = args.str(0)?;
                let cut = path.rfind('/').map_or(0, |i| i.saturating_add(1));
                Ok(json!([&path[..cut], &path[cut..]]))
            },
            "rel" => Ok(json!(rel(op, args.str(0)?, args.str(1)?)?)),
            "match" => Ok(json!(glob_match(op, args.str(0)?, args.str(1)?)?)),
            "glob" => Self::glob(cx, args),
            "walk" => Self::walk(cx, args),
            "mimeParse" => {
                let parsed: mime::Mime = args
                    .str(0)?
                    .parse()
                    .map_err(|e: mime::FromStrError| RuntimeError::invalid_argument(op, e.to_string()))?;
                let params: serde_json::Map<String, Value> = parsed
                    .params()
                    .map(|(k, v)| (k.as_str().to_string(), json!(v.as_str())))
                    .collect();
                Ok(json!({ "mediaType": parsed.essence_str(), "parameters": params }))
            },
            _ => Err(unknown_method("filepath", method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing;
    use harbor_core::{AllowList, PermissionManifest, Scope};
    use std::sync::Arc;

    #[test]
    fn test_pure_helpers() {
        assert_eq!(clean("a//b/./c/.."), "a/b");
        assert_eq!(clean("/../x"), "/x");
        assert_eq!(clean("../../x"), "../../x");
        assert_eq!(clean(""), ".");
        assert_eq!(base("/a/b.txt"), "b.txt");
        assert_eq!(base("/"), "/");
        assert_eq!(dir("/a/b.txt"), "/a");
        assert_eq!(dir("b.txt"), ".");
        assert_eq!(ext("/a/b.tar.gz"), ".gz");
        assert_eq!(ext("/a.d/b"), "");
        assert_eq!(rel("t", "/a/b", "/a/c/d").unwrap(), "../c/d");
        assert!(rel("t", "/a", "b").is_err());
        assert!(glob_match("t", "*.mkv", "ep1.mkv").unwrap());
        assert!(!glob_match("t", "*.mkv", "dir/ep1.mkv").unwrap());
    }

    #[test]
    fn test_walk_filters_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let root = harbor_capabilities::resolve_symlinks(dir.path());
        std::fs::create_dir_all(root.join("shows/s1")).unwrap();
        std::fs::create_dir_all(root.join("private")).unwrap();
        std::fs::write(root.join("shows/s1/ep.mkv"), "").unwrap();
        std::fs::write(root.join("private/key"), "").unwrap();
        let manifest = PermissionManifest {
            scopes: vec![Scope::System],
            allow: AllowList {
                read_paths: vec![format!("{}/shows/**", root.display()), format!("{}", root.display())],
                ..Default::default()
            },
        };
        let cx = testing::context(&manifest);
        let module = || Arc::new(FilepathModule) as Arc<dyn HostModule>;

        let walked = testing::call(module(), &cx, "filepath.walk", json!([root])).unwrap();
        let paths: Vec<&str> = walked
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["path"].as_str())
            .collect();
        assert!(paths.iter().any(|p| p.ends_with("shows/s1/ep.mkv")));
        assert!(!paths.iter().any(|p| p.contains("private")));

        let globbed = testing::call(
            module(),
            &cx,
            "filepath.glob",
            json!([format!("{}/*/*/*.mkv", root.display())]),
        )
        .unwrap();
        assert_eq!(globbed.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_mime_parse() {
        let cx = testing::context(&PermissionManifest::default());
        let out = testing::call(
            Arc::new(FilepathModule),
            &cx,
            "filepath.mimeParse",
            json!(["text/html; charset=utf-8"]),
        )
        .unwrap();
        assert_eq!(out["mediaType"], "text/html");
        assert_eq!(out["parameters"]["charset"], "utf-8");
    }
}
