//! Zip extraction (`$osExtra.unzip`; `system` scope).

use std::fs::File;
use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::debug;
use zip::ZipArchive;

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

pub(crate) struct ArchiveModule;

fn zip_err(op: &str, e: zip::result::ZipError) -> RuntimeError {
    RuntimeError::io(op, std::io::Error::other(e))
}

/// Extract `src` under `dst`.
///
/// Every entry is vetted before anything is written: names escaping `dst`
/// and targets outside the write allow-list abort the whole extraction.
pub(crate) fn unzip(cx: &HostContext, op: &str, src: &Path, dst: &Path) -> RuntimeResult<usize> {
    let file = File::open(src).map_err(|e| RuntimeError::io(op, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| zip_err(op, e))?;

    let mut targets: Vec<(usize, PathBuf, bool)> = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| zip_err(op, e))?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            return Err(harbor_capabilities::CapabilityError::unauthorized(
                op,
                format!("archive entry {} escapes {}", entry.name(), dst.display()),
            )
            .into());
        };
        let target = cx.gate().check_write(op, &dst.join(relative))?;
        if !target.starts_with(dst) {
            return Err(harbor_capabilities::CapabilityError::unauthorized(op, target.display().to_string()).into());
        }
        targets.push((i, target, entry.is_dir()));
    }

    std::fs::create_dir_all(dst).map_err(|e| RuntimeError::io(op, e))?;
    for (i, target, is_dir) in &targets {
        if *is_dir {
            std::fs::create_dir_all(target).map_err(|e| RuntimeError::io(op, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RuntimeError::io(op, e))?;
        }
        let mut entry = archive.by_index(*i).map_err(|e| zip_err(op, e))?;
        let mut out = File::create(target).map_err(|e| RuntimeError::io(op, e))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| RuntimeError::io(op, e))?;
    }
    debug!(extension_id = %cx.extension_id(), src = %src.display(), entries = targets.len(), "unzipped");
    Ok(targets.len())
}

impl HostModule for ArchiveModule {
    fn namespace(&self) -> &'static str {
        "archive"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        match method {
            "unzip" => {
                let src = cx.gate().check_read(args.op(), Path::new(args.str(0)?))?;
                let dst = cx.gate().check_write(args.op(), Path::new(args.str(1)?))?;
                Ok(json!(unzip(cx, args.op(), &src, &dst)?))
            },
            _ => Err(unknown_method("archive", method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing;
    use harbor_core::{AllowList, PermissionManifest, Scope};
    use std::io::Write;
    use std::sync::Arc;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in entries {
            zip.start_file(*name, zip::write::FileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn context(root: &Path) -> HostContext {
        testing::context(&PermissionManifest {
            scopes: vec![Scope::System],
            allow: AllowList {
                read_paths: vec![format!("{}/in/*", root.display())],
                write_paths: vec![format!("{}/out/**", root.display())],
                ..Default::default()
            },
        })
    }

    #[test]
    fn test_unzip_extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let root = harbor_capabilities::resolve_symlinks(dir.path());
        std::fs::create_dir_all(root.join("in")).unwrap();
        write_zip(&root.join("in/a.zip"), &[("a.txt", "A"), ("sub/b.txt", "B")]);
        let cx = context(&root);

        let n = testing::call(
            Arc::new(ArchiveModule),
            &cx,
            "archive.unzip",
            json!([root.join("in/a.zip"), root.join("out/x")]),
        )
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(std::fs::read_to_string(root.join("out/x/sub/b.txt")).unwrap(), "B");
    }

    #[test]
    fn test_unzip_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let root = harbor_capabilities::resolve_symlinks(dir.path());
        std::fs::create_dir_all(root.join("in")).unwrap();
        write_zip(&root.join("in/evil.zip"), &[("ok.txt", "fine"), ("../../evil.txt", "pwned")]);
        let cx = context(&root);

        let err = testing::call(
            Arc::new(ArchiveModule),
            &cx,
            "archive.unzip",
            json!([root.join("in/evil.zip"), root.join("out/x")]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
        assert!(!root.join("evil.txt").exists());
        assert!(!root.join("out/evil.txt").exists());
        assert!(!root.join("out/x/ok.txt").exists());
    }
}
