//! Filesystem bindings behind `$os` and `$osExtra` (`system` scope).
//!
//! Every path argument is authorized before it is touched, and the IO is
//! performed on the normalized path the gate returned. Open files live in
//! a handle table owned by the interpreter.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::UNIX_EPOCH;

use dashmap::DashMap;
use serde_json::{Value, json};

use super::util::{decode_bytes, encode_bytes};
use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

/// Open flags, matching the values scripts see as `$os.O_*`.
pub mod flags {
    /// Read only.
    pub const O_RDONLY: u64 = 0x0;
    /// Write only.
    pub const O_WRONLY: u64 = 0x1;
    /// Read and write.
    pub const O_RDWR: u64 = 0x2;
    /// Create if missing.
    pub const O_CREATE: u64 = 0x40;
    /// With `O_CREATE`, fail if the file exists.
    pub const O_EXCL: u64 = 0x80;
    /// Truncate on open.
    pub const O_TRUNC: u64 = 0x200;
    /// Append on write.
    pub const O_APPEND: u64 = 0x400;
}

use flags::{O_APPEND, O_CREATE, O_EXCL, O_RDWR, O_TRUNC, O_WRONLY};

/// Largest single `file.read`.
const MAX_READ: u64 = 16 * 1024 * 1024;

fn mutates(bits: u64) -> bool {
    bits & (O_WRONLY | O_RDWR | O_CREATE | O_TRUNC | O_APPEND) != 0
}

fn open_options(bits: u64) -> OpenOptions {
    let mut options = OpenOptions::new();
    let access = bits & 0x3;
    options
        .read(access == 0 || access == O_RDWR)
        .write(access == O_WRONLY || access == O_RDWR)
        .append(bits & O_APPEND != 0)
        .truncate(bits & O_TRUNC != 0);
    if bits & O_CREATE != 0 {
        if bits & O_EXCL != 0 {
            options.create_new(true);
        } else {
            options.create(true);
        }
    }
    options
}

fn stat_json(path: &Path, meta: &std::fs::Metadata) -> Value {
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    json!({
        "name": path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        "size": meta.len(),
        "isDir": meta.is_dir(),
        "isFile": meta.is_file(),
        "isSymlink": meta.file_type().is_symlink(),
        "modTime": modified,
        "mode": mode_bits(meta),
    })
}

#[cfg(unix)]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_bits(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

/// `$os` / `$osExtra` file operations.
#[derive(Default)]
pub(crate) struct FsModule {
    files: DashMap<u64, Mutex<File>>,
    next_handle: AtomicU64,
}

impl FsModule {
    fn read_path(cx: &HostContext, args: &Args<'_>, i: usize) -> RuntimeResult<PathBuf> {
        Ok(cx.gate().check_read(args.op(), Path::new(args.str(i)?))?)
    }

    fn write_path(cx: &HostContext, args: &Args<'_>, i: usize) -> RuntimeResult<PathBuf> {
        Ok(cx.gate().check_write(args.op(), Path::new(args.str(i)?))?)
    }

    fn with_file<T>(
        &self,
        args: &Args<'_>,
        f: impl FnOnce(&mut File) -> std::io::Result<T>,
    ) -> RuntimeResult<T> {
        let id = args.u64(0)?;
        let entry = self
            .files
            .get(&id)
            .ok_or_else(|| RuntimeError::invalid_argument(args.op(), format!("file {id} is closed")))?;
        let mut file = entry.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut file).map_err(|e| RuntimeError::io(args.op(), e))
    }

    fn open(&self, cx: &HostContext, args: &Args<'_>, bits: u64) -> RuntimeResult<Value> {
        let path = if mutates(bits) {
            Self::write_path(cx, args, 0)?
        } else {
            Self::read_path(cx, args, 0)?
        };
        let file = open_options(bits)
            .open(&path)
            .map_err(|e| RuntimeError::io(args.op(), e))?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.files.insert(id, Mutex::new(file));
        Ok(json!(id))
    }
}

fn io<T>(op: &str, r: std::io::Result<T>) -> RuntimeResult<T> {
    r.map_err(|e| RuntimeError::io(op, e))
}

/// Move the content of `src` into `dst`. When `src` holds a single
/// directory, that directory's content is moved instead.
pub(crate) fn unwrap_and_move(op: &str, src: &Path, dst: &Path) -> RuntimeResult<()> {
    let entries: Vec<_> = io(op, std::fs::read_dir(src))?
        .collect::<std::io::Result<_>>()
        .map_err(|e| RuntimeError::io(op, e))?;
    let mut root = src.to_path_buf();
    if let [only] = entries.as_slice()
        && only.path().is_dir()
    {
        // Park the wrapper under a unique name so a child with the same
        // name can land next to it.
        let parked = src.join(format!(".harbor-unwrap-{}", uuid::Uuid::new_v4().simple()));
        io(op, std::fs::rename(only.path(), &parked))?;
        root = parked;
    }
    io(op, std::fs::create_dir_all(dst))?;
    for entry in io(op, std::fs::read_dir(&root))? {
        let entry = io(op, entry)?;
        io(op, std::fs::rename(entry.path(), dst.join(entry.file_name())))?;
    }
    if root != src {
        io(op, std::fs::remove_dir_all(&root))?;
    }
    if src != dst && io(op, std::fs::read_dir(src))?.next().is_none() {
        io(op, std::fs::remove_dir(src))?;
    }
    Ok(())
}

impl HostModule for FsModule {
    fn namespace(&self) -> &'static str {
        "fs"
    }

    #[allow(clippy::too_many_lines)]
    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        let op = args.op();
        match method {
            "readFile" => {
                let path = Self::read_path(cx, args, 0)?;
                Ok(encode_bytes(&io(op, std::fs::read(path))?))
            },
            "writeFile" => {
                let path = Self::write_path(cx, args, 0)?;
                let data = decode_bytes(op, args.str(1)?)?;
                io(op, std::fs::write(&path, data))?;
                #[cfg(unix)]
                if let Some(perm) = args.opt_u64(2) {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = u32::try_from(perm).unwrap_or(0o644);
                    io(op, std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode)))?;
                }
                Ok(Value::Null)
            },
            "readDir" => {
                let path = Self::read_path(cx, args, 0)?;
                let mut out = Vec::new();
                for entry in io(op, std::fs::read_dir(&path))? {
                    let entry = io(op, entry)?;
                    let meta = io(op, entry.metadata())?;
                    out.push(stat_json(&entry.path(), &meta));
                }
                out.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
                Ok(Value::Array(out))
            },
            "mkdir" => {
                let path = Self::write_path(cx, args, 0)?;
                io(op, std::fs::create_dir(path))?;
                Ok(Value::Null)
            },
            "mkdirAll" => {
                let path = Self::write_path(cx, args, 0)?;
                io(op, std::fs::create_dir_all(path))?;
                Ok(Value::Null)
            },
            "stat" => {
                let path = Self::read_path(cx, args, 0)?;
                let meta = io(op, std::fs::metadata(&path))?;
                Ok(stat_json(&path, &meta))
            },
            "lstat" => {
                let path = Self::read_path(cx, args, 0)?;
                let meta = io(op, std::fs::symlink_metadata(&path))?;
                Ok(stat_json(&path, &meta))
            },
            "rename" => {
                let from = Self::write_path(cx, args, 0)?;
                let to = Self::write_path(cx, args, 1)?;
                io(op, std::fs::rename(from, to))?;
                Ok(Value::Null)
            },
            "remove" => {
                let path = Self::write_path(cx, args, 0)?;
                let meta = io(op, std::fs::symlink_metadata(&path))?;
                if meta.is_dir() {
                    io(op, std::fs::remove_dir(path))?;
                } else {
                    io(op, std::fs::remove_file(path))?;
                }
                Ok(Value::Null)
            },
            "removeAll" => {
                let path = Self::write_path(cx, args, 0)?;
                match std::fs::symlink_metadata(&path) {
                    Ok(meta) if meta.is_dir() => io(op, std::fs::remove_dir_all(&path))?,
                    Ok(_) => io(op, std::fs::remove_file(&path))?,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                    Err(e) => return Err(RuntimeError::io(op, e)),
                }
                Ok(Value::Null)
            },
            "truncate" => {
                let path = Self::write_path(cx, args, 0)?;
                let file = io(op, OpenOptions::new().write(true).open(&path))?;
                io(op, file.set_len(args.u64(1)?))?;
                Ok(Value::Null)
            },
            "open" => self.open(cx, args, args.opt_u64(1).unwrap_or(0)),
            "create" => self.open(cx, args, O_RDWR | O_CREATE | O_TRUNC),
            "read" => {
                let n = args.u64(1)?.min(MAX_READ);
                let bytes = self.with_file(args, |f| {
                    let mut buf = Vec::new();
                    f.take(n).read_to_end(&mut buf)?;
                    Ok(buf)
                })?;
                // `null` signals end of file.
                if bytes.is_empty() && n > 0 {
                    Ok(Value::Null)
                } else {
                    Ok(encode_bytes(&bytes))
                }
            },
            "readAll" => {
                let bytes = self.with_file(args, |f| {
                    let mut buf = Vec::new();
                    f.read_to_end(&mut buf)?;
                    Ok(buf)
                })?;
                Ok(encode_bytes(&bytes))
            },
            "write" => {
                let data = decode_bytes(op, args.str(1)?)?;
                let len = data.len();
                self.with_file(args, |f| f.write_all(&data))?;
                Ok(json!(len))
            },
            "seek" => {
                let offset = args.value(1).as_i64().unwrap_or(0);
                let whence = args.opt_u64(2).unwrap_or(0);
                let pos = self.with_file(args, |f| {
                    let from = match whence {
                        1 => SeekFrom::Current(offset),
                        2 => SeekFrom::End(offset),
                        _ => SeekFrom::Start(u64::try_from(offset).unwrap_or(0)),
                    };
                    f.seek(from)
                })?;
                Ok(json!(pos))
            },
            "close" => {
                let id = args.u64(0)?;
                if let Some((_, file)) = self.files.remove(&id) {
                    let file = file.into_inner().unwrap_or_else(PoisonError::into_inner);
                    io(op, file.sync_all())?;
                }
                Ok(Value::Null)
            },
            "tempDir" => Ok(json!(std::env::temp_dir())),
            "homeDir" | "cacheDir" | "configDir" => {
                let base = directories::BaseDirs::new()
                    .ok_or_else(|| RuntimeError::ServiceDown("no home directory".into()))?;
                let dir = match method {
                    "homeDir" => base.home_dir(),
                    "cacheDir" => base.cache_dir(),
                    _ => base.config_dir(),
                };
                Ok(json!(dir))
            },
            "platform" => Ok(json!(std::env::consts::OS)),
            "arch" => Ok(json!(std::env::consts::ARCH)),
            "downloadDir" => {
                let dir = cx.gate().check_read(op, &cx.options().download_dir)?;
                Ok(json!(dir))
            },
            "unwrapAndMove" => {
                let src = Self::write_path(cx, args, 0)?;
                let dst = Self::write_path(cx, args, 1)?;
                unwrap_and_move(op, &src, &dst)?;
                Ok(Value::Null)
            },
            _ => Err(unknown_method("fs", method)),
        }
    }

    fn shutdown(&self) {
        self.files.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing;
    use harbor_core::{AllowList, PermissionManifest, Scope};
    use std::sync::Arc;

    fn context(dir: &Path, read: &[&str], write: &[&str]) -> HostContext {
        let root = dir.to_string_lossy();
        let manifest = PermissionManifest {
            scopes: vec![Scope::System],
            allow: AllowList {
                read_paths: read.iter().map(|p| format!("{root}/{p}")).collect(),
                write_paths: write.iter().map(|p| format!("{root}/{p}")).collect(),
                ..Default::default()
            },
        };
        testing::context(&manifest)
    }

    fn call(module: &Arc<FsModule>, cx: &HostContext, op: &str, args: Value) -> RuntimeResult<Value> {
        testing::call(Arc::clone(module) as Arc<dyn HostModule>, cx, op, args)
    }

    #[test]
    fn test_write_read_and_denial() {
        let dir = tempfile::tempdir().unwrap();
        let cx = context(dir.path(), &["ro/**"], &["rw/**"]);
        let fs = Arc::new(FsModule::default());
        let root = dir.path().to_string_lossy().to_string();

        call(&fs, &cx, "fs.mkdirAll", json!([format!("{root}/rw/a/b")])).unwrap();
        let data = encode_bytes(b"hello");
        call(&fs, &cx, "fs.writeFile", json!([format!("{root}/rw/a/b/f.txt"), data])).unwrap();
        let read = call(&fs, &cx, "fs.readFile", json!([format!("{root}/rw/a/b/f.txt")])).unwrap();
        assert_eq!(read, encode_bytes(b"hello"));

        let err = call(&fs, &cx, "fs.writeFile", json!([format!("{root}/ro/x"), data])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
        let err = call(&fs, &cx, "fs.readFile", json!(["/etc/hostname"])).unwrap_err();
        assert!(err.to_string().contains("not authorized"));
        let err = call(
            &fs,
            &cx,
            "fs.rename",
            json!([format!("{root}/rw/a/b/f.txt"), format!("{root}/ro/f.txt")]),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
    }

    #[test]
    fn test_handles() {
        let dir = tempfile::tempdir().unwrap();
        let cx = context(dir.path(), &[], &["**"]);
        let fs = Arc::new(FsModule::default());
        let path = dir.path().join("log.txt").to_string_lossy().to_string();

        let h = call(&fs, &cx, "fs.open", json!([path, O_WRONLY | O_CREATE | O_APPEND])).unwrap();
        call(&fs, &cx, "fs.write", json!([h, encode_bytes(b"ab")])).unwrap();
        call(&fs, &cx, "fs.write", json!([h, encode_bytes(b"cd")])).unwrap();
        call(&fs, &cx, "fs.close", json!([h])).unwrap();
        assert!(call(&fs, &cx, "fs.write", json!([h, encode_bytes(b"x")])).is_err());

        let h = call(&fs, &cx, "fs.open", json!([path, 0])).unwrap();
        assert_eq!(call(&fs, &cx, "fs.read", json!([h, 3])).unwrap(), encode_bytes(b"abc"));
        assert_eq!(call(&fs, &cx, "fs.read", json!([h, 3])).unwrap(), encode_bytes(b"d"));
        assert_eq!(call(&fs, &cx, "fs.read", json!([h, 3])).unwrap(), Value::Null);

        let h = call(&fs, &cx, "fs.open", json!([path, O_CREATE | O_EXCL | O_WRONLY])).unwrap_err();
        assert_eq!(h.kind(), crate::error::ErrorKind::Other);
    }

    #[test]
    fn test_read_dir_stat_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cx = context(dir.path(), &[], &["**"]);
        let fs = Arc::new(FsModule::default());
        let root = dir.path().to_string_lossy().to_string();
        std::fs::write(dir.path().join("b.txt"), "bb").unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();

        let listing = call(&fs, &cx, "fs.readDir", json!([root])).unwrap();
        assert_eq!(listing[0]["name"], "a");
        assert_eq!(listing[0]["isDir"], true);
        assert_eq!(listing[1]["size"], 2);

        let stat = call(&fs, &cx, "fs.stat", json!([format!("{root}/b.txt")])).unwrap();
        assert_eq!(stat["isFile"], true);

        call(&fs, &cx, "fs.truncate", json!([format!("{root}/b.txt"), 1])).unwrap();
        assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"b");

        call(&fs, &cx, "fs.removeAll", json!([format!("{root}/a")])).unwrap();
        call(&fs, &cx, "fs.removeAll", json!([format!("{root}/missing")])).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_unwrap_and_move() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("extract");
        std::fs::create_dir_all(src.join("pkg/pkg")).unwrap();
        std::fs::write(src.join("pkg/readme"), "r").unwrap();
        unwrap_and_move("t", &src, &src).unwrap();
        assert!(src.join("readme").is_file());
        assert!(src.join("pkg").is_dir());

        let dst = dir.path().join("out");
        unwrap_and_move("t", &src, &dst).unwrap();
        assert!(dst.join("readme").is_file());
        assert!(!src.exists());
    }
}
