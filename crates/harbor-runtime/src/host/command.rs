//! Command execution (`$os.cmd`, `$osExtra.asyncCmd`; `system` scope).
//!
//! A command line is authorized once, when the command object is created.
//! Synchronous methods block the interpreter thread the way the script
//! expects; the async variant streams lines back through a callback.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::util::{decode_bytes, encode_bytes};
use super::{Args, Completions, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Default, Clone, Copy)]
struct Pipes {
    stdin: bool,
    stdout: bool,
    stderr: bool,
}

#[derive(Debug)]
struct Process {
    name: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    pipes: Pipes,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    status: Option<ExitStatus>,
}

impl Process {
    fn new(name: String, args: Vec<String>) -> Self {
        Self {
            name,
            args,
            dir: None,
            env: Vec::new(),
            pipes: Pipes::default(),
            child: None,
            stdin: None,
            stdout: None,
            stderr: None,
            status: None,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.name);
        cmd.args(&self.args);
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }

    fn start(&mut self, op: &str) -> RuntimeResult<()> {
        if self.child.is_some() || self.status.is_some() {
            return Err(RuntimeError::invalid_argument(op, "command already started"));
        }
        let piped = |on: bool| if on { Stdio::piped() } else { Stdio::null() };
        let mut child = self
            .command()
            .stdin(piped(self.pipes.stdin))
            .stdout(piped(self.pipes.stdout))
            .stderr(piped(self.pipes.stderr))
            .spawn()
            .map_err(|e| RuntimeError::io(op, e))?;
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take();
        self.stderr = child.stderr.take();
        self.child = Some(child);
        Ok(())
    }

    fn wait(&mut self, op: &str) -> RuntimeResult<i32> {
        if let Some(status) = self.status {
            return Ok(exit_code(status));
        }
        // Dropping stdin lets children that read to EOF finish.
        self.stdin = None;
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| RuntimeError::invalid_argument(op, "command not started"))?;
        let status = child.wait().map_err(|e| RuntimeError::io(op, e))?;
        self.status = Some(status);
        self.child = None;
        Ok(exit_code(status))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn signal_of(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: ExitStatus) -> Option<i32> {
    None
}

/// `$os.cmd` objects and `$osExtra.asyncCmd` runs.
pub(crate) struct CommandModule {
    processes: DashMap<u64, Arc<Mutex<Process>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl Default for CommandModule {
    fn default() -> Self {
        Self {
            processes: DashMap::new(),
            next_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }
}

impl CommandModule {
    fn process(&self, args: &Args<'_>) -> RuntimeResult<Arc<Mutex<Process>>> {
        let id = args.u64(0)?;
        self.processes
            .get(&id)
            .map(|p| Arc::clone(p.value()))
            .ok_or_else(|| RuntimeError::invalid_argument(args.op(), format!("unknown command {id}")))
    }

    fn with<T>(&self, args: &Args<'_>, f: impl FnOnce(&mut Process) -> RuntimeResult<T>) -> RuntimeResult<T> {
        let process = self.process(args)?;
        let mut guard = process.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn create(cx: &HostContext, args: &Args<'_>) -> RuntimeResult<(String, Vec<String>)> {
        let name = args.str(0)?.to_string();
        let argv = args.strings(1)?;
        cx.gate().check_command(args.op(), &name, &argv)?;
        debug!(extension_id = %cx.extension_id(), command = %name, ?argv, "command authorized");
        Ok((name, argv))
    }

    fn spawn_async(&self, cx: &HostContext, args: &Args<'_>) -> RuntimeResult<Value> {
        let (name, argv) = Self::create(cx, args)?;
        let callback = args.u64(2)?;
        let handle = cx.handle()?.clone();
        let completions = Arc::clone(cx.completions());
        let cancel = self.cancel.child_token();

        let mut cmd = tokio::process::Command::new(&name);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Spawn inside the runtime so the child is registered with its reactor.
        let _enter = handle.enter();
        let child = cmd.spawn().map_err(|e| RuntimeError::io(args.op(), e))?;
        handle.spawn(stream_child(child, callback, completions, cancel));
        Ok(Value::Null)
    }
}

async fn stream_child(
    mut child: tokio::process::Child,
    callback: u64,
    completions: Arc<Completions>,
    cancel: CancellationToken,
) {
    let mut stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
    let mut stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.start_kill();
                break;
            },
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Some(line) => completions.invoke(callback, vec![json!(line), Value::Null, Value::Null, Value::Null]),
                None => stdout = None,
            },
            line = next_line(&mut stderr), if stderr.is_some() => match line {
                Some(line) => completions.invoke(callback, vec![Value::Null, json!(line), Value::Null, Value::Null]),
                None => stderr = None,
            },
        }
    }
    let (code, signal) = match child.wait().await {
        Ok(status) => (json!(exit_code(status)), json!(signal_of(status))),
        Err(e) => {
            warn!(error = %e, "async command wait failed");
            (json!(-1), Value::Null)
        },
    };
    completions.invoke_once(callback, vec![Value::Null, Value::Null, code, signal]);
}

async fn next_line<R: tokio::io::AsyncBufRead + Unpin>(
    lines: &mut Option<tokio::io::Lines<R>>,
) -> Option<String> {
    match lines {
        Some(l) => l.next_line().await.ok().flatten(),
        None => None,
    }
}

fn read_pipe(op: &str, pipe: Option<&mut impl Read>, limit: Option<u64>) -> RuntimeResult<Value> {
    let Some(pipe) = pipe else {
        return Err(RuntimeError::invalid_argument(op, "pipe not open"));
    };
    let mut buf = Vec::new();
    match limit {
        Some(n) => pipe.take(n).read_to_end(&mut buf),
        None => pipe.read_to_end(&mut buf),
    }
    .map_err(|e| RuntimeError::io(op, e))?;
    if buf.is_empty() && limit.is_some_and(|n| n > 0) {
        return Ok(Value::Null);
    }
    Ok(encode_bytes(&buf))
}

impl HostModule for CommandModule {
    fn namespace(&self) -> &'static str {
        "cmd"
    }

    #[allow(clippy::too_many_lines)]
    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        let op = args.op();
        match method {
            "new" => {
                let (name, argv) = Self::create(cx, args)?;
                let id = self.next_id.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                self.processes
                    .insert(id, Arc::new(Mutex::new(Process::new(name, argv))));
                Ok(json!(id))
            },
            "setDir" => {
                let dir = cx.gate().check_read(op, Path::new(args.str(1)?))?;
                self.with(args, |p| {
                    p.dir = Some(dir);
                    Ok(Value::Null)
                })
            },
            "setEnv" => {
                let env: Vec<String> = args.strings(1)?;
                self.with(args, |p| {
                    p.env = env
                        .iter()
                        .filter_map(|kv| kv.split_once('='))
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect();
                    Ok(Value::Null)
                })
            },
            "stdoutPipe" | "stderrPipe" | "stdinPipe" => self.with(args, |p| {
                if p.child.is_some() {
                    return Err(RuntimeError::invalid_argument(op, "pipe requested after start"));
                }
                match method {
                    "stdoutPipe" => p.pipes.stdout = true,
                    "stderrPipe" => p.pipes.stderr = true,
                    _ => p.pipes.stdin = true,
                }
                Ok(Value::Null)
            }),
            "start" => self.with(args, |p| p.start(op).map(|()| Value::Null)),
            "wait" => self.with(args, |p| p.wait(op).map(|code| json!(code))),
            "run" => self.with(args, |p| {
                p.start(op)?;
                p.wait(op).map(|code| json!(code))
            }),
            "output" | "combinedOutput" => self.with(args, |p| {
                if p.child.is_some() || p.status.is_some() {
                    return Err(RuntimeError::invalid_argument(op, "command already started"));
                }
                let mut cmd = p.command();
                cmd.stdin(Stdio::null());
                let output = cmd.output().map_err(|e| RuntimeError::io(op, e))?;
                p.status = Some(output.status);
                let mut bytes = output.stdout;
                if method == "combinedOutput" {
                    bytes.extend_from_slice(&output.stderr);
                }
                Ok(json!({
                    "data": encode_bytes(&bytes),
                    "exitCode": exit_code(output.status),
                }))
            }),
            "readStdout" => self.with(args, |p| read_pipe(op, p.stdout.as_mut(), args.opt_u64(1))),
            "readStderr" => self.with(args, |p| read_pipe(op, p.stderr.as_mut(), args.opt_u64(1))),
            "writeStdin" => {
                let data = decode_bytes(op, args.str(1)?)?;
                self.with(args, |p| {
                    let stdin = p
                        .stdin
                        .as_mut()
                        .ok_or_else(|| RuntimeError::invalid_argument(op, "stdin not open"))?;
                    stdin.write_all(&data).map_err(|e| RuntimeError::io(op, e))?;
                    Ok(json!(data.len()))
                })
            },
            "closeStdin" => self.with(args, |p| {
                p.stdin = None;
                Ok(Value::Null)
            }),
            "exitCode" => self.with(args, |p| {
                if p.status.is_none()
                    && let Some(child) = p.child.as_mut()
                    && let Ok(Some(status)) = child.try_wait()
                {
                    p.status = Some(status);
                }
                Ok(p.status.map_or(Value::Null, |s| json!(exit_code(s))))
            }),
            "kill" => self.with(args, |p| {
                if let Some(child) = p.child.as_mut() {
                    child.kill().map_err(|e| RuntimeError::io(op, e))?;
                }
                Ok(Value::Null)
            }),
            "release" => {
                let id = args.u64(0)?;
                self.processes.remove(&id);
                Ok(Value::Null)
            },
            "async" => self.spawn_async(cx, args),
            _ => Err(unknown_method("cmd", method)),
        }
    }

    fn shutdown(&self) {
        self.cancel.cancel();
        for entry in &self.processes {
            let mut process = entry.value().lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(child) = process.child.as_mut() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        self.processes.clear();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::host::testing;
    use harbor_core::{AllowList, CommandArg, CommandScope, PermissionManifest, Scope};

    fn context(dir: &Path) -> HostContext {
        let manifest = PermissionManifest {
            scopes: vec![Scope::System],
            allow: AllowList {
                read_paths: vec![format!("{}/**", dir.display())],
                command_scopes: vec![
                    CommandScope {
                        description: None,
                        command: "ls".into(),
                        args: vec![CommandArg::literal("-la"), CommandArg::validator("$PATH")],
                    },
                    CommandScope {
                        description: None,
                        command: "sh".into(),
                        args: vec![CommandArg::literal("-c"), CommandArg::validator("$ANY")],
                    },
                ],
                ..Default::default()
            },
        };
        testing::context(&manifest)
    }

    fn call(m: &Arc<CommandModule>, cx: &HostContext, op: &str, args: Value) -> RuntimeResult<Value> {
        testing::call(Arc::clone(m) as Arc<dyn HostModule>, cx, op, args)
    }

    #[test]
    fn test_authorization() {
        let dir = tempfile::tempdir().unwrap();
        let cx = context(dir.path());
        let m = Arc::new(CommandModule::default());
        let id = call(&m, &cx, "cmd.new", json!(["ls", ["-la", dir.path()]])).unwrap();
        let code = call(&m, &cx, "cmd.run", json!([id])).unwrap();
        assert_eq!(code, 0);

        let err = call(&m, &cx, "cmd.new", json!(["open", ["https://x"]])).unwrap_err();
        assert!(err.to_string().contains("not authorized"));
        let err = call(&m, &cx, "cmd.new", json!(["ls", ["-la", "/"]])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unauthorized);
    }

    #[test]
    fn test_output_and_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let cx = context(dir.path());
        let m = Arc::new(CommandModule::default());

        let id = call(&m, &cx, "cmd.new", json!(["sh", ["-c", "echo out; echo err >&2; exit 3"]])).unwrap();
        let out = call(&m, &cx, "cmd.combinedOutput", json!([id])).unwrap();
        assert_eq!(out["exitCode"], 3);
        let text = decode_bytes("t", out["data"].as_str().unwrap()).unwrap();
        assert_eq!(String::from_utf8(text).unwrap(), "out\nerr\n");
        assert_eq!(call(&m, &cx, "cmd.exitCode", json!([id])).unwrap(), 3);

        let id = call(&m, &cx, "cmd.new", json!(["sh", ["-c", "cat"]])).unwrap();
        call(&m, &cx, "cmd.stdinPipe", json!([id])).unwrap();
        call(&m, &cx, "cmd.stdoutPipe", json!([id])).unwrap();
        call(&m, &cx, "cmd.start", json!([id])).unwrap();
        call(&m, &cx, "cmd.writeStdin", json!([id, encode_bytes(b"ping")])).unwrap();
        call(&m, &cx, "cmd.closeStdin", json!([id])).unwrap();
        let read = call(&m, &cx, "cmd.readStdout", json!([id])).unwrap();
        assert_eq!(read, encode_bytes(b"ping"));
        assert_eq!(call(&m, &cx, "cmd.wait", json!([id])).unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_streams_lines_then_exit() {
        let dir = tempfile::tempdir().unwrap();
        let cx = context(dir.path());
        let m = Arc::new(CommandModule::default());
        call(&m, &cx, "cmd.async", json!(["sh", ["-c", "echo a; echo b; exit 2"], 9])).unwrap();

        let mut items = Vec::new();
        for _ in 0..300 {
            items.extend(cx.completions().drain());
            if items.iter().any(|i| i["release"] == true) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let lines: Vec<&Value> = items.iter().map(|i| &i["args"][0]).filter(|v| !v.is_null()).collect();
        assert_eq!(lines, vec![&json!("a"), &json!("b")]);
        let last = items.last().unwrap();
        assert_eq!(last["callback"], 9);
        assert_eq!(last["args"][2], 2);
    }
}
