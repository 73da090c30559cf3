//! Background downloads (`$downloader`; `system` scope).
//!
//! Each job streams a response body into a write-authorized file. Watchers
//! receive a progress snapshot every second while the job is active and
//! exactly one final snapshot once it reaches a terminal state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetch::build_client;
use super::{Args, Completions, HostContext, HostModule, unknown_method};
use crate::error::{RuntimeError, RuntimeResult};

/// Watcher cadence.
const TICK: Duration = Duration::from_secs(1);

/// Lifecycle of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Accepted, not yet connected.
    Queued,
    /// Receiving the body.
    Downloading,
    /// Body fully written.
    Completed,
    /// Transfer failed.
    Error,
    /// Stopped by the script or by plugin teardown.
    Cancelled,
}

impl DownloadStatus {
    /// Whether no further updates follow.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Snapshot handed to watchers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    /// Job id.
    pub id: String,
    /// Source URL.
    pub url: String,
    /// Target file.
    pub destination: PathBuf,
    /// Bytes written so far.
    pub total_bytes: u64,
    /// Announced body size, 0 when unknown.
    pub total_size: u64,
    /// Average bytes per second.
    pub speed: f64,
    /// Completion in percent, 0 when the size is unknown.
    pub percentage: f64,
    /// Current state.
    pub status: DownloadStatus,
    /// Failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time of the last update.
    pub last_update: DateTime<Utc>,
    /// Time the job was accepted.
    pub start_time: DateTime<Utc>,
}

struct Job {
    progress: Mutex<DownloadProgress>,
    watchers: Mutex<Vec<u64>>,
    finished: AtomicBool,
    cancel: CancellationToken,
    started: Instant,
    completions: Arc<Completions>,
}

impl Job {
    fn snapshot(&self) -> DownloadProgress {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn snapshot_json(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }

    #[allow(clippy::cast_precision_loss)]
    fn advance(&self, written: u64) {
        let mut p = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        p.total_bytes = written;
        p.status = DownloadStatus::Downloading;
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            p.speed = written as f64 / secs;
        }
        if p.total_size > 0 {
            p.percentage = (written as f64 / p.total_size as f64 * 100.0).min(100.0);
        }
        p.last_update = Utc::now();
    }

    fn set_size(&self, size: u64) {
        let mut p = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        p.total_size = size;
        p.status = DownloadStatus::Downloading;
    }

    /// Periodic update to every watcher, unless the job already ended.
    fn tick(&self) {
        let watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        let snapshot = self.snapshot_json();
        for w in watchers.iter() {
            self.completions.invoke(*w, vec![snapshot.clone()]);
        }
    }

    /// Enter a terminal state and deliver the final update once.
    fn finish(&self, status: DownloadStatus, error: Option<String>) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut p = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
            p.status = status;
            p.error = error;
            p.last_update = Utc::now();
            if status == DownloadStatus::Completed {
                p.percentage = 100.0;
            }
        }
        let snapshot = self.snapshot_json();
        for w in watchers.drain(..) {
            self.completions.invoke_once(w, vec![snapshot.clone()]);
        }
    }

    fn watch(&self, callback: u64) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.finished.load(Ordering::Acquire) {
            self.completions.invoke_once(callback, vec![self.snapshot_json()]);
        } else {
            watchers.push(callback);
        }
    }
}

/// `$downloader` jobs of one interpreter.
pub(crate) struct DownloaderModule {
    jobs: Arc<DashMap<String, Arc<Job>>>,
    cancel: CancellationToken,
}

impl Default for DownloaderModule {
    fn default() -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Default, serde::Deserialize)]
struct DownloadOptions {
    /// Seconds.
    #[serde(default)]
    timeout: Option<f64>,
}

impl DownloaderModule {
    fn job(&self, args: &Args<'_>) -> RuntimeResult<Arc<Job>> {
        let id = args.str(0)?;
        self.jobs
            .get(id)
            .map(|j| Arc::clone(j.value()))
            .ok_or_else(|| RuntimeError::invalid_argument(args.op(), format!("unknown download {id}")))
    }

    fn download(&self, cx: &HostContext, args: &Args<'_>) -> RuntimeResult<Value> {
        let url = cx.gate().check_url(args.op(), args.str(0)?)?;
        let destination = cx.gate().check_write(args.op(), Path::new(args.str(1)?))?;
        let options: DownloadOptions = if args.value(2).is_null() {
            DownloadOptions::default()
        } else {
            args.decode(2)?
        };
        let deadline = options
            .timeout
            .filter(|t| t.is_finite() && *t > 0.0)
            .map(Duration::from_secs_f64);
        let handle = cx.handle()?.clone();
        let client = build_client(cx.gate().domains())?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let job = Arc::new(Job {
            progress: Mutex::new(DownloadProgress {
                id: id.clone(),
                url: url.to_string(),
                destination: destination.clone(),
                total_bytes: 0,
                total_size: 0,
                speed: 0.0,
                percentage: 0.0,
                status: DownloadStatus::Queued,
                error: None,
                last_update: now,
                start_time: now,
            }),
            watchers: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
            cancel: self.cancel.child_token(),
            started: Instant::now(),
            completions: Arc::clone(cx.completions()),
        });
        self.jobs.insert(id.clone(), Arc::clone(&job));
        info!(extension_id = %cx.extension_id(), download_id = %id, url = %url, "download started");

        handle.spawn(run_job(job, client, url, destination, deadline));
        Ok(json!(id))
    }
}

async fn run_job(
    job: Arc<Job>,
    client: Client,
    url: url::Url,
    destination: PathBuf,
    deadline: Option<Duration>,
) {
    let ticker = {
        let job = Arc::clone(&job);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK);
            interval.tick().await;
            while !job.finished.load(Ordering::Acquire) {
                interval.tick().await;
                job.tick();
            }
        })
    };

    let transfer = transfer(&job, client, url, &destination);
    let outcome = tokio::select! {
        () = job.cancel.cancelled() => Err((DownloadStatus::Cancelled, None)),
        r = async {
            match deadline {
                Some(d) => tokio::time::timeout(d, transfer)
                    .await
                    .unwrap_or_else(|_| Err("download timed out".to_string())),
                None => transfer.await,
            }
        } => r.map_err(|e| (DownloadStatus::Error, Some(e))),
    };

    match outcome {
        Ok(()) => job.finish(DownloadStatus::Completed, None),
        Err((status, error)) => {
            if let Err(e) = tokio::fs::remove_file(&destination).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                warn!(path = %destination.display(), error = %e, "failed to remove partial download");
            }
            debug!(status = ?status, error = ?error, "download ended");
            job.finish(status, error);
        },
    }
    ticker.abort();
}

async fn transfer(job: &Job, client: Client, url: url::Url, destination: &Path) -> Result<(), String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| e.to_string())?;
    job.set_size(response.content_length().unwrap_or(0));
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
    }
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| e.to_string())?;
    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.to_string())?;
        file.write_all(&chunk).await.map_err(|e| e.to_string())?;
        written = written.saturating_add(u64::try_from(chunk.len()).unwrap_or(u64::MAX));
        job.advance(written);
    }
    file.flush().await.map_err(|e| e.to_string())?;
    Ok(())
}

impl HostModule for DownloaderModule {
    fn namespace(&self) -> &'static str {
        "downloader"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        match method {
            "download" => self.download(cx, args),
            "watch" => {
                let job = self.job(args)?;
                job.watch(args.u64(1)?);
                Ok(Value::Null)
            },
            "getProgress" => Ok(self
                .jobs
                .get(args.str(0)?)
                .map_or(Value::Null, |j| j.snapshot_json())),
            "listDownloads" => {
                let mut all: Vec<DownloadProgress> = self.jobs.iter().map(|j| j.snapshot()).collect();
                all.sort_by_key(|p| p.start_time);
                Ok(serde_json::to_value(all)?)
            },
            "cancel" => {
                self.job(args)?.cancel.cancel();
                Ok(Value::Null)
            },
            "cancelAll" => {
                for job in self.jobs.iter() {
                    job.cancel.cancel();
                }
                Ok(Value::Null)
            },
            _ => Err(unknown_method("downloader", method)),
        }
    }

    fn shutdown(&self) {
        self.cancel.cancel();
    }
}
