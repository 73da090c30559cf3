//! Single-worker job queue.
//!
//! A [`Scheduler`] owns one OS thread and the state `S` living on it (for
//! plugins, the interpreter). Jobs run one at a time in submission order, so
//! nothing touching `S` ever runs concurrently. Panics are trapped per job.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{RuntimeError, RuntimeResult, panic_message};

/// Receives errors of fire-and-forget jobs.
pub type ErrorHandler = Arc<dyn Fn(RuntimeError) + Send + Sync>;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Message<S> {
    Run(Job<S>),
    Stop,
}

struct Inner<S> {
    name: String,
    tx: mpsc::UnboundedSender<Message<S>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message<S>>>>,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: OnceLock<ThreadId>,
    on_error: RwLock<Option<ErrorHandler>>,
}

/// FIFO executor bound to one worker thread.
pub struct Scheduler<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: 'static> std::fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.inner.name)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl<S: 'static> Scheduler<S> {
    /// Create a scheduler. Jobs submitted before [`start`](Self::start)
    /// are queued and run once the worker is up.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                tx,
                rx: Mutex::new(Some(rx)),
                stopped: AtomicBool::new(false),
                worker: Mutex::new(None),
                worker_id: OnceLock::new(),
                on_error: RwLock::new(None),
            }),
        }
    }

    /// Name used for the worker thread and errors.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Whether the caller is running on the worker thread.
    #[must_use]
    pub fn on_worker(&self) -> bool {
        self.inner.worker_id.get() == Some(&std::thread::current().id())
    }

    /// Install the handler for errors of [`submit_async`](Self::submit_async) jobs.
    pub fn set_error_handler(&self, handler: ErrorHandler) {
        *self
            .inner
            .on_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Spawn the worker and build its state with `init` on it.
    ///
    /// Blocks until `init` returns.
    ///
    /// # Errors
    ///
    /// Returns the error of `init`, or [`RuntimeError::Internal`] if the
    /// scheduler was already started or the thread could not be spawned.
    pub fn start<F>(&self, init: F) -> RuntimeResult<()>
    where
        F: FnOnce() -> RuntimeResult<S> + Send + 'static,
    {
        let mut rx = self
            .inner
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| RuntimeError::Internal(format!("scheduler {} already started", self.inner.name)))?;

        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<RuntimeResult<()>>(1);
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(format!("harbor-{}", self.inner.name))
            .spawn(move || {
                let _ = inner.worker_id.set(std::thread::current().id());
                let span = harbor_telemetry::extension_span(&inner.name);
                let _entered = span.enter();

                let init = std::panic::catch_unwind(AssertUnwindSafe(init)).unwrap_or_else(|p| {
                    Err(RuntimeError::ProviderPanic {
                        context: format!("{} init", inner.name),
                        message: panic_message(p.as_ref()),
                    })
                });
                let mut state = match init {
                    Ok(state) => {
                        let _ = ready_tx.send(Ok(()));
                        state
                    },
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    },
                };

                while let Some(message) = rx.blocking_recv() {
                    let Message::Run(job) = message else {
                        break;
                    };
                    if inner.stopped.load(Ordering::Acquire) {
                        // Dropping the job drops its reply channel.
                        continue;
                    }
                    if let Err(p) = std::panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))) {
                        error!(scheduler = %inner.name, panic = %panic_message(p.as_ref()), "job panicked");
                    }
                }
                rx.close();
                while rx.try_recv().is_ok() {}
                drop(state);
                debug!(scheduler = %inner.name, "worker exited");
            })
            .map_err(|e| RuntimeError::Internal(format!("failed to spawn scheduler thread: {e}")))?;

        *self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        ready_rx
            .recv()
            .map_err(|_| RuntimeError::Internal(format!("scheduler {} died during init", self.inner.name)))?
    }

    fn stopped_error(&self) -> RuntimeError {
        RuntimeError::SchedulerStopped {
            extension_id: self.inner.name.clone(),
        }
    }

    fn enqueue(&self, job: Job<S>) -> RuntimeResult<()> {
        if self.is_stopped() {
            return Err(self.stopped_error());
        }
        self.inner
            .tx
            .send(Message::Run(job))
            .map_err(|_| self.stopped_error())
    }

    fn wrap<R, F>(&self, f: F, reply: impl FnOnce(RuntimeResult<R>) + Send + 'static) -> Job<S>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> RuntimeResult<R> + Send + 'static,
    {
        let name = self.inner.name.clone();
        Box::new(move |state: &mut S| {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(state))).unwrap_or_else(|p| {
                Err(RuntimeError::ProviderPanic {
                    context: name,
                    message: panic_message(p.as_ref()),
                })
            });
            reply(result);
        })
    }

    /// Run `f` on the worker and wait for its result.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::SchedulerStopped`] if the scheduler stops before the
    /// job runs, otherwise whatever `f` returns.
    pub async fn submit<R, F>(&self, f: F) -> RuntimeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> RuntimeResult<R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue(self.wrap(f, move |r| {
            let _ = tx.send(r);
        }))?;
        rx.await.map_err(|_| self.stopped_error())?
    }

    /// [`submit`](Self::submit) with a deadline. The job keeps its place in
    /// the queue after a timeout; the worker is never preempted.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Timeout`] once `timeout` elapses.
    pub async fn submit_timeout<R, F>(&self, f: F, timeout: Duration) -> RuntimeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> RuntimeResult<R> + Send + 'static,
    {
        let started = Instant::now();
        tokio::time::timeout(timeout, self.submit(f))
            .await
            .map_err(|_| RuntimeError::Timeout {
                operation: format!("scheduler {} submit", self.inner.name),
                elapsed_ms: elapsed_ms(started),
            })?
    }

    /// Run `f` on the worker, blocking the calling thread until it finishes.
    ///
    /// # Errors
    ///
    /// As [`submit_timeout`](Self::submit_timeout). Calling this from the
    /// worker itself fails with [`RuntimeError::Internal`] instead of
    /// deadlocking.
    pub fn submit_blocking<R, F>(&self, f: F, timeout: Duration) -> RuntimeResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> RuntimeResult<R> + Send + 'static,
    {
        if self.on_worker() {
            return Err(RuntimeError::Internal(format!(
                "blocking submit from the worker of {} would deadlock",
                self.inner.name
            )));
        }
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        self.enqueue(self.wrap(f, move |r| {
            let _ = tx.send(r);
        }))?;
        let started = Instant::now();
        match rx.recv_timeout(timeout) {
            Ok(r) => r,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(RuntimeError::Timeout {
                operation: format!("scheduler {} submit", self.inner.name),
                elapsed_ms: elapsed_ms(started),
            }),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(self.stopped_error()),
        }
    }

    /// Queue `f` without waiting. Its error, if any, goes to the error
    /// handler.
    pub fn submit_async<F>(&self, f: F)
    where
        F: FnOnce(&mut S) -> RuntimeResult<()> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let job = self.wrap(f, move |r: RuntimeResult<()>| {
            if let Err(e) = r {
                let handler = inner
                    .on_error
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(e),
                    None => warn!(scheduler = %inner.name, error = %e, "async job failed"),
                }
            }
        });
        if self.enqueue(job).is_err() {
            debug!(scheduler = %self.inner.name, "job dropped, scheduler stopped");
        }
    }

    /// Stop the worker. Queued jobs are dropped and their submitters get
    /// [`RuntimeError::SchedulerStopped`]; a job already running finishes.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.inner.tx.send(Message::Stop);
        // A never-started scheduler still owns its receiver.
        self.inner
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(scheduler = %self.inner.name, "scheduler stopped");
    }

    /// Wait for the worker thread to exit. No-op on the worker itself.
    pub fn join(&self) {
        if self.on_worker() {
            return;
        }
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!(scheduler = %self.inner.name, "worker thread panicked");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn started(name: &str) -> Scheduler<Vec<u32>> {
        let s = Scheduler::new(name);
        s.start(|| Ok(Vec::new())).unwrap();
        s
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let s = started("fifo");
        for i in 0..50 {
            s.submit_async(move |v: &mut Vec<u32>| {
                v.push(i);
                Ok(())
            });
        }
        let seen = s.submit(|v: &mut Vec<u32>| Ok(v.clone())).await.unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        s.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_jobs_never_overlap() {
        let s = started("overlap");
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let s = s.clone();
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let active = Arc::clone(&active);
                    let max_seen = Arc::clone(&max_seen);
                    s.submit(move |_| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(1));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
                    .unwrap();
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        s.stop();
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let s = started("panic");
        let err = s
            .submit(|_| -> RuntimeResult<()> { panic!("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ProviderPanic { ref message, .. } if message == "boom"));
        // The worker survives.
        assert_eq!(s.submit(|_| Ok(1)).await.unwrap(), 1);
        s.stop();
    }

    #[tokio::test]
    async fn test_submit_after_stop() {
        let s = started("stop");
        s.stop();
        let err = s.submit(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, RuntimeError::SchedulerStopped { .. }));
        s.join();
    }

    #[tokio::test]
    async fn test_submit_timeout_keeps_worker() {
        let s = started("timeout");
        s.submit_async(|_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        });
        let err = s
            .submit_timeout(|_| Ok(()), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }));
        assert_eq!(s.submit(|_| Ok(7)).await.unwrap(), 7);
        s.stop();
    }

    #[test]
    fn test_blocking_submit_and_error_handler() {
        let s = started("blocking");
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        s.set_error_handler(Arc::new(move |e| sink.lock().unwrap().push(e.to_string())));
        s.submit_async(|_| Err(RuntimeError::script("bad handler")));
        let len = s
            .submit_blocking(|v: &mut Vec<u32>| Ok(v.len()), Duration::from_secs(1))
            .unwrap();
        assert_eq!(len, 0);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(errors.lock().unwrap()[0].contains("bad handler"));
        s.stop();
        s.join();
    }

    #[test]
    fn test_init_failure_is_returned() {
        let s: Scheduler<()> = Scheduler::new("init");
        let err = s
            .start(|| Err(RuntimeError::script("compile failed")))
            .unwrap_err();
        assert!(err.to_string().contains("compile failed"));
        assert!(s.start(|| Ok(())).is_err());
    }
}
