//! Bounded pool of interpreters for one extension.
//!
//! Admission is a semaphore with one permit per slot: a lease holds a permit
//! for as long as the caller owns the instance, so `active` can never exceed
//! the capacity. Leases return themselves on drop, which keeps the counters
//! balanced on every exit path including unwinding.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{RuntimeError, RuntimeResult};
use crate::interpreter::{InterruptHandle, Interpreter};

/// Something a [`Pool`] can hold.
pub trait Poolable: Send + 'static {
    /// Switch used to abort the instance from another thread. Cleared when
    /// the instance is returned.
    fn interrupt_handle(&self) -> InterruptHandle;
}

impl Poolable for Interpreter {
    fn interrupt_handle(&self) -> InterruptHandle {
        Interpreter::interrupt_handle(self)
    }
}

/// Builds a fresh instance when the pool has room and nothing idle.
pub type Initializer<T> = Arc<dyn Fn() -> RuntimeResult<T> + Send + Sync>;

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMetrics {
    /// Instances built by the initializer.
    pub created: u64,
    /// Acquisitions served from the idle queue.
    pub reused: u64,
    /// Initializer failures and discarded instances.
    pub errors: u64,
    /// Acquisitions that gave up waiting.
    pub timeouts: u64,
    /// Instances currently leased.
    pub active: usize,
    /// Instances waiting in the idle queue.
    pub idle: usize,
    /// Fixed capacity.
    pub capacity: usize,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Fixed-capacity pool of `T`.
pub struct Pool<T: Poolable> {
    name: String,
    capacity: usize,
    init: Initializer<T>,
    idle: Mutex<VecDeque<T>>,
    permits: Arc<Semaphore>,
    leased: Mutex<HashMap<u64, InterruptHandle>>,
    next_lease: AtomicU64,
    active: AtomicUsize,
    counters: Counters,
    closed: AtomicBool,
    closing: CancellationToken,
}

impl<T: Poolable> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("metrics", &self.metrics())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<T: Poolable> Pool<T> {
    /// Pool named after its extension, holding at most `capacity` instances.
    #[must_use]
    pub fn new(name: impl Into<String>, capacity: usize, init: Initializer<T>) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            name: name.into(),
            capacity,
            init,
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
            permits: Arc::new(Semaphore::new(capacity)),
            leased: Mutex::new(HashMap::new()),
            next_lease: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            counters: Counters::default(),
            closed: AtomicBool::new(false),
            closing: CancellationToken::new(),
        })
    }

    /// Owning extension.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Leased instances.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Whether [`cleanup`](Self::cleanup) ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            active: self.active(),
            idle: self.idle.lock().unwrap_or_else(PoisonError::into_inner).len(),
            capacity: self.capacity,
        }
    }

    fn closed_error(&self) -> RuntimeError {
        RuntimeError::PoolClosed {
            extension_id: self.name.clone(),
        }
    }

    /// Lease an instance, waiting at most `timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::PoolExhausted`] if no slot frees up in time.
    /// - [`RuntimeError::PoolClosed`] if the pool is or gets cleaned up.
    /// - Whatever the initializer returns when a new instance is needed.
    pub async fn get(self: &Arc<Self>, timeout: Duration) -> RuntimeResult<Lease<T>> {
        self.get_with(timeout, &CancellationToken::new()).await
    }

    /// [`get`](Self::get) that also gives up when `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`get`](Self::get); cancellation counts as a timeout.
    pub async fn get_with(self: &Arc<Self>, timeout: Duration, cancel: &CancellationToken) -> RuntimeResult<Lease<T>> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let started = Instant::now();
        let permit = tokio::select! {
            biased;
            () = self.closing.cancelled() => return Err(self.closed_error()),
            acquired = Arc::clone(&self.permits).acquire_owned() => {
                acquired.map_err(|_| self.closed_error())?
            },
            () = tokio::time::sleep(timeout) => {
                bump(&self.counters.timeouts);
                return Err(self.exhausted(started));
            },
            () = cancel.cancelled() => {
                bump(&self.counters.timeouts);
                return Err(self.exhausted(started));
            },
        };

        let resident = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let item = if let Some(item) = resident {
            bump(&self.counters.reused);
            item
        } else {
            let init = Arc::clone(&self.init);
            let built = tokio::task::spawn_blocking(move || init())
                .await
                .map_err(|e| RuntimeError::Internal(format!("pool initializer: {e}")))
                .and_then(|r| r);
            match built {
                Ok(item) => {
                    bump(&self.counters.created);
                    debug!(extension_id = %self.name, "pool instance created");
                    item
                },
                Err(e) => {
                    bump(&self.counters.errors);
                    return Err(e);
                },
            }
        };
        Ok(self.lease(item, permit))
    }

    /// Park an instance built elsewhere (the load-time compile check) in the
    /// idle queue. Returns `false` and drops it when the pool is closed or
    /// full.
    pub fn seed(&self, item: T) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len().saturating_add(self.active()) >= self.capacity {
            return false;
        }
        idle.push_back(item);
        bump(&self.counters.created);
        true
    }

    fn exhausted(&self, started: Instant) -> RuntimeError {
        RuntimeError::PoolExhausted {
            extension_id: self.name.clone(),
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn lease(self: &Arc<Self>, item: T, permit: OwnedSemaphorePermit) -> Lease<T> {
        let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
        self.leased
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, item.interrupt_handle());
        self.active.fetch_add(1, Ordering::AcqRel);
        trace!(extension_id = %self.name, lease = id, "leased");
        if self.is_closed() {
            item.interrupt_handle().interrupt();
        }
        Lease {
            pool: Arc::clone(self),
            id,
            item: Some(item),
            permit: Some(permit),
        }
    }

    fn put(&self, id: u64, item: Option<T>) {
        self.leased.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        let Some(item) = item else {
            return;
        };
        if self.is_closed() {
            item.interrupt_handle().interrupt();
            return;
        }
        item.interrupt_handle().clear();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.capacity {
            idle.push_back(item);
        } else {
            drop(idle);
            warn!(extension_id = %self.name, "idle queue full, instance discarded");
        }
    }

    /// Close the pool: interrupt every instance, drop the idle ones and fail
    /// waiting and future acquisitions fast. Leased instances are dropped
    /// when returned.
    pub fn cleanup(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closing.cancel();
        self.permits.close();
        for handle in self.leased.lock().unwrap_or_else(PoisonError::into_inner).values() {
            handle.interrupt();
        }
        let residents: Vec<T> = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for item in &residents {
            item.interrupt_handle().interrupt();
        }
        drop(residents);
        debug!(extension_id = %self.name, "pool cleaned up");
    }
}

/// A leased instance. Goes back to its pool when dropped.
pub struct Lease<T: Poolable> {
    pool: Arc<Pool<T>>,
    id: u64,
    item: Option<T>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<T: Poolable> std::fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<T: Poolable> Lease<T> {
    /// Return the slot but drop the instance instead of reusing it.
    pub fn discard(mut self) {
        if self.item.take().is_some() {
            bump(&self.pool.counters.errors);
        }
    }

    fn item(&self) -> &T {
        self.item.as_ref().unwrap_or_else(|| unreachable!("lease used after release"))
    }

    fn item_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!("lease used after release"))
    }
}

impl<T: Poolable> std::ops::Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item()
    }
}

impl<T: Poolable> std::ops::DerefMut for Lease<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item_mut()
    }
}

impl<T: Poolable> Drop for Lease<T> {
    fn drop(&mut self) {
        self.pool.put(self.id, self.item.take());
        // Releasing the permit last lets a waiter pick up the instance just queued.
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy {
        serial: u64,
        interrupt: InterruptHandle,
    }

    impl Poolable for Dummy {
        fn interrupt_handle(&self) -> InterruptHandle {
            self.interrupt.clone()
        }
    }

    fn pool(capacity: usize) -> Arc<Pool<Dummy>> {
        let serial = Arc::new(AtomicU64::new(0));
        Pool::new(
            "dummy",
            capacity,
            Arc::new(move || {
                Ok(Dummy {
                    serial: serial.fetch_add(1, Ordering::SeqCst),
                    interrupt: InterruptHandle::default(),
                })
            }),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission() {
        let p = pool(2);
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let p = Arc::clone(&p);
            tasks.push(tokio::spawn(async move { p.get(Duration::from_millis(100)).await }));
        }
        let mut leases = Vec::new();
        let mut failures = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(lease) => leases.push(lease),
                Err(e) => {
                    assert!(matches!(e, RuntimeError::PoolExhausted { .. }));
                    failures += 1;
                },
            }
        }
        assert_eq!(leases.len(), 2);
        assert_eq!(failures, 2);
        let m = p.metrics();
        assert_eq!(m.timeouts, 2);
        assert_eq!(m.created, 2);
        assert_eq!(m.active, 2);

        drop(leases);
        assert_eq!(p.active(), 0);
        let again = p.get(Duration::from_millis(100)).await.unwrap();
        assert_eq!(p.metrics().reused, 1);
        assert_eq!(p.metrics().created, 2);
        drop(again);
    }

    #[tokio::test]
    async fn test_waiter_gets_returned_instance() {
        let p = pool(1);
        let first = p.get(Duration::from_millis(50)).await.unwrap();
        let serial = first.serial;
        let waiter = {
            let p = Arc::clone(&p);
            tokio::spawn(async move { p.get(Duration::from_secs(2)).await.map(|l| l.serial) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(waiter.await.unwrap().unwrap(), serial);
    }

    #[tokio::test]
    async fn test_put_clears_interrupt() {
        let p = pool(1);
        let lease = p.get(Duration::from_millis(50)).await.unwrap();
        lease.interrupt_handle().interrupt();
        drop(lease);
        let lease = p.get(Duration::from_millis(50)).await.unwrap();
        assert!(!lease.interrupt_handle().is_interrupted());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_balanced_on_panic() {
        let p = pool(1);
        let inner = Arc::clone(&p);
        let outcome = tokio::spawn(async move {
            let _lease = inner.get(Duration::from_millis(50)).await.unwrap();
            panic!("caller blew up");
        })
        .await;
        assert!(outcome.is_err());
        assert_eq!(p.active(), 0);
        assert!(p.get(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_discard_frees_slot() {
        let p = pool(1);
        let lease = p.get(Duration::from_millis(50)).await.unwrap();
        lease.discard();
        let m = p.metrics();
        assert_eq!((m.active, m.idle, m.errors), (0, 0, 1));
        let _ = p.get(Duration::from_millis(50)).await.unwrap();
        assert_eq!(p.metrics().created, 2);
    }

    #[tokio::test]
    async fn test_initializer_failure_releases_slot() {
        let p: Arc<Pool<Dummy>> = Pool::new("broken", 1, Arc::new(|| Err(RuntimeError::script("no"))));
        assert!(p.get(Duration::from_millis(50)).await.is_err());
        assert!(p.get(Duration::from_millis(50)).await.is_err());
        let m = p.metrics();
        assert_eq!((m.errors, m.timeouts, m.active), (2, 0, 0));
    }

    #[tokio::test]
    async fn test_cleanup_interrupts_and_fails_fast() {
        let p = pool(2);
        let idle = p.get(Duration::from_millis(50)).await.unwrap();
        let idle_flag = idle.interrupt_handle();
        drop(idle);
        let busy = p.get(Duration::from_millis(50)).await.unwrap();
        let busy_flag = busy.interrupt_handle();

        p.cleanup();
        assert!(idle_flag.is_interrupted());
        assert!(busy_flag.is_interrupted());
        let err = p.get(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::PoolClosed { .. }));

        drop(busy);
        let m = p.metrics();
        assert_eq!((m.active, m.idle), (0, 0));
    }
}
