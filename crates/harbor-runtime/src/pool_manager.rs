//! Extension id to [`Pool`] map with lazy creation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::pool::{Initializer, Pool, PoolMetrics, Poolable};

/// Per-extension pools sharing one capacity setting.
pub struct PoolManager<T: Poolable> {
    capacity: usize,
    pools: RwLock<HashMap<String, Arc<Pool<T>>>>,
}

impl<T: Poolable> std::fmt::Debug for PoolManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("capacity", &self.capacity)
            .field("pools", &self.len())
            .finish()
    }
}

impl<T: Poolable> PoolManager<T> {
    /// Manager creating pools of `capacity` instances each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Pool for `extension_id`, creating it with `init` on first reference.
    /// `init` is not called when the pool already exists.
    pub fn get_or_create(&self, extension_id: &str, init: impl FnOnce() -> Initializer<T>) -> Arc<Pool<T>> {
        if let Some(pool) = self.get(extension_id) {
            return pool;
        }
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.get(extension_id) {
            return Arc::clone(pool);
        }
        let pool = Pool::new(extension_id, self.capacity, init());
        pools.insert(extension_id.to_string(), Arc::clone(&pool));
        debug!(extension_id, capacity = self.capacity, "pool created");
        pool
    }

    /// Install a fresh pool for `extension_id`, displacing any existing one.
    ///
    /// The displaced pool is left open; its owner closes it on teardown.
    pub fn replace(&self, extension_id: &str, init: impl FnOnce() -> Initializer<T>) -> Arc<Pool<T>> {
        let pool = Pool::new(extension_id, self.capacity, init());
        let displaced = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(extension_id.to_string(), Arc::clone(&pool));
        debug!(
            extension_id,
            capacity = self.capacity,
            displaced = displaced.is_some(),
            "pool replaced"
        );
        pool
    }

    /// Existing pool for `extension_id`.
    #[must_use]
    pub fn get(&self, extension_id: &str) -> Option<Arc<Pool<T>>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(extension_id)
            .cloned()
    }

    /// Clean up and forget the pool of `extension_id`.
    pub fn remove(&self, extension_id: &str) -> bool {
        let removed = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(extension_id);
        match removed {
            Some(pool) => {
                pool.cleanup();
                true
            },
            None => false,
        }
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no pool exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters of every pool, sorted by extension id.
    #[must_use]
    pub fn metrics(&self) -> Vec<(String, PoolMetrics)> {
        let mut out: Vec<(String, PoolMetrics)> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, pool)| (id.clone(), pool.metrics()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Clean up every pool and empty the map.
    pub fn cleanup(&self) {
        let pools: Vec<Arc<Pool<T>>> = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::InterruptHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Unit(InterruptHandle);

    impl Poolable for Unit {
        fn interrupt_handle(&self) -> InterruptHandle {
            self.0.clone()
        }
    }

    fn init() -> Initializer<Unit> {
        Arc::new(|| Ok(Unit(InterruptHandle::default())))
    }

    #[test]
    fn test_lazy_creation_is_shared() {
        let manager: PoolManager<Unit> = PoolManager::new(3);
        let calls = AtomicUsize::new(0);
        let a = manager.get_or_create("ext", || {
            calls.fetch_add(1, Ordering::SeqCst);
            init()
        });
        let b = manager.get_or_create("ext", || {
            calls.fetch_add(1, Ordering::SeqCst);
            init()
        });
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.capacity(), 3);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_concurrent_first_reference() {
        let manager: Arc<PoolManager<Unit>> = Arc::new(PoolManager::new(1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&manager);
                std::thread::spawn(move || m.get_or_create("race", init))
            })
            .collect();
        let pools: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(pools.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[tokio::test]
    async fn test_cleanup_closes_all() {
        let manager: PoolManager<Unit> = PoolManager::new(1);
        let a = manager.get_or_create("a", init);
        let b = manager.get_or_create("b", init);
        assert_eq!(manager.metrics().len(), 2);
        manager.cleanup();
        assert!(manager.is_empty());
        assert!(a.is_closed() && b.is_closed());
        assert!(a.get(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_replace_leaves_displaced_pool_open() {
        let manager: PoolManager<Unit> = PoolManager::new(1);
        let old = manager.get_or_create("x", init);
        let new = manager.replace("x", init);
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(!old.is_closed());
        assert!(old.get(Duration::from_millis(50)).await.is_ok());
        assert!(Arc::ptr_eq(&manager.get("x").unwrap(), &new));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove() {
        let manager: PoolManager<Unit> = PoolManager::new(1);
        let pool = manager.get_or_create("x", init);
        assert!(manager.remove("x"));
        assert!(!manager.remove("x"));
        assert!(pool.is_closed());
    }
}
