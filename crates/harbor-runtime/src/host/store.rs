//! `$store` (in-memory, watchable) and `$storage` (persistent), both under
//! the `storage` scope.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use harbor_storage::ScopedKvStore;
use serde_json::{Value, json};

use super::{Args, HostContext, HostModule, unknown_method};
use crate::error::RuntimeResult;

/// Plugin-lifetime key-value store with per-key watchers.
#[derive(Default)]
pub(crate) struct StoreModule {
    values: DashMap<String, Value>,
    watchers: Mutex<Vec<(String, u64)>>,
}

impl StoreModule {
    fn notify(&self, cx: &HostContext, key: &str, value: &Value) {
        let watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, callback) in watchers.iter().filter(|(k, _)| k == key) {
            cx.completions().invoke(*callback, vec![value.clone()]);
        }
    }
}

impl HostModule for StoreModule {
    fn namespace(&self) -> &'static str {
        "store"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        match method {
            "get" => Ok(self
                .values
                .get(args.str(0)?)
                .map_or(Value::Null, |v| v.value().clone())),
            "set" => {
                let key = args.str(0)?;
                let value = args.value(1).clone();
                self.values.insert(key.to_string(), value.clone());
                self.notify(cx, key, &value);
                Ok(Value::Null)
            },
            "has" => Ok(json!(self.values.contains_key(args.str(0)?))),
            "delete" => Ok(json!(self.values.remove(args.str(0)?).is_some())),
            "keys" => {
                let mut keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
                keys.sort();
                Ok(json!(keys))
            },
            "values" => {
                let mut entries: Vec<(String, Value)> = self
                    .values
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(Value::Array(entries.into_iter().map(|(_, v)| v).collect()))
            },
            "watch" => {
                let key = args.str(0)?.to_string();
                let callback = args.u64(1)?;
                self.watchers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((key, callback));
                Ok(Value::Null)
            },
            "unwatch" => {
                let callback = args.u64(0)?;
                self.watchers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(_, c)| *c != callback);
                cx.completions().release(callback);
                Ok(Value::Null)
            },
            _ => Err(unknown_method("store", method)),
        }
    }

    fn shutdown(&self) {
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Persistent storage scoped to the extension (`storage:<id>` bucket).
pub(crate) struct StorageModule;

impl StorageModule {
    fn scoped(cx: &HostContext) -> RuntimeResult<ScopedKvStore> {
        Ok(ScopedKvStore::new(
            cx.kv_store()?,
            format!("storage:{}", cx.extension_id()),
        )?)
    }
}

impl HostModule for StorageModule {
    fn namespace(&self) -> &'static str {
        "storage"
    }

    fn call(&self, cx: &HostContext, method: &str, args: &Args<'_>) -> RuntimeResult<Value> {
        let store = Self::scoped(cx)?;
        match method {
            "get" => {
                let key = args.str(0)?;
                Ok(cx.block_on(store.get(key))??.unwrap_or(Value::Null))
            },
            "set" => {
                let key = args.str(0)?;
                cx.block_on(store.set(key, args.value(1).clone()))??;
                Ok(Value::Null)
            },
            "remove" => {
                let key = args.str(0)?;
                Ok(json!(cx.block_on(store.delete(key))??))
            },
            "keys" => Ok(json!(cx.block_on(store.list_keys())??)),
            "clear" => Ok(json!(cx.block_on(store.clear())??)),
            _ => Err(unknown_method("storage", method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Services, testing};
    use crate::options::RuntimeOptions;
    use harbor_capabilities::CapabilityGate;
    use harbor_core::PermissionManifest;
    use harbor_storage::{KvStore, MemoryKvStore};
    use std::sync::Arc;

    #[test]
    fn test_store_watch() {
        let cx = testing::context(&PermissionManifest::default());
        let m = Arc::new(StoreModule::default());
        let call = |op: &str, args: Value| testing::call(Arc::clone(&m) as Arc<dyn HostModule>, &cx, op, args);

        call("store.watch", json!(["count", 3])).unwrap();
        call("store.set", json!(["count", 1])).unwrap();
        call("store.set", json!(["other", 2])).unwrap();
        assert_eq!(call("store.get", json!(["count"])).unwrap(), 1);
        assert_eq!(call("store.has", json!(["nope"])).unwrap(), false);
        assert_eq!(call("store.keys", json!([])).unwrap(), json!(["count", "other"]));
        assert_eq!(call("store.values", json!([])).unwrap(), json!([1, 2]));

        let items = cx.completions().drain();
        assert_eq!(items, vec![json!({"callback": 3, "args": [1]})]);
        assert_eq!(call("store.delete", json!(["count"])).unwrap(), true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_storage_is_scoped_per_extension() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let context = |id: &str| {
            HostContext::new(
                id,
                CapabilityGate::deny_all(),
                Arc::new(RuntimeOptions::default()),
                Services::new().with_kv_store(Arc::clone(&kv)),
                tokio::runtime::Handle::try_current().ok(),
            )
        };
        let a = context("ext-a");
        let b = context("ext-b");
        let call = |cx: &HostContext, op: &str, args: Value| {
            testing::call(Arc::new(StorageModule), cx, op, args)
        };

        call(&a, "storage.set", json!(["k", {"v": 1}])).unwrap();
        assert_eq!(call(&a, "storage.get", json!(["k"])).unwrap(), json!({"v": 1}));
        assert_eq!(call(&b, "storage.get", json!(["k"])).unwrap(), Value::Null);
        assert_eq!(call(&a, "storage.keys", json!([])).unwrap(), json!(["k"]));
        assert_eq!(call(&a, "storage.remove", json!(["k"])).unwrap(), true);
        assert!(kv.get("storage:ext-a", "k").await.unwrap().is_none());
    }

    #[test]
    fn test_storage_without_store_is_service_down() {
        let cx = testing::context(&PermissionManifest::default());
        let err = testing::call(Arc::new(StorageModule), &cx, "storage.get", json!(["k"])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ServiceDown);
    }
}
