//! Key-value store trait and implementations.
//!
//! Every value is a JSON document stored under `(bucket, key)`. Buckets
//! partition the data: plugin settings, user configs, and each extension's
//! `$storage` live in separate buckets.
//!
//! Use [`ScopedKvStore`] to pre-bind a bucket. It also provides typed
//! [`get_json`](ScopedKvStore::get_json) / [`set_json`](ScopedKvStore::set_json)
//! helpers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Buckets double as file names, so only a conservative alphabet is allowed.
fn validate_bucket(bucket: &str) -> StorageResult<()> {
    if bucket.is_empty() {
        return Err(StorageError::InvalidKey("bucket must not be empty".into()));
    }
    if bucket.starts_with('.') {
        return Err(StorageError::InvalidKey(
            "bucket must not start with a dot".into(),
        ));
    }
    if !bucket
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(StorageError::InvalidKey(format!(
            "bucket {bucket:?} contains invalid characters"
        )));
    }
    Ok(())
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Bucketed JSON key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get a value. Returns `None` if the key does not exist.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Value>>;

    /// Set a value, overwriting any previous one.
    async fn set(&self, bucket: &str, key: &str, value: Value) -> StorageResult<()>;

    /// Delete a key. Returns `true` if it existed.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// All keys of a bucket, sorted.
    async fn list_keys(&self, bucket: &str) -> StorageResult<Vec<String>>;

    /// Delete every key of a bucket. Returns how many were removed.
    async fn clear_bucket(&self, bucket: &str) -> StorageResult<u64>;

    /// Whether a key exists.
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        Ok(self.get(bucket, key).await?.is_some())
    }
}

type Buckets = HashMap<String, BTreeMap<String, Value>>;

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// In-memory store for tests and ephemeral data.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: RwLock<Buckets>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Value>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let data = self.data.read().await;
        Ok(data.get(bucket).and_then(|b| b.get(key)).cloned())
    }

    async fn set(&self, bucket: &str, key: &str, value: Value) -> StorageResult<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let mut data = self.data.write().await;
        data.entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        let mut data = self.data.write().await;
        Ok(data
            .get_mut(bucket)
            .is_some_and(|b| b.remove(key).is_some()))
    }

    async fn list_keys(&self, bucket: &str) -> StorageResult<Vec<String>> {
        validate_bucket(bucket)?;
        let data = self.data.read().await;
        Ok(data
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear_bucket(&self, bucket: &str) -> StorageResult<u64> {
        validate_bucket(bucket)?;
        let mut data = self.data.write().await;
        Ok(data.remove(bucket).map_or(0, |b| b.len() as u64))
    }
}

// ---------------------------------------------------------------------------
// File-backed implementation
// ---------------------------------------------------------------------------

/// Persistent store keeping one `<bucket>.json` file per bucket.
///
/// Buckets are loaded lazily and cached. Every mutation rewrites the
/// bucket file through a temporary file and a rename, so a crash never
/// leaves a half-written bucket behind.
#[derive(Debug)]
pub struct FileKvStore {
    dir: PathBuf,
    cache: RwLock<Buckets>,
}

impl FileKvStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;
        Ok(Self {
            dir,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Directory holding the bucket files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.dir.join(format!("{bucket}.json"))
    }

    async fn read_bucket(&self, bucket: &str) -> StorageResult<BTreeMap<String, Value>> {
        let path = self.bucket_path(bucket);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::Serialization(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn write_bucket(&self, bucket: &str, entries: &BTreeMap<String, Value>) -> StorageResult<()> {
        let path = self.bucket_path(bucket);
        if entries.is_empty() {
            return match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_err(&path, e)),
            };
        }
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))?;
        debug!(bucket, entries = entries.len(), "bucket persisted");
        Ok(())
    }

    /// Run `f` on the cached bucket, loading it first, and persist if it
    /// reports a change.
    async fn mutate<T>(
        &self,
        bucket: &str,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> (T, bool) + Send,
    ) -> StorageResult<T> {
        let mut cache = self.cache.write().await;
        if !cache.contains_key(bucket) {
            let loaded = self.read_bucket(bucket).await?;
            cache.insert(bucket.to_string(), loaded);
        }
        let entries = cache.entry(bucket.to_string()).or_default();
        let (out, changed) = f(entries);
        if changed {
            let snapshot = entries.clone();
            self.write_bucket(bucket, &snapshot).await?;
        }
        Ok(out)
    }

    async fn snapshot(&self, bucket: &str) -> StorageResult<BTreeMap<String, Value>> {
        if let Some(entries) = self.cache.read().await.get(bucket) {
            return Ok(entries.clone());
        }
        self.mutate(bucket, |entries| (entries.clone(), false)).await
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Option<Value>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.snapshot(bucket).await?.remove(key))
    }

    async fn set(&self, bucket: &str, key: &str, value: Value) -> StorageResult<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.mutate(bucket, |entries| {
            entries.insert(key.to_string(), value);
            ((), true)
        })
        .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.mutate(bucket, |entries| {
            let existed = entries.remove(key).is_some();
            (existed, existed)
        })
        .await
    }

    async fn list_keys(&self, bucket: &str) -> StorageResult<Vec<String>> {
        validate_bucket(bucket)?;
        Ok(self.snapshot(bucket).await?.into_keys().collect())
    }

    async fn clear_bucket(&self, bucket: &str) -> StorageResult<u64> {
        validate_bucket(bucket)?;
        self.mutate(bucket, |entries| {
            let count = entries.len() as u64;
            entries.clear();
            (count, count > 0)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Scoped store (bucket pre-bound)
// ---------------------------------------------------------------------------

/// A bucket-scoped view into a [`KvStore`].
#[derive(Clone)]
pub struct ScopedKvStore {
    inner: Arc<dyn KvStore>,
    bucket: String,
}

impl std::fmt::Debug for ScopedKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedKvStore")
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

impl ScopedKvStore {
    /// Create a view of `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] if the bucket name is invalid.
    pub fn new(store: Arc<dyn KvStore>, bucket: impl Into<String>) -> StorageResult<Self> {
        let bucket = bucket.into();
        validate_bucket(&bucket)?;
        Ok(Self {
            inner: store,
            bucket,
        })
    }

    /// The bound bucket.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get a raw value.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        self.inner.get(&self.bucket, key).await
    }

    /// Set a raw value.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        self.inner.set(&self.bucket, key, value).await
    }

    /// Delete a key.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.inner.delete(&self.bucket, key).await
    }

    /// Whether a key exists.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(&self.bucket, key).await
    }

    /// All keys of the bucket.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn list_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.list_keys(&self.bucket).await
    }

    /// Delete every key of the bucket.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn clear(&self) -> StorageResult<u64> {
        self.inner.clear_bucket(&self.bucket).await
    }

    /// Deserialize a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored value does not
    /// match `T`.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StorageResult<Option<T>> {
        self.get(key)
            .await?
            .map(|v| serde_json::from_value(v).map_err(|e| StorageError::Serialization(e.to_string())))
            .transpose()
    }

    /// Serialize and store a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if serialization fails.
    pub async fn set_json<T: serde::Serialize + Sync>(&self, key: &str, value: &T) -> StorageResult<()> {
        let v = serde_json::to_value(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.set(key, v).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_get_set_delete() {
        let store = MemoryKvStore::new();
        store.set("permanent", "k", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("permanent", "k").await.unwrap(), Some(json!({"a": 1})));
        assert!(store.delete("permanent", "k").await.unwrap());
        assert!(!store.delete("permanent", "k").await.unwrap());
        assert!(!store.exists("permanent", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_bucket_isolation() {
        let store = MemoryKvStore::new();
        store.set("a", "k", json!(1)).await.unwrap();
        store.set("b", "k", json!(2)).await.unwrap();
        assert_eq!(store.get("a", "k").await.unwrap(), Some(json!(1)));
        assert_eq!(store.clear_bucket("a").await.unwrap(), 1);
        assert!(store.list_keys("a").await.unwrap().is_empty());
        assert_eq!(store.list_keys("b").await.unwrap(), vec!["k"]);
    }

    #[test]
    fn test_bucket_validation() {
        assert!(validate_bucket("").is_err());
        assert!(validate_bucket("../etc").is_err());
        assert!(validate_bucket(".hidden").is_err());
        assert!(validate_bucket("storage:my-ext").is_ok());
        assert!(validate_key("").is_err());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileKvStore::open(dir.path()).await.unwrap();
            store.set("plugin-settings", "1", json!({"pinned": ["x"]})).await.unwrap();
            store.set("plugin-settings", "2", json!(true)).await.unwrap();
            assert!(store.delete("plugin-settings", "2").await.unwrap());
        }
        let store = FileKvStore::open(dir.path()).await.unwrap();
        assert_eq!(
            store.get("plugin-settings", "1").await.unwrap(),
            Some(json!({"pinned": ["x"]}))
        );
        assert_eq!(store.list_keys("plugin-settings").await.unwrap(), vec!["1"]);
    }

    #[tokio::test]
    async fn test_file_store_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKvStore::open(dir.path()).await.unwrap();
        store.set("tmp", "a", json!(1)).await.unwrap();
        assert!(dir.path().join("tmp.json").exists());
        assert_eq!(store.clear_bucket("tmp").await.unwrap(), 1);
        assert!(!dir.path().join("tmp.json").exists());
    }

    #[tokio::test]
    async fn test_scoped_json_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Granted {
            hash: String,
        }

        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let a = ScopedKvStore::new(Arc::clone(&store), "storage:a").unwrap();
        let b = ScopedKvStore::new(Arc::clone(&store), "storage:b").unwrap();
        a.set_json("grant", &Granted { hash: "abc".into() }).await.unwrap();
        assert_eq!(
            a.get_json::<Granted>("grant").await.unwrap(),
            Some(Granted { hash: "abc".into() })
        );
        assert!(b.get_json::<Granted>("grant").await.unwrap().is_none());
        assert!(a.get_json::<u32>("grant").await.is_err());
    }
}
