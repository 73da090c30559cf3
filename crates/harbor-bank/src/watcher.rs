//! Hot reload of manifests in the extension directory.
//!
//! ```text
//! filesystem events (notify)
//!   -> keep *.json files directly inside the directory
//!   -> debounce per file
//!   -> blake3 hash of the file content
//!   -> compare to cached hash
//!   -> emit WatchEvent
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use harbor_config::BankSection;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BankError, BankResult};
use crate::loader::{Loader, is_manifest_file};

/// Default debounce interval.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// What the watcher saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A manifest was created or its content changed.
    ManifestChanged {
        /// Manifest file.
        path: PathBuf,
        /// blake3 hash of the new content.
        hash: String,
    },
    /// A manifest file disappeared.
    ManifestRemoved {
        /// Manifest file.
        path: PathBuf,
    },
    /// Non-fatal watcher error.
    Error(String),
}

/// Watcher settings.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Extension directory.
    pub dir: PathBuf,
    /// Changes to one file within this window are coalesced.
    pub debounce: Duration,
}

impl WatcherConfig {
    /// Watch `dir` with the default debounce.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Watches the extension directory and emits [`WatchEvent`]s.
pub struct ExtensionWatcher {
    config: WatcherConfig,
    hash_cache: HashMap<PathBuf, String>,
    // Dropping the notify handle stops monitoring.
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    event_tx: mpsc::Sender<WatchEvent>,
}

impl std::fmt::Debug for ExtensionWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionWatcher")
            .field("config", &self.config)
            .field("cached", &self.hash_cache.len())
            .finish_non_exhaustive()
    }
}

impl ExtensionWatcher {
    /// Create a watcher. Call [`run`](Self::run) to start it.
    ///
    /// # Errors
    ///
    /// [`BankError::Watch`] if the platform watcher cannot be created.
    pub fn new(config: WatcherConfig) -> BankResult<(Self, mpsc::Receiver<WatchEvent>)> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|e| BankError::Watch(e.to_string()))?;
        Ok((
            Self {
                config,
                hash_cache: HashMap::new(),
                watcher,
                raw_rx,
                event_tx,
            },
            event_rx,
        ))
    }

    /// Hash the manifests already present so untouched files never reload.
    fn seed(&mut self) {
        let Ok(entries) = std::fs::read_dir(&self.config.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_manifest_file(&path)
                && let Ok(hash) = hash_file(&path)
            {
                self.hash_cache.insert(path, hash);
            }
        }
    }

    /// Run until the event receiver is dropped.
    pub async fn run(mut self) {
        let dir = self.config.dir.clone();
        if let Err(e) = self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
            warn!(dir = %dir.display(), error = %e, "Failed to watch extension directory");
            let _ = self.event_tx.send(WatchEvent::Error(e.to_string())).await;
            return;
        }
        self.seed();
        info!(dir = %dir.display(), "Watching extension directory");

        let debounce = self.config.debounce;
        let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();

        loop {
            let next_deadline = pending.values().copied().min();

            tokio::select! {
                biased;

                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let now = tokio::time::Instant::now();
                    let ready: Vec<PathBuf> = pending
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in ready {
                        pending.remove(&path);
                        if !self.process_change(&path).await {
                            return;
                        }
                    }
                }

                event = self.raw_rx.recv() => {
                    match event {
                        Some(Ok(ev)) => self.handle_raw_event(&ev, &mut pending, debounce),
                        Some(Err(e)) => {
                            warn!(error = %e, "Filesystem watcher error");
                            if self.event_tx.send(WatchEvent::Error(e.to_string())).await.is_err() {
                                return;
                            }
                        }
                        None => {
                            debug!("filesystem watcher channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_raw_event(
        &self,
        event: &Event,
        pending: &mut HashMap<PathBuf, tokio::time::Instant>,
        debounce: Duration,
    ) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {},
            _ => return,
        }
        for path in &event.paths {
            if !is_manifest_file(path) || path.parent() != Some(self.config.dir.as_path()) {
                continue;
            }
            debug!(path = %path.display(), kind = ?event.kind, "manifest change detected");
            #[allow(clippy::arithmetic_side_effects)]
            // Instant + Duration cannot overflow in practice
            let deadline = tokio::time::Instant::now() + debounce;
            pending.insert(path.clone(), deadline);
        }
    }

    /// Emit an event if `path` vanished or its content hash changed.
    /// Returns `false` once the receiver is gone.
    async fn process_change(&mut self, path: &Path) -> bool {
        let owned = path.to_path_buf();
        let hashed = match tokio::task::spawn_blocking(move || hash_file(&owned)).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Hash task was cancelled");
                return true;
            },
        };

        let event = match hashed {
            Ok(hash) => {
                if self.hash_cache.get(path).is_some_and(|h| h == &hash) {
                    debug!(path = %path.display(), "manifest unchanged, skipping reload");
                    return true;
                }
                self.hash_cache.insert(path.to_path_buf(), hash.clone());
                info!(path = %path.display(), hash = %hash, "Manifest changed");
                WatchEvent::ManifestChanged {
                    path: path.to_path_buf(),
                    hash,
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.hash_cache.remove(path).is_none() {
                    return true;
                }
                info!(path = %path.display(), "Manifest removed");
                WatchEvent::ManifestRemoved {
                    path: path.to_path_buf(),
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to hash manifest");
                WatchEvent::Error(format!("hash failed for {}: {e}", path.display()))
            },
        };
        self.event_tx.send(event).await.is_ok()
    }
}

/// blake3 hash of a file's content, hex encoded.
///
/// # Errors
///
/// Propagates read errors.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read(path)?;
    Ok(blake3::hash(&content).to_hex().to_string())
}

impl Loader {
    /// Watch the extension directory and reload manifests as they change.
    ///
    /// Aborting the returned task stops both the consumer and the watcher.
    ///
    /// # Errors
    ///
    /// [`BankError::Watch`] if the platform watcher cannot be created.
    pub fn watch(self: &Arc<Self>, debounce: Duration) -> BankResult<JoinHandle<()>> {
        let (watcher, mut events) = ExtensionWatcher::new(WatcherConfig {
            dir: self.dir().to_path_buf(),
            debounce,
        })?;
        let loader = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let watching = tokio::spawn(watcher.run());
            while let Some(event) = events.recv().await {
                loader.apply_watch_event(event).await;
            }
            watching.abort();
        }))
    }

    /// Start [`watch`](Self::watch) when `bank.watch` is enabled.
    ///
    /// # Errors
    ///
    /// [`BankError::Watch`] if the platform watcher cannot be created.
    pub fn watch_configured(self: &Arc<Self>, bank: &BankSection) -> BankResult<Option<JoinHandle<()>>> {
        if !bank.watch {
            debug!("hot reload disabled");
            return Ok(None);
        }
        self.watch(bank.watch_debounce()).map(Some)
    }

    async fn apply_watch_event(&self, event: WatchEvent) {
        match event {
            WatchEvent::ManifestChanged { path, .. } => {
                let result = match self.id_for_path(&path) {
                    Some(id) => self.reload(&id).await,
                    None => self.load_file(&path).await.map(|_| ()),
                };
                if let Err(e) = result {
                    warn!(path = %path.display(), error = %e, "Hot reload failed");
                }
            },
            WatchEvent::ManifestRemoved { path } => {
                if let Some(id) = self.id_for_path(&path) {
                    match self.unload(&id).await {
                        Ok(_) => info!(extension_id = %id, "Unloaded removed extension"),
                        Err(e) => warn!(extension_id = %id, error = %e, "Unload failed"),
                    }
                }
            },
            WatchEvent::Error(message) => warn!(error = %message, "Extension watcher error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_tracks_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, "{}").unwrap();
        let first = hash_file(&path).unwrap();
        assert_eq!(first.len(), 64);
        assert_eq!(hash_file(&path).unwrap(), first);
        std::fs::write(&path, "{\"id\":\"x\"}").unwrap();
        assert_ne!(hash_file(&path).unwrap(), first);
    }

    #[tokio::test]
    async fn test_process_change_deduplicates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("my-ext.json");
        std::fs::write(&path, "{}").unwrap();
        let (mut watcher, mut events) = ExtensionWatcher::new(WatcherConfig::new(dir.path())).unwrap();

        assert!(watcher.process_change(&path).await);
        assert!(matches!(events.try_recv().unwrap(), WatchEvent::ManifestChanged { .. }));

        assert!(watcher.process_change(&path).await);
        assert!(events.try_recv().is_err(), "unchanged content must not emit");

        std::fs::write(&path, "{\"v\":2}").unwrap();
        watcher.process_change(&path).await;
        assert!(matches!(events.try_recv().unwrap(), WatchEvent::ManifestChanged { .. }));

        std::fs::remove_file(&path).unwrap();
        watcher.process_change(&path).await;
        assert_eq!(events.try_recv().unwrap(), WatchEvent::ManifestRemoved { path: path.clone() });

        // Already forgotten.
        watcher.process_change(&path).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_seed_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seeded.json");
        std::fs::write(&path, "{}").unwrap();
        let (mut watcher, mut events) = ExtensionWatcher::new(WatcherConfig::new(dir.path())).unwrap();
        watcher.seed();
        watcher.process_change(&path).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_configured_respects_flag() {
        use crate::bank::Bank;
        use harbor_storage::{KvStore, MemoryKvStore};

        let dir = TempDir::new().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let loader = Arc::new(Loader::new(dir.path(), Arc::new(Bank::default()), kv).unwrap());

        let off = BankSection {
            watch: false,
            ..BankSection::default()
        };
        assert!(loader.watch_configured(&off).unwrap().is_none());

        let on = BankSection { watch: true, ..off };
        let task = loader.watch_configured(&on).unwrap().unwrap();
        task.abort();
    }

    #[test]
    fn test_default_debounce() {
        assert_eq!(WatcherConfig::new("/x").debounce, DEFAULT_DEBOUNCE);
    }
}
