//! The extension bank: a concurrent id -> extension map with change signals.
//!
//! Reads go straight to the inner map. Mutations are serialised by a writer
//! lock so that the map and the signals sent for it stay in the same order.
//! Signals never block: when a channel is full the signal is dropped, which
//! receivers tolerate by re-reading the bank.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use harbor_core::decode_media_id;
use harbor_runtime::Plugin;
use harbor_runtime::provider::{
    BaseExtension, CustomSourceProvider, MangaProvider, MediaPlayerProvider, OnlinestreamProvider, TorrentProvider,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{BankError, BankResult};
use crate::extension::{Extension, ExtensionHandle};

/// Default capacity of the `added`/`removed` channels.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 100;

/// A change notification for named subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BankChange {
    /// An extension was registered.
    Added(String),
    /// An extension was removed.
    Removed(String),
    /// The set of custom sources changed.
    CustomSourcesChanged,
}

/// Receiving end of a named subscription.
#[derive(Debug)]
pub struct BankSubscriber {
    name: String,
    rx: mpsc::Receiver<BankChange>,
}

impl BankSubscriber {
    /// Subscriber name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next change. `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<BankChange> {
        self.rx.recv().await
    }

    /// Next change without waiting.
    pub fn try_recv(&mut self) -> Option<BankChange> {
        self.rx.try_recv().ok()
    }
}

fn signal(channel: &str, tx: &mpsc::Sender<String>, id: &str) {
    match tx.try_send(id.to_string()) {
        Ok(()) => {},
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(channel, extension_id = %id, "bank signal dropped, channel full");
        },
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(channel, extension_id = %id, "bank signal dropped, no receiver");
        },
    }
}

/// Concurrent registry of loaded extensions.
pub struct Bank {
    entries: DashMap<String, Arc<Extension>>,
    writer: Mutex<()>,
    added_tx: mpsc::Sender<String>,
    removed_tx: mpsc::Sender<String>,
    added_rx: Mutex<Option<mpsc::Receiver<String>>>,
    removed_rx: Mutex<Option<mpsc::Receiver<String>>>,
    subscribers: Mutex<HashMap<String, mpsc::Sender<BankChange>>>,
    capacity: usize,
}

impl std::fmt::Debug for Bank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bank")
            .field("extensions", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Default for Bank {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_CAPACITY)
    }
}

impl Bank {
    /// Empty bank whose signal channels hold `capacity` signals.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (added_tx, added_rx) = mpsc::channel(capacity);
        let (removed_tx, removed_rx) = mpsc::channel(capacity);
        Self {
            entries: DashMap::new(),
            writer: Mutex::new(()),
            added_tx,
            removed_tx,
            added_rx: Mutex::new(Some(added_rx)),
            removed_rx: Mutex::new(Some(removed_rx)),
            subscribers: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Take the `added` channel. Only the first caller gets it.
    pub fn take_added(&self) -> Option<mpsc::Receiver<String>> {
        self.added_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Take the `removed` channel. Only the first caller gets it.
    pub fn take_removed(&self) -> Option<mpsc::Receiver<String>> {
        self.removed_rx.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Register a named subscriber, replacing any previous one of that name.
    pub fn subscribe(&self, name: impl Into<String>) -> BankSubscriber {
        let name = name.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), tx);
        BankSubscriber { name, rx }
    }

    /// Drop the subscriber `name`.
    pub fn unsubscribe(&self, name: &str) -> bool {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    fn notify(&self, change: &BankChange) {
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, tx) in subscribers.iter() {
            if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(change.clone()) {
                warn!(subscriber = %name, ?change, "bank change dropped, subscriber is slow");
            }
        }
    }

    fn announce_added(&self, extension: &Extension) {
        let id = &extension.manifest().id;
        signal("added", &self.added_tx, id);
        self.notify(&BankChange::Added(id.clone()));
        if matches!(extension.handle(), ExtensionHandle::CustomSource(_)) {
            self.notify(&BankChange::CustomSourcesChanged);
        }
    }

    fn announce_removed(&self, extension: &Extension) {
        let id = &extension.manifest().id;
        signal("removed", &self.removed_tx, id);
        self.notify(&BankChange::Removed(id.clone()));
        if matches!(extension.handle(), ExtensionHandle::CustomSource(_)) {
            self.notify(&BankChange::CustomSourcesChanged);
        }
    }

    // -----------------------------------------------------------------------
    // Map operations
    // -----------------------------------------------------------------------

    /// Register `extension`. An entry with the same id is torn down and
    /// replaced, which emits `removed` then `added`.
    pub fn set(&self, extension: Extension) {
        let extension = Arc::new(extension);
        let id = extension.manifest().id.clone();
        let previous = {
            let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = self.entries.insert(id.clone(), Arc::clone(&extension));
            if let Some(previous) = &previous {
                self.announce_removed(previous);
            }
            self.announce_added(&extension);
            previous
        };
        if let Some(previous) = previous {
            previous.teardown();
        }
        info!(extension_id = %id, kind = extension.handle().kind(), "Registered extension");
    }

    /// The extension registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Extension>> {
        self.entries.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Remove and tear down `id`. Returns whether it was registered.
    pub fn delete(&self, id: &str) -> bool {
        let removed = {
            let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let removed = self.entries.remove(id).map(|(_, e)| e);
            if let Some(extension) = &removed {
                self.announce_removed(extension);
            }
            removed
        };
        match removed {
            Some(extension) => {
                extension.teardown();
                info!(extension_id = %id, "Removed extension");
                true
            },
            None => false,
        }
    }

    /// Visit every entry until `f` returns `false`.
    pub fn range(&self, mut f: impl FnMut(&str, &Arc<Extension>) -> bool) {
        let snapshot: Vec<(String, Arc<Extension>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        for (id, extension) in &snapshot {
            if !f(id, extension) {
                break;
            }
        }
    }

    /// Registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bank is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn reset(&self) {
        self.remove_where(|_| true);
    }

    /// Remove every entry that is not built in.
    pub fn remove_external(&self) {
        self.remove_where(|e| !e.is_builtin());
    }

    fn remove_where(&self, pred: impl Fn(&Extension) -> bool) {
        let removed: Vec<Arc<Extension>> = {
            let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<String> = self
                .entries
                .iter()
                .filter(|e| pred(e.value()))
                .map(|e| e.key().clone())
                .collect();
            ids.iter()
                .filter_map(|id| self.entries.remove(id).map(|(_, e)| e))
                .inspect(|e| self.announce_removed(e))
                .collect()
        };
        for extension in &removed {
            extension.teardown();
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Removed extensions");
        }
    }

    // -----------------------------------------------------------------------
    // Typed access
    // -----------------------------------------------------------------------

    fn typed<T>(&self, id: &str, expected: &'static str, pick: impl Fn(&ExtensionHandle) -> Option<T>) -> BankResult<T> {
        let extension = self.get(id).ok_or_else(|| BankError::NotFound(id.to_string()))?;
        pick(extension.handle()).ok_or_else(|| BankError::WrongType {
            id: id.to_string(),
            expected,
            actual: extension.handle().kind(),
        })
    }

    /// The torrent provider `id`.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] or [`BankError::WrongType`].
    pub fn torrent_provider(&self, id: &str) -> BankResult<Arc<dyn TorrentProvider>> {
        self.typed(id, "torrent-provider", |h| match h {
            ExtensionHandle::Torrent(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    /// The manga provider `id`.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] or [`BankError::WrongType`].
    pub fn manga_provider(&self, id: &str) -> BankResult<Arc<dyn MangaProvider>> {
        self.typed(id, "manga-provider", |h| match h {
            ExtensionHandle::Manga(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    /// The online streaming provider `id`.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] or [`BankError::WrongType`].
    pub fn onlinestream_provider(&self, id: &str) -> BankResult<Arc<dyn OnlinestreamProvider>> {
        self.typed(id, "onlinestream-provider", |h| match h {
            ExtensionHandle::Onlinestream(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    /// The media player `id`.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] or [`BankError::WrongType`].
    pub fn media_player(&self, id: &str) -> BankResult<Arc<dyn MediaPlayerProvider>> {
        self.typed(id, "mediaplayer", |h| match h {
            ExtensionHandle::MediaPlayer(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    /// The custom source `id`.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] or [`BankError::WrongType`].
    pub fn custom_source(&self, id: &str) -> BankResult<Arc<dyn CustomSourceProvider>> {
        self.typed(id, "custom-source-provider", |h| match h {
            ExtensionHandle::CustomSource(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    /// The plugin `id`.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] or [`BankError::WrongType`].
    pub fn plugin(&self, id: &str) -> BankResult<Arc<Plugin>> {
        self.typed(id, "plugin", |h| match h {
            ExtensionHandle::Plugin(p) => Some(Arc::clone(p)),
            _ => None,
        })
    }

    /// Every custom source.
    #[must_use]
    pub fn custom_sources(&self) -> Vec<Arc<dyn CustomSourceProvider>> {
        self.entries
            .iter()
            .filter_map(|e| match e.value().handle() {
                ExtensionHandle::CustomSource(p) => Some(Arc::clone(p)),
                _ => None,
            })
            .collect()
    }

    /// The custom source owning `media_id` and the local id inside it.
    /// `None` for ids outside the extension range or with no owner.
    #[must_use]
    pub fn custom_source_for_media(&self, media_id: u64) -> Option<(Arc<dyn CustomSourceProvider>, u64)> {
        let (identifier, local_id) = decode_media_id(media_id)?;
        self.custom_sources()
            .into_iter()
            .find(|p| p.extension_identifier() == identifier)
            .map(|p| (p, local_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::{ExtensionManifest, ExtensionType, Language};
    use harbor_runtime::RuntimeResult;
    use harbor_runtime::provider::types::{CustomSourceSettings, ListResponse};
    use serde_json::Value;

    struct Source(u16);

    #[async_trait::async_trait]
    impl CustomSourceProvider for Source {
        fn extension_identifier(&self) -> u16 {
            self.0
        }
        async fn list_anime(&self, _: &str, _: u32, _: u32) -> RuntimeResult<ListResponse> {
            Ok(ListResponse::default())
        }
        async fn list_manga(&self, _: &str, _: u32, _: u32) -> RuntimeResult<ListResponse> {
            Ok(ListResponse::default())
        }
        async fn get_anime(&self, _: &[u64]) -> RuntimeResult<Vec<Value>> {
            Ok(vec![])
        }
        async fn get_anime_details(&self, _: u64) -> RuntimeResult<Value> {
            Ok(Value::Null)
        }
        async fn get_anime_with_relations(&self, _: u64) -> RuntimeResult<Value> {
            Ok(Value::Null)
        }
        async fn get_anime_metadata(&self, _: u64) -> RuntimeResult<Value> {
            Ok(Value::Null)
        }
        async fn get_manga(&self, _: &[u64]) -> RuntimeResult<Vec<Value>> {
            Ok(vec![])
        }
        async fn get_manga_details(&self, _: u64) -> RuntimeResult<Value> {
            Ok(Value::Null)
        }
        async fn get_settings(&self) -> RuntimeResult<CustomSourceSettings> {
            Ok(CustomSourceSettings::default())
        }
    }

    fn manifest(id: &str) -> ExtensionManifest {
        ExtensionManifest {
            id: id.into(),
            name: id.into(),
            version: "1.0.0".into(),
            language: Some(Language::Go),
            extension_type: Some(ExtensionType::CustomSourceProvider),
            ..Default::default()
        }
    }

    fn source(id: &str, identifier: u16) -> Extension {
        Extension::builtin(manifest(id), ExtensionHandle::CustomSource(Arc::new(Source(identifier))))
    }

    #[test]
    fn test_signals_follow_mutations() {
        let bank = Bank::default();
        let mut added = bank.take_added().unwrap();
        let mut removed = bank.take_removed().unwrap();
        assert!(bank.take_added().is_none());

        bank.set(source("one", 1));
        assert_eq!(added.try_recv().unwrap(), "one");
        assert!(removed.try_recv().is_err());

        assert!(!bank.delete("missing"));
        assert!(removed.try_recv().is_err());

        assert!(bank.delete("one"));
        assert_eq!(removed.try_recv().unwrap(), "one");
        assert!(added.try_recv().is_err());
    }

    #[test]
    fn test_replacing_emits_removed_then_added() {
        let bank = Bank::default();
        let mut added = bank.take_added().unwrap();
        let mut removed = bank.take_removed().unwrap();
        bank.set(source("one", 1));
        bank.set(source("one", 2));
        assert_eq!(bank.len(), 1);
        assert_eq!(removed.try_recv().unwrap(), "one");
        assert_eq!(added.try_recv().unwrap(), "one");
        assert_eq!(added.try_recv().unwrap(), "one");
        assert_eq!(bank.custom_source("one").unwrap().extension_identifier(), 2);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let bank = Bank::new(2);
        let mut added = bank.take_added().unwrap();
        for i in 0..5 {
            bank.set(source(&format!("ext-{i}"), 1));
        }
        assert_eq!(bank.len(), 5);
        let mut got = 0;
        while added.try_recv().is_ok() {
            got += 1;
        }
        assert_eq!(got, 2);
    }

    #[test]
    fn test_remove_external_keeps_builtins() {
        let bank = Bank::default();
        bank.set(source("builtin-src", 1));
        let mut external = manifest("ext-src");
        external.language = Some(Language::Javascript);
        bank.set(Extension::external(
            external,
            ExtensionHandle::CustomSource(Arc::new(Source(2))),
            None,
        ));
        bank.remove_external();
        assert_eq!(bank.ids(), vec!["builtin-src".to_string()]);
        bank.reset();
        assert!(bank.is_empty());
    }

    #[test]
    fn test_typed_access_and_media_lookup() {
        let bank = Bank::default();
        bank.set(source("src", 7));
        assert!(matches!(bank.plugin("src"), Err(BankError::WrongType { actual: "custom-source-provider", .. })));
        assert!(matches!(bank.torrent_provider("nope"), Err(BankError::NotFound(_))));

        let media = harbor_core::encode_media_id(7, 99).unwrap();
        let (provider, local) = bank.custom_source_for_media(media).unwrap();
        assert_eq!(provider.extension_identifier(), 7);
        assert_eq!(local, 99);
        assert!(bank.custom_source_for_media(12).is_none());
    }

    #[tokio::test]
    async fn test_subscribers_get_coalescable_changes() {
        let bank = Bank::default();
        let mut sub = bank.subscribe("ui");
        bank.set(source("src", 3));
        assert_eq!(sub.recv().await.unwrap(), BankChange::Added("src".into()));
        assert_eq!(sub.recv().await.unwrap(), BankChange::CustomSourcesChanged);
        bank.delete("src");
        assert_eq!(sub.recv().await.unwrap(), BankChange::Removed("src".into()));
        assert!(bank.unsubscribe("ui"));
    }

    #[test]
    fn test_range_stops_early() {
        let bank = Bank::default();
        bank.set(source("a-src", 1));
        bank.set(source("b-src", 2));
        let mut seen = 0;
        bank.range(|_, _| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }
}
