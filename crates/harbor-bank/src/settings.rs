//! Persistent host settings for extensions.
//!
//! Both stores sit on any [`KvStore`], so tests run them over the memory
//! store and the host over the file store.

use std::collections::BTreeMap;
use std::sync::Arc;

use harbor_core::SavedUserConfig;
use harbor_storage::{KvStore, ScopedKvStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::BankResult;

/// Bucket holding [`PluginSettings`].
pub const PLUGIN_SETTINGS_BUCKET: &str = "plugin-settings";
/// Key of the single [`PluginSettings`] record.
pub const PLUGIN_SETTINGS_KEY: &str = "1";
/// Bucket holding saved user configuration.
pub const USER_CONFIG_BUCKET: &str = "permanent";

/// Plugin settings record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PluginSettings {
    /// Plugins whose tray icon is pinned.
    pub pinned_tray_plugin_ids: Vec<String>,
    /// Extension id to the permission hash the user granted.
    pub plugin_granted_permissions: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Plugin settings
// ---------------------------------------------------------------------------

/// Granted permission hashes and pinned tray plugins.
///
/// Mutations are read-modify-write under one lock, so concurrent grants
/// never lose each other's updates.
#[derive(Debug, Clone)]
pub struct PluginSettingsStore {
    store: ScopedKvStore,
    writer: Arc<Mutex<()>>,
}

impl PluginSettingsStore {
    /// Settings over `store`.
    ///
    /// # Errors
    ///
    /// Propagates bucket validation errors.
    pub fn new(store: Arc<dyn KvStore>) -> BankResult<Self> {
        Ok(Self {
            store: ScopedKvStore::new(store, PLUGIN_SETTINGS_BUCKET)?,
            writer: Arc::new(Mutex::new(())),
        })
    }

    /// Current settings; defaults when nothing is stored.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn load(&self) -> BankResult<PluginSettings> {
        Ok(self
            .store
            .get_json::<PluginSettings>(PLUGIN_SETTINGS_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn update<T>(&self, f: impl FnOnce(&mut PluginSettings) -> T) -> BankResult<T> {
        let _writer = self.writer.lock().await;
        let mut settings = self.load().await?;
        let out = f(&mut settings);
        self.store.set_json(PLUGIN_SETTINGS_KEY, &settings).await?;
        Ok(out)
    }

    /// The hash granted to `id`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn granted(&self, id: &str) -> BankResult<Option<String>> {
        Ok(self.load().await?.plugin_granted_permissions.remove(id))
    }

    /// Record `hash` as granted for `id`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn grant(&self, id: &str, hash: &str) -> BankResult<()> {
        self.update(|s| {
            s.plugin_granted_permissions.insert(id.to_string(), hash.to_string());
        })
        .await?;
        info!(extension_id = %id, "Granted plugin permissions");
        Ok(())
    }

    /// Forget the grant of `id`. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn revoke(&self, id: &str) -> BankResult<bool> {
        let removed = self
            .update(|s| s.plugin_granted_permissions.remove(id).is_some())
            .await?;
        if removed {
            info!(extension_id = %id, "Revoked plugin permissions");
        }
        Ok(removed)
    }

    /// Pin the tray of `id`. Pinning twice is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn pin(&self, id: &str) -> BankResult<()> {
        self.update(|s| {
            if !s.pinned_tray_plugin_ids.iter().any(|p| p == id) {
                s.pinned_tray_plugin_ids.push(id.to_string());
            }
        })
        .await
    }

    /// Unpin the tray of `id`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn unpin(&self, id: &str) -> BankResult<()> {
        self.update(|s| s.pinned_tray_plugin_ids.retain(|p| p != id)).await
    }

    /// Pinned plugin ids in pin order.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn pinned(&self) -> BankResult<Vec<String>> {
        Ok(self.load().await?.pinned_tray_plugin_ids)
    }
}

// ---------------------------------------------------------------------------
// User config
// ---------------------------------------------------------------------------

/// Saved user configuration, one key per extension.
#[derive(Debug, Clone)]
pub struct UserConfigStore {
    store: ScopedKvStore,
}

fn user_config_key(id: &str) -> String {
    format!("ext_user_config_{id}")
}

impl UserConfigStore {
    /// User config over `store`.
    ///
    /// # Errors
    ///
    /// Propagates bucket validation errors.
    pub fn new(store: Arc<dyn KvStore>) -> BankResult<Self> {
        Ok(Self {
            store: ScopedKvStore::new(store, USER_CONFIG_BUCKET)?,
        })
    }

    /// Saved values of `id`.
    ///
    /// # Errors
    ///
    /// Propagates store errors, including a record that does not decode.
    pub async fn get(&self, id: &str) -> BankResult<Option<SavedUserConfig>> {
        Ok(self.store.get_json(&user_config_key(id)).await?)
    }

    /// Store `config` for `id`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn set(&self, id: &str, config: &SavedUserConfig) -> BankResult<()> {
        self.store.set_json(&user_config_key(id), config).await?;
        debug!(extension_id = %id, version = config.version, "saved user config");
        Ok(())
    }

    /// Drop the saved values of `id`.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn delete(&self, id: &str) -> BankResult<bool> {
        Ok(self.store.delete(&user_config_key(id)).await?)
    }
}
