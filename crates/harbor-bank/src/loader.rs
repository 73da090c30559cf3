//! Extension loader - turns manifests on disk into bank entries.
//!
//! A manifest goes through these checks, in order, before it is compiled:
//!
//! 1. required fields and id grammar
//! 2. user configuration (saved values substituted into the payload)
//! 3. granted permission hash (plugins only)
//!
//! Any failure records an [`InvalidExtension`] and leaves the bank untouched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use harbor_capabilities::{CapabilityGate, PathPlaceholders};
use harbor_config::HostConfig;
use harbor_core::{
    CoreError, ExtensionManifest, ExtensionType, LoadErrorCode, Origin, SavedUserConfig,
    apply_user_config, is_granted, permission_hash,
};
use harbor_events::{EventHub, HubOptions, PluginBus};
use harbor_runtime::provider::{
    JsCustomSourceProvider, JsMangaProvider, JsMediaPlayerProvider, JsOnlinestreamProvider, JsTorrentProvider,
};
use harbor_runtime::{
    Interpreter, InterpreterConfig, Plugin, PoolManager, ProviderBridge, ProviderSpec, RuntimeError, RuntimeOptions,
    Services,
};
use harbor_storage::KvStore;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::bank::Bank;
use crate::error::{BankError, BankResult};
use crate::extension::{Extension, ExtensionHandle};
use crate::identifiers::IdentifierAllocator;
use crate::settings::{PluginSettingsStore, UserConfigStore};

/// Why an extension is not loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidExtension {
    /// Extension id, or the file stem when the manifest has none.
    pub id: String,
    /// Manifest file, if loaded from disk.
    pub path: Option<PathBuf>,
    /// Failure code.
    pub code: LoadErrorCode,
    /// Human readable reason.
    pub reason: String,
    /// The manifest, when it parsed.
    pub manifest: Option<ExtensionManifest>,
}

/// Outcome of [`Loader::load_all`].
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Ids loaded by this pass.
    pub loaded: Vec<String>,
    /// Every extension currently recorded as invalid.
    pub invalid: Vec<InvalidExtension>,
}

/// Loads extensions from a directory into a [`Bank`].
pub struct Loader {
    dir: PathBuf,
    bank: Arc<Bank>,
    pools: Arc<PoolManager<Interpreter>>,
    hub: EventHub,
    options: Arc<RuntimeOptions>,
    services: Services,
    placeholders: PathPlaceholders,
    settings: PluginSettingsStore,
    user_configs: UserConfigStore,
    identifiers: Arc<IdentifierAllocator>,
    invalid: DashMap<String, InvalidExtension>,
    sources: DashMap<String, PathBuf>,
    builtins: DashMap<String, (ExtensionManifest, ExtensionHandle)>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("dir", &self.dir)
            .field("bank", &self.bank)
            .field("invalid", &self.invalid.len())
            .field("builtins", &self.builtins.len())
            .finish_non_exhaustive()
    }
}

impl Loader {
    /// Loader over `dir` feeding `bank`, keeping settings in `kv`.
    ///
    /// # Errors
    ///
    /// Propagates settings store construction errors.
    pub fn new(dir: impl Into<PathBuf>, bank: Arc<Bank>, kv: Arc<dyn KvStore>) -> BankResult<Self> {
        let options = Arc::new(RuntimeOptions::default());
        Ok(Self {
            dir: dir.into(),
            bank,
            pools: Arc::new(PoolManager::new(options.pool_capacity)),
            hub: EventHub::new(),
            options,
            services: Services::new().with_kv_store(Arc::clone(&kv)),
            placeholders: PathPlaceholders::from_system(),
            settings: PluginSettingsStore::new(Arc::clone(&kv))?,
            user_configs: UserConfigStore::new(kv)?,
            identifiers: Arc::new(IdentifierAllocator::new()),
            invalid: DashMap::new(),
            sources: DashMap::new(),
            builtins: DashMap::new(),
        })
    }

    /// Loader configured from `config`: extension directory, runtime
    /// options and pool capacity.
    ///
    /// # Errors
    ///
    /// Propagates settings store construction errors.
    pub fn from_config(config: &HostConfig, bank: Arc<Bank>, kv: Arc<dyn KvStore>) -> BankResult<Self> {
        let options = Arc::new(RuntimeOptions::from_config(config));
        let placeholders = PathPlaceholders::from_system()
            .with("DOWNLOAD", vec![config.paths.download_dir()])
            .with("DATA", vec![config.paths.data_dir()]);
        let hub = EventHub::with_options(HubOptions {
            listener_buffer: config.plugins.listener_buffer,
            batch_size: config.plugins.event_batch_size,
            batch_window: config.plugins.event_batch_flush(),
            ..HubOptions::default()
        });
        Ok(Self::new(config.paths.extensions_dir(), bank, kv)?
            .with_options(options)
            .with_hub(hub)
            .with_placeholders(placeholders))
    }

    /// Use `options` for every interpreter. Also resizes the pool manager.
    #[must_use]
    pub fn with_options(mut self, options: Arc<RuntimeOptions>) -> Self {
        self.pools = Arc::new(PoolManager::new(options.pool_capacity));
        self.options = options;
        self
    }

    /// Host services handed to interpreters.
    #[must_use]
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Route plugin events through `hub`.
    #[must_use]
    pub fn with_hub(mut self, hub: EventHub) -> Self {
        self.hub = hub;
        self
    }

    /// Placeholders expanded in permission globs.
    #[must_use]
    pub fn with_placeholders(mut self, placeholders: PathPlaceholders) -> Self {
        self.placeholders = placeholders;
        self
    }

    /// Extension directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The bank this loader feeds.
    #[must_use]
    pub fn bank(&self) -> &Arc<Bank> {
        &self.bank
    }

    /// The event hub plugins are registered with.
    #[must_use]
    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Per-extension interpreter pools.
    #[must_use]
    pub fn pools(&self) -> &Arc<PoolManager<Interpreter>> {
        &self.pools
    }

    /// Granted permissions and pinned trays.
    #[must_use]
    pub fn settings(&self) -> &PluginSettingsStore {
        &self.settings
    }

    /// Saved user configuration.
    #[must_use]
    pub fn user_configs(&self) -> &UserConfigStore {
        &self.user_configs
    }

    /// Custom-source identifiers.
    #[must_use]
    pub fn identifiers(&self) -> &IdentifierAllocator {
        &self.identifiers
    }

    // -----------------------------------------------------------------------
    // Invalid extensions
    // -----------------------------------------------------------------------

    /// Every extension recorded as invalid, sorted by id.
    #[must_use]
    pub fn invalid_extensions(&self) -> Vec<InvalidExtension> {
        let mut all: Vec<InvalidExtension> = self.invalid.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// The failure recorded for `id`.
    #[must_use]
    pub fn invalid(&self, id: &str) -> Option<InvalidExtension> {
        self.invalid.get(id).map(|e| e.value().clone())
    }

    fn reject(
        &self,
        id: &str,
        path: Option<&Path>,
        manifest: Option<&ExtensionManifest>,
        code: LoadErrorCode,
        reason: impl Into<String>,
    ) -> BankError {
        let reason = reason.into();
        warn!(extension_id = %id, %code, %reason, "Extension is invalid");
        self.invalid.insert(
            id.to_string(),
            InvalidExtension {
                id: id.to_string(),
                path: path.map(Path::to_path_buf),
                code,
                reason: reason.clone(),
                manifest: manifest.cloned(),
            },
        );
        BankError::Invalid {
            id: id.to_string(),
            code,
            reason,
        }
    }

    // -----------------------------------------------------------------------
    // Loading
    // -----------------------------------------------------------------------

    /// Load every `*.json` manifest of the extension directory.
    ///
    /// Individual failures are recorded, never returned.
    ///
    /// # Errors
    ///
    /// Only if the directory exists but cannot be listed.
    pub async fn load_all(&self) -> BankResult<LoadReport> {
        let dir = self.dir.clone();
        let files = tokio::task::spawn_blocking(move || manifest_files(&dir))
            .await
            .map_err(|e| BankError::task(&e))??;
        info!(dir = %self.dir.display(), count = files.len(), "Discovering extensions");

        let mut report = LoadReport::default();
        for path in files {
            match self.load_file(&path).await {
                Ok(id) => report.loaded.push(id),
                Err(e) => debug!(path = %path.display(), error = %e, "manifest not loaded"),
            }
        }
        report.invalid = self.invalid_extensions();
        info!(loaded = report.loaded.len(), invalid = report.invalid.len(), "Loaded extensions");
        Ok(report)
    }

    /// Load the manifest at `path`. Returns the extension id.
    ///
    /// # Errors
    ///
    /// [`BankError::Invalid`] when the manifest is rejected, [`BankError::Io`]
    /// when it cannot be read.
    pub async fn load_file(&self, path: &Path) -> BankResult<String> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BankError::io(path, e))?;
        let manifest = match ExtensionManifest::from_json(&text) {
            Ok(manifest) => manifest,
            Err(e) => {
                let stem = file_stem(path);
                return Err(self.reject(&stem, Some(path), None, e.load_code(), e.to_string()));
            },
        };
        if !manifest.id.is_empty() {
            self.sources.insert(manifest.id.clone(), path.to_path_buf());
        }
        let id = manifest.id.clone();
        self.load_manifest(manifest, Some(path)).await?;
        Ok(id)
    }

    /// Validate, configure, gate and compile `manifest`, then register it.
    ///
    /// # Errors
    ///
    /// [`BankError::Invalid`] carrying the failure code.
    pub async fn load_manifest(&self, manifest: ExtensionManifest, path: Option<&Path>) -> BankResult<()> {
        let record_id = if manifest.id.is_empty() {
            path.map(file_stem).unwrap_or_default()
        } else {
            manifest.id.clone()
        };
        let fail = |code: LoadErrorCode, reason: String| self.reject(&record_id, path, Some(&manifest), code, reason);

        let builtin_ids: Vec<String> = self.builtins.iter().map(|e| e.key().clone()).collect();
        let reserved: Vec<&str> = builtin_ids.iter().map(String::as_str).collect();
        if let Err(e) = manifest.validate(Origin::External, &reserved) {
            return Err(fail(e.load_code(), e.to_string()));
        }
        let id = manifest.id.clone();

        let saved = match self.user_configs.get(&id).await {
            Ok(saved) => saved,
            Err(e) => return Err(fail(LoadErrorCode::UserConfigError, e.to_string())),
        };
        let payload = match apply_user_config(&id, &manifest.payload, manifest.user_config.as_ref(), saved.as_ref()) {
            Ok(payload) => payload,
            Err(e) => return Err(fail(e.load_code(), e.to_string())),
        };

        let permissions = manifest.permissions_or_default();
        if manifest.is_plugin() {
            let granted = match self.settings.granted(&id).await {
                Ok(granted) => granted,
                Err(e) => return Err(fail(LoadErrorCode::PermissionsNotGranted, e.to_string())),
            };
            if !is_granted(&permissions, granted.as_deref()) {
                return Err(fail(
                    LoadErrorCode::PermissionsNotGranted,
                    format!("permissions requested by {id} have not been granted"),
                ));
            }
        }
        let gate = CapabilityGate::new(&permissions, &self.placeholders);

        let compiled = if manifest.is_plugin() {
            self.compile_plugin(&manifest, payload, gate).await
        } else {
            self.compile_provider(&manifest, payload, gate).await
        };
        let (handle, bridge) = match compiled {
            Ok(compiled) => compiled,
            Err(BankError::Runtime(RuntimeError::InvalidExtension { code, reason, .. })) => {
                return Err(fail(code, reason));
            },
            Err(e) => return Err(fail(LoadErrorCode::CompilationError, e.to_string())),
        };

        self.invalid.remove(&id);
        let extension = Extension::external(manifest, handle, bridge);
        self.set_entry(extension).await?;
        info!(extension_id = %id, "Loaded extension");
        Ok(())
    }

    async fn compile_provider(
        &self,
        manifest: &ExtensionManifest,
        payload: String,
        gate: CapabilityGate,
    ) -> BankResult<(ExtensionHandle, Option<ProviderBridge>)> {
        let spec = ProviderSpec::new(manifest.id.clone(), payload)
            .with_version(manifest.version.clone())
            .with_gate(gate)
            .with_options(Arc::clone(&self.options))
            .with_services(self.services.clone());
        let pools = Arc::clone(&self.pools);
        let bridge = tokio::task::spawn_blocking(move || ProviderBridge::load(&spec, &pools))
            .await
            .map_err(|e| BankError::task(&e))??;

        let handle = match manifest.kind() {
            Some(ExtensionType::TorrentProvider) => ExtensionHandle::Torrent(Arc::new(JsTorrentProvider::new(bridge.clone()))),
            Some(ExtensionType::MangaProvider) => ExtensionHandle::Manga(Arc::new(JsMangaProvider::new(bridge.clone()))),
            Some(ExtensionType::OnlinestreamProvider) => {
                ExtensionHandle::Onlinestream(Arc::new(JsOnlinestreamProvider::new(bridge.clone())))
            },
            Some(ExtensionType::MediaPlayer) => {
                ExtensionHandle::MediaPlayer(Arc::new(JsMediaPlayerProvider::new(bridge.clone())))
            },
            Some(ExtensionType::CustomSourceProvider) => {
                let identifier = self.identifiers.allocate(&manifest.id);
                debug!(extension_id = %manifest.id, identifier, "assigned custom source identifier");
                ExtensionHandle::CustomSource(Arc::new(JsCustomSourceProvider::new(bridge.clone(), identifier)))
            },
            Some(ExtensionType::Plugin) | None => {
                bridge.shutdown();
                return Err(CoreError::MissingFields {
                    fields: vec!["type".to_string()],
                }
                .into());
            },
        };
        Ok((handle, Some(bridge)))
    }

    async fn compile_plugin(
        &self,
        manifest: &ExtensionManifest,
        payload: String,
        gate: CapabilityGate,
    ) -> BankResult<(ExtensionHandle, Option<ProviderBridge>)> {
        let id = manifest.id.clone();
        let bus = self.hub.register_plugin(&id);
        let config = InterpreterConfig::new(id.clone(), payload)
            .with_version(manifest.version.clone())
            .with_gate(gate)
            .with_options(Arc::clone(&self.options))
            .with_services(self.services.clone());
        let plugin_bus = Arc::clone(&bus);
        let loaded = tokio::task::spawn_blocking(move || Plugin::load(config, plugin_bus))
            .await
            .map_err(|e| BankError::task(&e))?;
        let plugin = match loaded {
            Ok(plugin) => Arc::new(plugin),
            Err(e) => {
                self.release_bus(&id, &bus);
                return Err(e.into());
            },
        };

        // Runs on the unload thread once the plugin hit its exception limit.
        let bank = Arc::downgrade(&self.bank);
        let hub = self.hub.clone();
        let own_bus = Arc::downgrade(&bus);
        plugin.set_unload_hook(Arc::new(move |extension_id: &str| {
            let Some(own_bus) = own_bus.upgrade() else {
                return;
            };
            if hub.plugin(extension_id).is_some_and(|b| Arc::ptr_eq(&b, &own_bus)) {
                hub.unregister_plugin(extension_id);
            }
            if let Some(bank) = bank.upgrade()
                && bank
                    .plugin(extension_id)
                    .is_ok_and(|p| Arc::ptr_eq(p.core().bus(), &own_bus))
            {
                bank.delete(extension_id);
            }
        }));
        Ok((ExtensionHandle::Plugin(plugin), None))
    }

    fn release_bus(&self, id: &str, bus: &Arc<PluginBus>) {
        if self.hub.plugin(id).is_some_and(|b| Arc::ptr_eq(&b, bus)) {
            self.hub.unregister_plugin(id);
        }
    }

    async fn set_entry(&self, extension: Extension) -> BankResult<()> {
        let bank = Arc::clone(&self.bank);
        tokio::task::spawn_blocking(move || bank.set(extension))
            .await
            .map_err(|e| BankError::task(&e))
    }

    async fn delete_entry(&self, id: &str) -> BankResult<bool> {
        let bank = Arc::clone(&self.bank);
        let owned = id.to_string();
        tokio::task::spawn_blocking(move || bank.delete(&owned))
            .await
            .map_err(|e| BankError::task(&e))
    }

    /// Delete `id` and detach a plugin from the hub.
    async fn remove_entry(&self, id: &str) -> BankResult<bool> {
        let plugin_bus = self.bank.plugin(id).ok().map(|p| Arc::clone(p.core().bus()));
        let removed = self.delete_entry(id).await?;
        if let Some(bus) = plugin_bus {
            self.release_bus(id, &bus);
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Built-ins
    // -----------------------------------------------------------------------

    /// Register a built-in extension with a native implementation.
    ///
    /// # Errors
    ///
    /// [`BankError::Core`] if the manifest is incomplete or its id invalid.
    pub async fn register_builtin(&self, manifest: ExtensionManifest, handle: ExtensionHandle) -> BankResult<()> {
        manifest.validate(Origin::Builtin, &[])?;
        let id = manifest.id.clone();
        self.builtins.insert(id.clone(), (manifest.clone(), handle.clone()));
        self.set_entry(Extension::builtin(manifest, handle)).await?;
        info!(extension_id = %id, "Registered built-in extension");
        Ok(())
    }

    /// Whether `id` is a registered built-in.
    #[must_use]
    pub fn is_builtin(&self, id: &str) -> bool {
        self.builtins.contains_key(id)
    }

    // -----------------------------------------------------------------------
    // Reload, install, uninstall
    // -----------------------------------------------------------------------

    fn source_of(&self, id: &str) -> Option<PathBuf> {
        if let Some(path) = self.sources.get(id) {
            return Some(path.value().clone());
        }
        let candidate = self.dir.join(format!("{id}.json"));
        candidate.is_file().then_some(candidate)
    }

    /// The extension id loaded from `path`, if any.
    #[must_use]
    pub fn id_for_path(&self, path: &Path) -> Option<String> {
        self.sources
            .iter()
            .find(|e| e.value() == path)
            .map(|e| e.key().clone())
    }

    /// Tear `id` down and load it again, from its built-in implementation or
    /// from its manifest on disk.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] when there is nothing to reload from, or the
    /// load error of the new manifest.
    pub async fn reload(&self, id: &str) -> BankResult<()> {
        let builtin = self.builtins.get(id).map(|e| e.value().clone());
        if let Some((manifest, handle)) = builtin {
            self.delete_entry(id).await?;
            self.set_entry(Extension::builtin(manifest, handle)).await?;
            info!(extension_id = %id, "Reloaded built-in extension");
            return Ok(());
        }
        let path = self.source_of(id).ok_or_else(|| BankError::NotFound(id.to_string()))?;
        self.remove_entry(id).await?;
        self.load_file(&path).await?;
        info!(extension_id = %id, "Reloaded extension");
        Ok(())
    }

    /// Remove `id` from the bank and forget it. The manifest file stays.
    ///
    /// # Errors
    ///
    /// Only if the teardown task fails.
    pub async fn unload(&self, id: &str) -> BankResult<bool> {
        let removed = self.remove_entry(id).await?;
        self.identifiers.release(id);
        self.sources.remove(id);
        self.invalid.remove(id);
        Ok(removed)
    }

    /// Write `manifest` to `<dir>/<id>.json` and load it.
    ///
    /// # Errors
    ///
    /// [`BankError::Core`] if the manifest is rejected before writing,
    /// [`BankError::Io`] if the file cannot be written, or the load error.
    pub async fn install(&self, manifest: &ExtensionManifest) -> BankResult<()> {
        let builtin_ids: Vec<String> = self.builtins.iter().map(|e| e.key().clone()).collect();
        let reserved: Vec<&str> = builtin_ids.iter().map(String::as_str).collect();
        manifest.validate(Origin::External, &reserved)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BankError::io(&self.dir, e))?;
        let path = self.dir.join(format!("{}.json", manifest.id));
        tokio::fs::write(&path, manifest.to_json()?)
            .await
            .map_err(|e| BankError::io(&path, e))?;
        info!(extension_id = %manifest.id, path = %path.display(), "Installed extension");
        self.load_file(&path).await?;
        Ok(())
    }

    /// Unload `id` and delete its manifest file.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] for built-ins and unknown ids,
    /// [`BankError::Io`] if the file cannot be removed.
    pub async fn uninstall(&self, id: &str) -> BankResult<()> {
        if self.is_builtin(id) {
            return Err(BankError::NotFound(id.to_string()));
        }
        let path = self.source_of(id);
        let removed = self.unload(id).await?;
        match path {
            Some(path) => {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| BankError::io(&path, e))?;
                self.user_configs.delete(id).await?;
                info!(extension_id = %id, "Uninstalled extension");
                Ok(())
            },
            None if removed => Ok(()),
            None => Err(BankError::NotFound(id.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Permissions and user config
    // -----------------------------------------------------------------------

    async fn read_manifest(&self, id: &str) -> BankResult<ExtensionManifest> {
        let path = self.source_of(id).ok_or_else(|| BankError::NotFound(id.to_string()))?;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| BankError::io(&path, e))?;
        Ok(ExtensionManifest::from_json(&text)?)
    }

    /// Grant the permissions of the on-disk manifest of `id`, then reload it.
    /// Returns the stored hash.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] without a manifest, store errors, or the
    /// reload error.
    pub async fn grant_permissions(&self, id: &str) -> BankResult<String> {
        let manifest = self.read_manifest(id).await?;
        let hash = permission_hash(&manifest.permissions_or_default());
        self.settings.grant(id, &hash).await?;
        self.reload(id).await?;
        Ok(hash)
    }

    /// Forget the grant of `id` and unload it if it is a running plugin.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn revoke_permissions(&self, id: &str) -> BankResult<bool> {
        let revoked = self.settings.revoke(id).await?;
        if revoked
            && self.bank.plugin(id).is_ok()
            && let Err(e) = self.reload(id).await
        {
            debug!(extension_id = %id, error = %e, "plugin unloaded after revoke");
        }
        Ok(revoked)
    }

    /// Validate and store user config values of `id`, then reload it.
    ///
    /// # Errors
    ///
    /// [`BankError::NotFound`] if the manifest has no schema,
    /// [`BankError::Core`] for invalid values, or the reload error.
    pub async fn save_user_config(&self, id: &str, values: &BTreeMap<String, String>) -> BankResult<SavedUserConfig> {
        let manifest = self.read_manifest(id).await?;
        let schema = manifest
            .user_config
            .as_ref()
            .ok_or_else(|| BankError::NotFound(format!("user config schema of {id}")))?;
        let saved = schema.save(values)?;
        self.user_configs.set(id, &saved).await?;
        self.reload(id).await?;
        Ok(saved)
    }

    /// Tear down every external extension, keeping built-ins.
    ///
    /// # Errors
    ///
    /// Only if the teardown task fails.
    pub async fn unload_all(&self) -> BankResult<()> {
        let bank = Arc::clone(&self.bank);
        tokio::task::spawn_blocking(move || bank.remove_external())
            .await
            .map_err(|e| BankError::task(&e))?;
        for id in self.hub.plugin_ids() {
            if !self.bank.contains(&id) {
                self.hub.unregister_plugin(&id);
            }
        }
        self.pools.cleanup();
        Ok(())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Whether `path` names a manifest file.
pub(crate) fn is_manifest_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// `*.json` files directly inside `dir`, sorted. A missing directory is empty.
fn manifest_files(dir: &Path) -> BankResult<Vec<PathBuf>> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "extension directory does not exist");
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            BankError::io(dir, source)
        })?;
        if entry.file_type().is_file() && is_manifest_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
