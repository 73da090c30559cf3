//! Registered extensions and their typed handles.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use harbor_core::{ExtensionManifest, Origin};
use harbor_runtime::Plugin;
use harbor_runtime::provider::{
    BaseExtension, CustomSourceProvider, MangaProvider, MediaPlayerProvider, OnlinestreamProvider,
    TorrentProvider,
};
use harbor_runtime::ProviderBridge;
use tracing::debug;

/// The implementation behind an extension, by type.
#[derive(Clone)]
pub enum ExtensionHandle {
    /// Torrent search.
    Torrent(Arc<dyn TorrentProvider>),
    /// Manga scraping.
    Manga(Arc<dyn MangaProvider>),
    /// Online streaming.
    Onlinestream(Arc<dyn OnlinestreamProvider>),
    /// Media player control.
    MediaPlayer(Arc<dyn MediaPlayerProvider>),
    /// Custom media source.
    CustomSource(Arc<dyn CustomSourceProvider>),
    /// Event-driven plugin.
    Plugin(Arc<Plugin>),
}

impl ExtensionHandle {
    /// Name of the variant, used in errors and listings.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Torrent(_) => "torrent-provider",
            Self::Manga(_) => "manga-provider",
            Self::Onlinestream(_) => "onlinestream-provider",
            Self::MediaPlayer(_) => "mediaplayer",
            Self::CustomSource(_) => "custom-source-provider",
            Self::Plugin(_) => "plugin",
        }
    }
}

impl std::fmt::Debug for ExtensionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ExtensionHandle").field(&self.kind()).finish()
    }
}

/// One entry of the bank.
pub struct Extension {
    manifest: ExtensionManifest,
    origin: Origin,
    handle: ExtensionHandle,
    bridge: Option<ProviderBridge>,
    loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extension")
            .field("id", &self.manifest.id)
            .field("origin", &self.origin)
            .field("handle", &self.handle)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl Extension {
    /// A built-in extension with a native implementation.
    #[must_use]
    pub fn builtin(manifest: ExtensionManifest, handle: ExtensionHandle) -> Self {
        Self {
            manifest,
            origin: Origin::Builtin,
            handle,
            bridge: None,
            loaded_at: Utc::now(),
        }
    }

    /// An extension loaded from a manifest. `bridge` is the provider bridge
    /// behind script-backed providers.
    #[must_use]
    pub fn external(manifest: ExtensionManifest, handle: ExtensionHandle, bridge: Option<ProviderBridge>) -> Self {
        Self {
            manifest,
            origin: Origin::External,
            handle,
            bridge,
            loaded_at: Utc::now(),
        }
    }

    /// Where the extension came from.
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Whether the extension is built in.
    #[must_use]
    pub fn is_builtin(&self) -> bool {
        self.origin == Origin::Builtin
    }

    /// The implementation.
    #[must_use]
    pub fn handle(&self) -> &ExtensionHandle {
        &self.handle
    }

    /// Raw method access for script-backed providers.
    #[must_use]
    pub fn bridge(&self) -> Option<&ProviderBridge> {
        self.bridge.as_ref()
    }

    /// When the entry was created.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Interrupt and release everything the extension runs on.
    ///
    /// Blocks while a plugin runs its cleanup callbacks.
    pub fn teardown(&self) {
        debug!(extension_id = %self.manifest.id, kind = self.handle.kind(), "tearing down extension");
        if let Some(bridge) = &self.bridge {
            bridge.shutdown();
        }
        if let ExtensionHandle::Plugin(plugin) = &self.handle {
            plugin.shutdown();
        }
    }
}

impl BaseExtension for Extension {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }
}
