//! Typed provider flavors.
//!
//! Each flavor is an `async_trait` implemented both by script-backed
//! adapters (through [`ProviderBridge`]) and by native built-ins registered
//! at startup.

use async_trait::async_trait;
use harbor_core::{ExtensionManifest, ExtensionType, Language, PermissionManifest, UserConfigSchema, encode_media_id};
use serde_json::{Value, json};

use super::types::{
    AnimeSearchOptions, AnimeSmartSearchOptions, AnimeTorrent, ChapterDetails, ChapterPage, CustomSourceSettings,
    EpisodeDetails, EpisodeServer, ListResponse, MangaSearchOptions, MangaSearchResult, MediaPlayerSettings,
    PlayRequest, PlaybackStatus, StreamProviderSettings, StreamRequest, StreamSearchOptions, StreamSearchResult,
    TorrentProviderSettings,
};
use super::{ProviderBridge, arg};
use crate::error::RuntimeResult;

/// Identity shared by every extension handle.
pub trait BaseExtension: Send + Sync {
    /// The manifest the extension was loaded from.
    fn manifest(&self) -> &ExtensionManifest;

    /// Extension id.
    fn id(&self) -> &str {
        &self.manifest().id
    }

    /// Display name.
    fn name(&self) -> &str {
        &self.manifest().name
    }

    /// Publisher version.
    fn version(&self) -> &str {
        &self.manifest().version
    }

    /// Type tag.
    fn extension_type(&self) -> Option<ExtensionType> {
        self.manifest().extension_type
    }

    /// Payload language.
    fn language(&self) -> Option<Language> {
        self.manifest().language
    }

    /// Declared permissions.
    fn permissions(&self) -> PermissionManifest {
        self.manifest().permissions_or_default()
    }

    /// User-config schema.
    fn user_config(&self) -> Option<&UserConfigSchema> {
        self.manifest().user_config.as_ref()
    }

    /// Payload source text.
    fn payload(&self) -> &str {
        &self.manifest().payload
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Torrent search.
#[async_trait]
pub trait TorrentProvider: Send + Sync {
    /// Free-text search.
    async fn search(&self, options: AnimeSearchOptions) -> RuntimeResult<Vec<AnimeTorrent>>;
    /// Search narrowed by episode, batch and resolution.
    async fn smart_search(&self, options: AnimeSmartSearchOptions) -> RuntimeResult<Vec<AnimeTorrent>>;
    /// Info hash of `torrent`, scraping its page if needed.
    async fn get_torrent_info_hash(&self, torrent: &AnimeTorrent) -> RuntimeResult<String>;
    /// Magnet link of `torrent`.
    async fn get_torrent_magnet_link(&self, torrent: &AnimeTorrent) -> RuntimeResult<String>;
    /// Latest releases.
    async fn get_latest(&self) -> RuntimeResult<Vec<AnimeTorrent>>;
    /// Capabilities.
    async fn get_settings(&self) -> RuntimeResult<TorrentProviderSettings>;
}

/// Manga scraping.
#[async_trait]
pub trait MangaProvider: Send + Sync {
    /// Search by title.
    async fn search(&self, options: MangaSearchOptions) -> RuntimeResult<Vec<MangaSearchResult>>;
    /// Chapters of a provider-side manga id.
    async fn find_chapters(&self, manga_id: &str) -> RuntimeResult<Vec<ChapterDetails>>;
    /// Pages of a chapter.
    async fn find_chapter_pages(&self, chapter_id: &str) -> RuntimeResult<Vec<ChapterPage>>;
}

/// Online streaming.
#[async_trait]
pub trait OnlinestreamProvider: Send + Sync {
    /// Search by title, optionally for dubs.
    async fn search(&self, options: StreamSearchOptions) -> RuntimeResult<Vec<StreamSearchResult>>;
    /// Episodes of a provider-side anime id.
    async fn find_episodes(&self, id: &str) -> RuntimeResult<Vec<EpisodeDetails>>;
    /// Sources of `episode` on `server`.
    async fn find_episode_server(&self, episode: &EpisodeDetails, server: &str) -> RuntimeResult<EpisodeServer>;
    /// Capabilities, including the server list.
    async fn get_settings(&self) -> RuntimeResult<StreamProviderSettings>;

    /// Servers accepted by [`find_episode_server`](Self::find_episode_server).
    async fn get_episode_servers(&self) -> RuntimeResult<Vec<String>> {
        Ok(self.get_settings().await?.episode_servers)
    }
}

/// External media player control.
#[async_trait]
pub trait MediaPlayerProvider: Send + Sync {
    /// Capabilities.
    async fn get_settings(&self) -> RuntimeResult<MediaPlayerSettings>;
    /// Hand the user configuration to the player.
    async fn init_config(&self, config: Value) -> RuntimeResult<()>;
    /// Launch or connect.
    async fn start(&self) -> RuntimeResult<()>;
    /// Disconnect.
    async fn stop(&self) -> RuntimeResult<()>;
    /// Play a local file.
    async fn play(&self, request: PlayRequest) -> RuntimeResult<()>;
    /// Play a stream.
    async fn stream(&self, request: StreamRequest) -> RuntimeResult<()>;
    /// Current status.
    async fn get_playback_status(&self) -> RuntimeResult<PlaybackStatus>;
}

/// A custom media catalogue.
#[async_trait]
pub trait CustomSourceProvider: Send + Sync {
    /// Identifier namespacing this source's local ids, in `[1, 65535]`.
    fn extension_identifier(&self) -> u16;

    /// Global media id of local id `local_id`, `None` if it does not fit.
    fn media_id(&self, local_id: u64) -> Option<u64> {
        encode_media_id(self.extension_identifier(), local_id)
    }

    /// Browse anime.
    async fn list_anime(&self, search: &str, page: u32, per_page: u32) -> RuntimeResult<ListResponse>;
    /// Browse manga.
    async fn list_manga(&self, search: &str, page: u32, per_page: u32) -> RuntimeResult<ListResponse>;
    /// Anime by local ids.
    async fn get_anime(&self, ids: &[u64]) -> RuntimeResult<Vec<Value>>;
    /// Details of one anime.
    async fn get_anime_details(&self, id: u64) -> RuntimeResult<Value>;
    /// One anime with its relations.
    async fn get_anime_with_relations(&self, id: u64) -> RuntimeResult<Value>;
    /// Episode metadata of one anime.
    async fn get_anime_metadata(&self, id: u64) -> RuntimeResult<Value>;
    /// Manga by local ids.
    async fn get_manga(&self, ids: &[u64]) -> RuntimeResult<Vec<Value>>;
    /// Details of one manga.
    async fn get_manga_details(&self, id: u64) -> RuntimeResult<Value>;
    /// Capabilities.
    async fn get_settings(&self) -> RuntimeResult<CustomSourceSettings>;
}

// ---------------------------------------------------------------------------
// Script adapters
// ---------------------------------------------------------------------------

macro_rules! js_adapter {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            bridge: ProviderBridge,
        }

        impl $name {
            /// Adapter over `bridge`.
            #[must_use]
            pub fn new(bridge: ProviderBridge) -> Self {
                Self { bridge }
            }

            /// The underlying bridge.
            #[must_use]
            pub fn bridge(&self) -> &ProviderBridge {
                &self.bridge
            }
        }
    };
}

js_adapter!(
    /// [`TorrentProvider`] backed by a script.
    JsTorrentProvider
);
js_adapter!(
    /// [`MangaProvider`] backed by a script.
    JsMangaProvider
);
js_adapter!(
    /// [`OnlinestreamProvider`] backed by a script.
    JsOnlinestreamProvider
);
js_adapter!(
    /// [`MediaPlayerProvider`] backed by a script.
    JsMediaPlayerProvider
);

#[async_trait]
impl TorrentProvider for JsTorrentProvider {
    async fn search(&self, options: AnimeSearchOptions) -> RuntimeResult<Vec<AnimeTorrent>> {
        self.bridge.call("search", vec![arg(&options)?]).await
    }

    async fn smart_search(&self, options: AnimeSmartSearchOptions) -> RuntimeResult<Vec<AnimeTorrent>> {
        self.bridge.call("smartSearch", vec![arg(&options)?]).await
    }

    async fn get_torrent_info_hash(&self, torrent: &AnimeTorrent) -> RuntimeResult<String> {
        self.bridge.call("getTorrentInfoHash", vec![arg(torrent)?]).await
    }

    async fn get_torrent_magnet_link(&self, torrent: &AnimeTorrent) -> RuntimeResult<String> {
        self.bridge.call("getTorrentMagnetLink", vec![arg(torrent)?]).await
    }

    async fn get_latest(&self) -> RuntimeResult<Vec<AnimeTorrent>> {
        self.bridge.call("getLatest", vec![]).await
    }

    async fn get_settings(&self) -> RuntimeResult<TorrentProviderSettings> {
        self.bridge.call("getSettings", vec![]).await
    }
}

#[async_trait]
impl MangaProvider for JsMangaProvider {
    async fn search(&self, options: MangaSearchOptions) -> RuntimeResult<Vec<MangaSearchResult>> {
        self.bridge.call("search", vec![arg(&options)?]).await
    }

    async fn find_chapters(&self, manga_id: &str) -> RuntimeResult<Vec<ChapterDetails>> {
        self.bridge.call("findChapters", vec![json!(manga_id)]).await
    }

    async fn find_chapter_pages(&self, chapter_id: &str) -> RuntimeResult<Vec<ChapterPage>> {
        self.bridge.call("findChapterPages", vec![json!(chapter_id)]).await
    }
}

#[async_trait]
impl OnlinestreamProvider for JsOnlinestreamProvider {
    async fn search(&self, options: StreamSearchOptions) -> RuntimeResult<Vec<StreamSearchResult>> {
        self.bridge.call("search", vec![arg(&options)?]).await
    }

    async fn find_episodes(&self, id: &str) -> RuntimeResult<Vec<EpisodeDetails>> {
        self.bridge.call("findEpisodes", vec![json!(id)]).await
    }

    async fn find_episode_server(&self, episode: &EpisodeDetails, server: &str) -> RuntimeResult<EpisodeServer> {
        self.bridge
            .call("findEpisodeServer", vec![arg(episode)?, json!(server)])
            .await
    }

    async fn get_settings(&self) -> RuntimeResult<StreamProviderSettings> {
        self.bridge.call("getSettings", vec![]).await
    }
}

#[async_trait]
impl MediaPlayerProvider for JsMediaPlayerProvider {
    async fn get_settings(&self) -> RuntimeResult<MediaPlayerSettings> {
        self.bridge.call("getSettings", vec![]).await
    }

    async fn init_config(&self, config: Value) -> RuntimeResult<()> {
        self.bridge.call_raw("initConfig", vec![config]).await.map(drop)
    }

    async fn start(&self) -> RuntimeResult<()> {
        self.bridge.call_raw("start", vec![]).await.map(drop)
    }

    async fn stop(&self) -> RuntimeResult<()> {
        self.bridge.call_raw("stop", vec![]).await.map(drop)
    }

    async fn play(&self, request: PlayRequest) -> RuntimeResult<()> {
        self.bridge.call_raw("play", vec![arg(&request)?]).await.map(drop)
    }

    async fn stream(&self, request: StreamRequest) -> RuntimeResult<()> {
        self.bridge.call_raw("stream", vec![arg(&request)?]).await.map(drop)
    }

    async fn get_playback_status(&self) -> RuntimeResult<PlaybackStatus> {
        self.bridge.call("getPlaybackStatus", vec![]).await
    }
}

/// [`CustomSourceProvider`] backed by a script.
#[derive(Debug, Clone)]
pub struct JsCustomSourceProvider {
    bridge: ProviderBridge,
    identifier: u16,
}

impl JsCustomSourceProvider {
    /// Adapter over `bridge`, namespaced by `identifier`.
    #[must_use]
    pub fn new(bridge: ProviderBridge, identifier: u16) -> Self {
        Self { bridge, identifier }
    }

    /// The underlying bridge.
    #[must_use]
    pub fn bridge(&self) -> &ProviderBridge {
        &self.bridge
    }
}

#[async_trait]
impl CustomSourceProvider for JsCustomSourceProvider {
    fn extension_identifier(&self) -> u16 {
        self.identifier
    }

    async fn list_anime(&self, search: &str, page: u32, per_page: u32) -> RuntimeResult<ListResponse> {
        self.bridge
            .call("listAnime", vec![json!(search), json!(page), json!(per_page)])
            .await
    }

    async fn list_manga(&self, search: &str, page: u32, per_page: u32) -> RuntimeResult<ListResponse> {
        self.bridge
            .call("listManga", vec![json!(search), json!(page), json!(per_page)])
            .await
    }

    async fn get_anime(&self, ids: &[u64]) -> RuntimeResult<Vec<Value>> {
        self.bridge.call("getAnime", vec![json!(ids)]).await
    }

    async fn get_anime_details(&self, id: u64) -> RuntimeResult<Value> {
        self.bridge.call_raw("getAnimeDetails", vec![json!(id)]).await
    }

    async fn get_anime_with_relations(&self, id: u64) -> RuntimeResult<Value> {
        self.bridge.call_raw("getAnimeWithRelations", vec![json!(id)]).await
    }

    async fn get_anime_metadata(&self, id: u64) -> RuntimeResult<Value> {
        self.bridge.call_raw("getAnimeMetadata", vec![json!(id)]).await
    }

    async fn get_manga(&self, ids: &[u64]) -> RuntimeResult<Vec<Value>> {
        self.bridge.call("getManga", vec![json!(ids)]).await
    }

    async fn get_manga_details(&self, id: u64) -> RuntimeResult<Value> {
        self.bridge.call_raw("getMangaDetails", vec![json!(id)]).await
    }

    async fn get_settings(&self) -> RuntimeResult<CustomSourceSettings> {
        self.bridge.call("getSettings", vec![]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::pool_manager::PoolManager;
    use crate::provider::ProviderSpec;
    use crate::provider::types::TorrentProviderKind;
    use harbor_core::EXTENSION_ID_OFFSET;

    fn bridge(id: &str, source: &str) -> (ProviderBridge, PoolManager<Interpreter>) {
        let pools = PoolManager::new(1);
        let bridge = ProviderBridge::load(&ProviderSpec::new(id, source), &pools).unwrap();
        (bridge, pools)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_torrent_adapter() {
        let (b, _p) = bridge(
            "nyaa",
            r#"class Provider {
                async search(opts) { return [{ name: opts.query + " [1080p]", seeders: 4 }]; }
                async smartSearch(opts) { return opts.batch ? [{ name: "batch", isBatch: true }] : []; }
                async getTorrentInfoHash(t) { return t.infoHash || "abc"; }
                async getTorrentMagnetLink(t) { return "magnet:?xt=urn:btih:" + t.infoHash; }
                async getLatest() { return []; }
                getSettings() {
                    return { type: "main", canSmartSearch: true, smartSearchFilters: ["batch"], supportsAdult: false };
                }
            }"#,
        );
        let p = JsTorrentProvider::new(b);
        let found = p
            .search(AnimeSearchOptions {
                query: "Frieren".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found[0].name, "Frieren [1080p]");
        assert_eq!(found[0].seeders, 4);

        let batch = p
            .smart_search(AnimeSmartSearchOptions {
                batch: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(batch[0].is_batch);

        let torrent = AnimeTorrent {
            info_hash: "ff".into(),
            ..Default::default()
        };
        assert_eq!(p.get_torrent_magnet_link(&torrent).await.unwrap(), "magnet:?xt=urn:btih:ff");
        assert!(p.get_latest().await.unwrap().is_empty());
        let settings = p.get_settings().await.unwrap();
        assert_eq!(settings.kind, TorrentProviderKind::Main);
        assert!(settings.can_smart_search);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_onlinestream_servers_from_settings() {
        let (b, _p) = bridge(
            "stream",
            r#"class Provider {
                async search() { return []; }
                async findEpisodes(id) { return [{ id: id + "-1", number: 1 }]; }
                async findEpisodeServer(ep, server) {
                    return { server, videoSources: [{ url: "https://cdn/" + ep.id, type: "m3u8", quality: "auto" }] };
                }
                getSettings() { return { episodeServers: ["alpha", "beta"], supportsDub: true }; }
            }"#,
        );
        let p = JsOnlinestreamProvider::new(b);
        assert_eq!(p.get_episode_servers().await.unwrap(), vec!["alpha", "beta"]);
        let episodes = p.find_episodes("show").await.unwrap();
        let server = p.find_episode_server(&episodes[0], "alpha").await.unwrap();
        assert_eq!(server.video_sources[0].url, "https://cdn/show-1");
        assert_eq!(server.video_sources[0].kind, "m3u8");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_custom_source_ids() {
        let (b, _p) = bridge(
            "catalogue",
            r"class Provider {
                getSettings() { return { supportsAnime: true, supportsManga: false }; }
                async getAnime(ids) { return ids.map((id) => ({ id })); }
            }",
        );
        let p = JsCustomSourceProvider::new(b, 3);
        let settings = p.get_settings().await.unwrap();
        assert!(settings.supports_anime && !settings.supports_manga);
        assert_eq!(p.get_anime(&[1, 2]).await.unwrap().len(), 2);
        let global = p.media_id(42).unwrap();
        assert!(global >= EXTENSION_ID_OFFSET);
        assert_eq!(harbor_core::decode_media_id(global), Some((3, 42)));
    }

    struct Manifested(ExtensionManifest);

    impl BaseExtension for Manifested {
        fn manifest(&self) -> &ExtensionManifest {
            &self.0
        }
    }

    #[test]
    fn test_base_extension_defaults() {
        let ext = Manifested(ExtensionManifest {
            id: "my-ext".into(),
            name: "Mine".into(),
            version: "1.0.0".into(),
            extension_type: Some(ExtensionType::MangaProvider),
            ..Default::default()
        });
        assert_eq!(ext.id(), "my-ext");
        assert_eq!(ext.extension_type(), Some(ExtensionType::MangaProvider));
        assert!(ext.permissions().is_empty());
        assert!(ext.user_config().is_none());
    }
}
