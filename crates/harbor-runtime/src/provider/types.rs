//! Wire shapes exchanged with provider extensions.
//!
//! Field names follow the JSON the scripts see (camelCase). Everything is
//! `#[serde(default)]` on the way in: scripts routinely omit fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Partial calendar date.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FuzzyDate {
    /// Year.
    pub year: i32,
    /// Month, if known.
    pub month: Option<i32>,
    /// Day, if known.
    pub day: Option<i32>,
}

/// Media being searched for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Media {
    /// AniList id.
    pub id: i64,
    /// MyAnimeList id.
    pub id_mal: Option<i64>,
    /// Airing status.
    pub status: Option<String>,
    /// Format (`TV`, `MOVIE`...).
    pub format: Option<String>,
    /// English title.
    pub english_title: Option<String>,
    /// Romaji title.
    pub romaji_title: String,
    /// Total episodes, `-1` if unknown.
    pub episode_count: i32,
    /// Episode offset of this season in absolute numbering.
    pub absolute_season_offset: i32,
    /// Alternative titles.
    pub synonyms: Vec<String>,
    /// Adult content.
    pub is_adult: bool,
    /// Start date.
    pub start_date: Option<FuzzyDate>,
}

// ---------------------------------------------------------------------------
// Torrent
// ---------------------------------------------------------------------------

/// `search` input of a torrent provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnimeSearchOptions {
    /// Target media.
    pub media: Media,
    /// Free-text query.
    pub query: String,
}

/// `smartSearch` input of a torrent provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnimeSmartSearchOptions {
    /// Target media.
    pub media: Media,
    /// Free-text query.
    pub query: String,
    /// Look for batches.
    pub batch: bool,
    /// Wanted episode.
    pub episode_number: i32,
    /// Wanted resolution (`1080`, `720`...).
    pub resolution: String,
    /// `AniDB` anime id.
    #[serde(rename = "anidbAID")]
    pub anidb_aid: i64,
    /// `AniDB` episode id.
    #[serde(rename = "anidbEID")]
    pub anidb_eid: i64,
    /// Only best releases.
    pub best_releases: bool,
}

/// One torrent result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnimeTorrent {
    /// Provider id.
    pub provider: String,
    /// Release name.
    pub name: String,
    /// Release date, RFC 3339.
    pub date: String,
    /// Size in bytes.
    pub size: i64,
    /// Human readable size.
    pub formatted_size: String,
    /// Seeders.
    pub seeders: i32,
    /// Leechers.
    pub leechers: i32,
    /// Completed downloads.
    pub download_count: i32,
    /// Page link.
    pub link: String,
    /// `.torrent` link.
    pub download_url: String,
    /// Magnet link, if the listing has one.
    pub magnet_link: String,
    /// Info hash, if the listing has one.
    pub info_hash: String,
    /// Resolution.
    pub resolution: String,
    /// Batch release.
    pub is_batch: bool,
    /// Episode, `-1` if unknown.
    pub episode_number: i32,
    /// Release group.
    pub release_group: String,
    /// Marked as best release.
    pub is_best_release: bool,
    /// Provider is sure this matches the searched media.
    pub confirmed: bool,
}

/// Kind of torrent provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorrentProviderKind {
    /// General purpose provider.
    #[default]
    Main,
    /// Niche provider, never used for automatic selection.
    Special,
}

/// `getSettings` of a torrent provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TorrentProviderSettings {
    /// Provider kind.
    #[serde(rename = "type")]
    pub kind: TorrentProviderKind,
    /// Implements `smartSearch`.
    pub can_smart_search: bool,
    /// Options `smartSearch` honors (`batch`, `episodeNumber`...).
    pub smart_search_filters: Vec<String>,
    /// Returns adult results.
    pub supports_adult: bool,
}

// ---------------------------------------------------------------------------
// Manga
// ---------------------------------------------------------------------------

/// `search` input of a manga provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MangaSearchOptions {
    /// Title to look for.
    pub query: String,
    /// Start year, `0` if unknown.
    pub year: i32,
}

/// One manga search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MangaSearchResult {
    /// Provider id.
    pub provider: String,
    /// Provider-side id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Alternative titles.
    pub synonyms: Vec<String>,
    /// Year.
    pub year: i32,
    /// Cover image.
    pub image: String,
    /// Title similarity computed by the host.
    pub search_rating: f64,
}

/// One chapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChapterDetails {
    /// Provider id.
    pub provider: String,
    /// Provider-side id.
    pub id: String,
    /// Reader URL.
    pub url: String,
    /// Title.
    pub title: String,
    /// Chapter number as published (`10.5`).
    pub chapter: String,
    /// Position in the list.
    pub index: u32,
    /// Scanlation group.
    pub scanlator: String,
    /// Language code.
    pub language: String,
    /// Rating.
    pub rating: i32,
    /// Last update.
    pub updated_at: String,
}

/// One page image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChapterPage {
    /// Provider id.
    pub provider: String,
    /// Image URL.
    pub url: String,
    /// Page position.
    pub index: u32,
    /// Headers needed to fetch the image.
    pub headers: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Online streaming
// ---------------------------------------------------------------------------

/// `search` input of a streaming provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamSearchOptions {
    /// Target media.
    pub media: Media,
    /// Title to look for.
    pub query: String,
    /// Dubbed versions.
    pub dub: bool,
    /// Start year, `0` if unknown.
    pub year: i32,
}

/// One streaming search result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamSearchResult {
    /// Provider-side id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Page URL.
    pub url: String,
    /// `sub`, `dub` or `both`.
    pub sub_or_dub: String,
}

/// One episode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EpisodeDetails {
    /// Provider id.
    pub provider: String,
    /// Provider-side id.
    pub id: String,
    /// Episode number.
    pub number: i32,
    /// Page URL.
    pub url: String,
    /// Title.
    pub title: String,
}

/// A subtitle track.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoSubtitle {
    /// Track id.
    pub id: String,
    /// File URL.
    pub url: String,
    /// Language.
    pub language: String,
    /// Selected by default.
    pub is_default: bool,
}

/// One playable source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoSource {
    /// Stream URL.
    pub url: String,
    /// `mp4`, `m3u8`...
    #[serde(rename = "type")]
    pub kind: String,
    /// Quality label.
    pub quality: String,
    /// Subtitles.
    pub subtitles: Vec<VideoSubtitle>,
}

/// Sources of one episode on one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EpisodeServer {
    /// Provider id.
    pub provider: String,
    /// Server name.
    pub server: String,
    /// Headers needed to play the sources.
    pub headers: BTreeMap<String, String>,
    /// Playable sources.
    pub video_sources: Vec<VideoSource>,
}

/// `getSettings` of a streaming provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamProviderSettings {
    /// Servers `findEpisodeServer` accepts.
    pub episode_servers: Vec<String>,
    /// Offers dubbed versions.
    pub supports_dub: bool,
}

// ---------------------------------------------------------------------------
// Media player
// ---------------------------------------------------------------------------

/// `getSettings` of a media player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MediaPlayerSettings {
    /// Player name.
    pub name: String,
    /// Reports playback progress.
    pub can_track_progress: bool,
}

/// `play` input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlayRequest {
    /// Local file.
    pub path: String,
    /// Media id, if known.
    pub media_id: Option<i64>,
    /// Episode number, if known.
    pub episode_number: Option<i32>,
}

/// `stream` input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamRequest {
    /// Stream URL.
    pub url: String,
    /// Media id, if known.
    pub media_id: Option<i64>,
    /// Episode number, if known.
    pub episode_number: Option<i32>,
    /// Display title.
    pub title: String,
}

/// `getPlaybackStatus` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackStatus {
    /// Progress in `[0, 1]`.
    pub completion_percentage: f64,
    /// Currently playing.
    pub playing: bool,
    /// File name.
    pub filename: String,
    /// Full path or URL.
    pub path: String,
    /// Duration in seconds.
    pub duration: f64,
    /// Position in seconds.
    pub current_time: f64,
}

// ---------------------------------------------------------------------------
// Custom source
// ---------------------------------------------------------------------------

/// `getSettings` of a custom source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomSourceSettings {
    /// Serves anime.
    pub supports_anime: bool,
    /// Serves manga.
    pub supports_manga: bool,
}

/// A page of `listAnime` / `listManga`. Media entries keep the `AniList`
/// shape and are passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListResponse {
    /// Media on this page.
    pub media: Vec<Value>,
    /// Page number.
    pub page: u32,
    /// Total pages.
    pub total_pages: u32,
    /// Total entries.
    pub total: u32,
}
