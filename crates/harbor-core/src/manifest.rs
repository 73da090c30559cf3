//! Extension manifest types.
//!
//! A manifest (`<id>.json` in the extension directory) describes an
//! extension's identity, payload, optional user-config schema and, for
//! plugins, the permission manifest that gates host bindings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::id::validate_extension_id;
use crate::user_config::UserConfigSchema;

/// Type tag of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtensionType {
    /// Torrent search provider.
    #[serde(alias = "anime-torrent-provider")]
    TorrentProvider,
    /// Manga scraping provider.
    MangaProvider,
    /// Online streaming provider.
    OnlinestreamProvider,
    /// Custom media source.
    CustomSourceProvider,
    /// Media player controller.
    #[serde(rename = "mediaplayer")]
    MediaPlayer,
    /// Long-lived, event-driven plugin.
    Plugin,
}

impl ExtensionType {
    /// The wire name of this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TorrentProvider => "torrent-provider",
            Self::MangaProvider => "manga-provider",
            Self::OnlinestreamProvider => "onlinestream-provider",
            Self::CustomSourceProvider => "custom-source-provider",
            Self::MediaPlayer => "mediaplayer",
            Self::Plugin => "plugin",
        }
    }

    /// Whether this type is invoked on demand through the provider bridge.
    #[must_use]
    pub fn is_provider(self) -> bool {
        !matches!(self, Self::Plugin)
    }
}

impl fmt::Display for ExtensionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Plain JavaScript.
    Javascript,
    /// TypeScript with types already stripped by the publisher.
    Typescript,
    /// Native implementation; only valid for built-ins.
    Go,
}

impl Language {
    /// Whether payloads in this language are evaluated by the interpreter.
    #[must_use]
    pub fn is_script(self) -> bool {
        matches!(self, Self::Javascript | Self::Typescript)
    }
}

/// Where an extension came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Compiled into the host and registered with a native implementation.
    Builtin,
    /// Loaded from a manifest on disk.
    External,
}

/// A capability scope named in a permission manifest.
///
/// Unknown scope names are preserved so that the permission hash covers
/// exactly what the publisher declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Scope {
    /// Filesystem, command execution and archive bindings.
    System,
    /// Plugin key-value stores.
    Storage,
    /// Host database access.
    Database,
    /// AniList data access.
    Anilist,
    /// AniList token access.
    AnilistToken,
    /// Torrent provider access.
    AnimeTorrent,
    /// Media player control.
    MediaPlayer,
    /// Playback control.
    Playback,
    /// Desktop notifications.
    Notification,
    /// Scheduled jobs.
    Cron,
    /// Any scope this host does not know about.
    Other(String),
}

impl Scope {
    /// The wire name of this scope.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::Storage => "storage",
            Self::Database => "database",
            Self::Anilist => "anilist",
            Self::AnilistToken => "anilist-token",
            Self::AnimeTorrent => "anime-torrent",
            Self::MediaPlayer => "media-player",
            Self::Playback => "playback",
            Self::Notification => "notification",
            Self::Cron => "cron",
            Self::Other(name) => name,
        }
    }
}

impl From<String> for Scope {
    fn from(value: String) -> Self {
        match value.as_str() {
            "system" => Self::System,
            "storage" => Self::Storage,
            "database" => Self::Database,
            "anilist" => Self::Anilist,
            "anilist-token" => Self::AnilistToken,
            "anime-torrent" => Self::AnimeTorrent,
            "media-player" => Self::MediaPlayer,
            "playback" => Self::Playback,
            "notification" => Self::Notification,
            "cron" => Self::Cron,
            _ => Self::Other(value),
        }
    }
}

impl From<Scope> for String {
    fn from(value: Scope) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One argument rule of a command scope.
///
/// Exactly one of `value` (literal match) or `validator` (token or regex)
/// is expected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandArg {
    /// Literal value the argument must equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Validator token (`$PATH`, `$ANY`, `$ARGS`) or a regular expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

/// Interpreted form of a [`CommandArg`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgRule {
    /// The argument must equal this string.
    Literal(String),
    /// The argument must be an authorized path.
    Path,
    /// Any single argument.
    Any,
    /// Any number of remaining arguments.
    Rest,
    /// The argument must match this regular expression.
    Pattern(String),
    /// Neither a value nor a validator was given; never matches.
    Invalid,
}

impl CommandArg {
    /// Literal argument rule.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            validator: None,
        }
    }

    /// Validator argument rule.
    #[must_use]
    pub fn validator(token: impl Into<String>) -> Self {
        Self {
            value: None,
            validator: Some(token.into()),
        }
    }

    /// Interpret this argument rule.
    #[must_use]
    pub fn rule(&self) -> ArgRule {
        if let Some(value) = self.value.as_deref().filter(|v| !v.is_empty()) {
            return ArgRule::Literal(value.to_string());
        }
        match self.validator.as_deref() {
            Some("$PATH") => ArgRule::Path,
            Some("$ANY") => ArgRule::Any,
            Some("$ARGS") => ArgRule::Rest,
            Some(pattern) if !pattern.is_empty() => ArgRule::Pattern(pattern.to_string()),
            _ => ArgRule::Invalid,
        }
    }
}

/// A command an extension may execute, with its argument rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandScope {
    /// Human-readable purpose shown when permissions are requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Executable name.
    pub command: String,
    /// Ordered argument rules.
    #[serde(default)]
    pub args: Vec<CommandArg>,
}

/// Allow-lists consulted on each sensitive operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowList {
    /// Globs of readable paths.
    #[serde(default)]
    pub read_paths: Vec<String>,
    /// Globs of writable paths.
    #[serde(default)]
    pub write_paths: Vec<String>,
    /// Commands that may be executed.
    #[serde(default)]
    pub command_scopes: Vec<CommandScope>,
    /// Network domain patterns (`example.com`, `*.example.com`).
    #[serde(default)]
    pub domains: Vec<String>,
}

/// Permission manifest declared by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionManifest {
    /// Granted capability scopes.
    #[serde(default)]
    pub scopes: Vec<Scope>,
    /// Allow-lists for the scopes that need them.
    #[serde(default)]
    pub allow: AllowList,
}

impl PermissionManifest {
    /// Whether `scope` is declared.
    #[must_use]
    pub fn has_scope(&self, scope: &Scope) -> bool {
        self.scopes.contains(scope)
    }

    /// Whether the manifest declares nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.allow == AllowList::default()
    }

    /// Short human-readable summary shown when asking the user to grant.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut lines = Vec::new();
        for scope in &self.scopes {
            lines.push(format!("scope: {scope}"));
        }
        for path in &self.allow.read_paths {
            lines.push(format!("read: {path}"));
        }
        for path in &self.allow.write_paths {
            lines.push(format!("write: {path}"));
        }
        for cmd in &self.allow.command_scopes {
            lines.push(format!("command: {}", cmd.command));
        }
        for domain in &self.allow.domains {
            lines.push(format!("domain: {domain}"));
        }
        lines.join("\n")
    }
}

/// An extension manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Unique id, see [`validate_extension_id`].
    #[serde(default)]
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Publisher version string.
    #[serde(default)]
    pub version: String,
    /// Where updates of this manifest are published.
    #[serde(default, rename = "manifestURI")]
    pub manifest_uri: String,
    /// Payload language.
    #[serde(default)]
    pub language: Option<Language>,
    /// Extension type tag.
    #[serde(default, rename = "type")]
    pub extension_type: Option<ExtensionType>,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Author name.
    #[serde(default)]
    pub author: String,
    /// Homepage.
    #[serde(default)]
    pub website: String,
    /// Icon URL.
    #[serde(default)]
    pub icon: String,
    /// Payload source text.
    #[serde(default)]
    pub payload: String,
    /// Optional remote location of the payload.
    #[serde(default, rename = "payloadURI")]
    pub payload_uri: String,
    /// Permission manifest (plugins).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionManifest>,
    /// User-config schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_config: Option<UserConfigSchema>,
}

impl ExtensionManifest {
    /// Parse a manifest from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ManifestParse`] if the text is not a manifest.
    pub fn from_json(text: &str) -> CoreResult<Self> {
        serde_json::from_str(text).map_err(|e| CoreError::ManifestParse {
            message: e.to_string(),
        })
    }

    /// Serialize the manifest as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Serialization`] on encoder failure.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The extension type, if declared.
    #[must_use]
    pub fn kind(&self) -> Option<ExtensionType> {
        self.extension_type
    }

    /// Whether this manifest describes a plugin.
    #[must_use]
    pub fn is_plugin(&self) -> bool {
        self.extension_type == Some(ExtensionType::Plugin)
    }

    /// The permission manifest, or an empty one.
    #[must_use]
    pub fn permissions_or_default(&self) -> PermissionManifest {
        self.permissions.clone().unwrap_or_default()
    }

    /// Validate required fields and the id for an extension of `origin`.
    ///
    /// External extensions must carry a payload; built-ins receive their
    /// implementation at registration time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingFields`] or [`CoreError::InvalidId`].
    pub fn validate(&self, origin: Origin, reserved: &[&str]) -> CoreResult<()> {
        let mut missing = Vec::new();
        if self.id.trim().is_empty() {
            missing.push("id".to_string());
        }
        if self.name.trim().is_empty() {
            missing.push("name".to_string());
        }
        if self.version.trim().is_empty() {
            missing.push("version".to_string());
        }
        if self.language.is_none() {
            missing.push("language".to_string());
        }
        if self.extension_type.is_none() {
            missing.push("type".to_string());
        }
        if origin == Origin::External && self.payload.trim().is_empty() {
            missing.push("payload".to_string());
        }
        if !missing.is_empty() {
            return Err(CoreError::MissingFields { fields: missing });
        }

        validate_extension_id(&self.id, reserved)?;

        if origin == Origin::External
            && let Some(language) = self.language
            && !language.is_script()
        {
            return Err(CoreError::ManifestParse {
                message: format!("language {language:?} is only valid for built-in extensions"),
            });
        }

        Ok(())
    }
}
