//! Manifest fixtures.

use harbor_core::{
    AllowList, CommandArg, CommandScope, ExtensionManifest, ExtensionType, Language, PermissionManifest, Scope,
    UserConfigField, UserConfigFieldType, UserConfigSchema,
};

/// Payload of a provider whose `search` echoes its query.
pub const ECHO_PROVIDER: &str = r#"
class Provider {
    async search(opts) {
        const query = typeof opts === "string" ? opts : opts.query;
        return [{ id: "a", title: query }];
    }
    getSettings() {
        return { supportsAnime: true, supportsManga: false };
    }
}
"#;

/// Payload of a plugin that registers nothing.
pub const IDLE_PLUGIN: &str = "function init() { $ui.register((ctx) => {}); }";

/// Builds manifests for tests.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    manifest: ExtensionManifest,
}

impl ManifestBuilder {
    /// A manifest of `kind` with every required field filled.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: ExtensionType, payload: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            manifest: ExtensionManifest {
                name: format!("Test {id}"),
                id,
                version: "1.0.0".into(),
                manifest_uri: "https://example.com/manifest.json".into(),
                language: Some(Language::Javascript),
                extension_type: Some(kind),
                author: "harbor-test".into(),
                payload: payload.into(),
                ..Default::default()
            },
        }
    }

    /// A manga provider running [`ECHO_PROVIDER`].
    #[must_use]
    pub fn provider(id: impl Into<String>) -> Self {
        Self::new(id, ExtensionType::MangaProvider, ECHO_PROVIDER)
    }

    /// A custom source running [`ECHO_PROVIDER`].
    #[must_use]
    pub fn custom_source(id: impl Into<String>) -> Self {
        Self::new(id, ExtensionType::CustomSourceProvider, ECHO_PROVIDER)
    }

    /// A plugin running [`IDLE_PLUGIN`].
    #[must_use]
    pub fn plugin(id: impl Into<String>) -> Self {
        Self::new(id, ExtensionType::Plugin, IDLE_PLUGIN)
    }

    /// Replace the payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.manifest.payload = payload.into();
        self
    }

    /// Replace the version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.manifest.version = version.into();
        self
    }

    /// Request `scopes`.
    #[must_use]
    pub fn scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.permissions_mut().scopes.extend(scopes);
        self
    }

    /// Allow reading paths matching `glob`.
    #[must_use]
    pub fn read_path(mut self, glob: impl Into<String>) -> Self {
        self.permissions_mut().allow.read_paths.push(glob.into());
        self
    }

    /// Allow requests to `domain`.
    #[must_use]
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.permissions_mut().allow.domains.push(domain.into());
        self
    }

    /// Allow `command` with literal `args`.
    #[must_use]
    pub fn command(mut self, command: impl Into<String>, args: &[&str]) -> Self {
        self.permissions_mut().allow.command_scopes.push(CommandScope {
            description: None,
            command: command.into(),
            args: args.iter().map(|a| CommandArg::literal(*a)).collect(),
        });
        self
    }

    /// Declare a text field `name` with `default`.
    #[must_use]
    pub fn config_field(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        let schema = self.manifest.user_config.get_or_insert_with(|| UserConfigSchema {
            version: 1,
            requires_config: false,
            fields: Vec::new(),
        });
        let name = name.into();
        schema.fields.push(UserConfigField {
            field_type: UserConfigFieldType::Text,
            label: name.clone(),
            name,
            options: Vec::new(),
            default: default.into(),
        });
        self
    }

    /// Mark user configuration as required and set the schema version.
    #[must_use]
    pub fn requires_config(mut self, version: u32) -> Self {
        let schema = self.manifest.user_config.get_or_insert_with(|| UserConfigSchema {
            version,
            requires_config: true,
            fields: Vec::new(),
        });
        schema.version = version;
        schema.requires_config = true;
        self
    }

    fn permissions_mut(&mut self) -> &mut PermissionManifest {
        self.manifest.permissions.get_or_insert_with(|| PermissionManifest {
            scopes: Vec::new(),
            allow: AllowList::default(),
        })
    }

    /// The manifest.
    #[must_use]
    pub fn build(self) -> ExtensionManifest {
        self.manifest
    }
}
