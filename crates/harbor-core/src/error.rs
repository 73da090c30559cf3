//! Core error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating manifests and resolving user configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The manifest JSON could not be parsed.
    #[error("failed to parse manifest: {message}")]
    ManifestParse {
        /// The parse error message.
        message: String,
    },

    /// Required manifest fields are absent or empty.
    #[error("manifest is missing required fields: {}", fields.join(", "))]
    MissingFields {
        /// Names of the missing fields.
        fields: Vec<String>,
    },

    /// The extension id violates the id grammar or collides with a reserved id.
    #[error("invalid extension id {id:?}: {reason}")]
    InvalidId {
        /// The rejected id.
        id: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The extension requires user configuration that has not been saved yet.
    #[error("extension {id} requires user configuration")]
    UserConfigRequired {
        /// Extension id.
        id: String,
    },

    /// The saved user configuration was written for a different schema version.
    #[error("saved user config version {saved} does not match schema version {expected}")]
    IncompatibleUserConfig {
        /// Version declared by the manifest schema.
        expected: u32,
        /// Version of the saved configuration.
        saved: u32,
    },

    /// A user configuration value failed validation.
    #[error("invalid value for user config field {field}: {reason}")]
    InvalidUserConfigValue {
        /// Field name.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Reason code recorded when an extension fails to load.
///
/// Serialized with the literal names the front-end expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadErrorCode {
    /// User configuration could not be read or is required but missing.
    UserConfigError,
    /// The permission manifest hash does not match the granted hash.
    PermissionsNotGranted,
    /// Saved user configuration was written for another schema version.
    IncompatibleUserConfig,
    /// The id violates the id grammar or is reserved.
    #[serde(rename = "InvalidID")]
    InvalidId,
    /// The payload failed to compile.
    CompilationError,
    /// The `Provider` class is missing or its constructor threw.
    ConstructorError,
    /// Required manifest fields are missing or unparseable.
    MissingFields,
}

impl LoadErrorCode {
    /// The wire name of this code.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserConfigError => "UserConfigError",
            Self::PermissionsNotGranted => "PermissionsNotGranted",
            Self::IncompatibleUserConfig => "IncompatibleUserConfig",
            Self::InvalidId => "InvalidID",
            Self::CompilationError => "CompilationError",
            Self::ConstructorError => "ConstructorError",
            Self::MissingFields => "MissingFields",
        }
    }
}

impl fmt::Display for LoadErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    /// Map this error to the load failure code recorded for invalid extensions.
    #[must_use]
    pub fn load_code(&self) -> LoadErrorCode {
        match self {
            Self::ManifestParse { .. } | Self::MissingFields { .. } | Self::Serialization(_) => {
                LoadErrorCode::MissingFields
            },
            Self::InvalidId { .. } => LoadErrorCode::InvalidId,
            Self::UserConfigRequired { .. } | Self::InvalidUserConfigValue { .. } => {
                LoadErrorCode::UserConfigError
            },
            Self::IncompatibleUserConfig { .. } => LoadErrorCode::IncompatibleUserConfig,
        }
    }
}
