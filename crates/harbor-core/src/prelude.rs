//! Prelude module - commonly used types for convenient import.
//!
//! Use `use harbor_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult, LoadErrorCode};

// Manifest
pub use crate::{
    AllowList, CommandArg, CommandScope, ExtensionManifest, ExtensionType, Language, Origin,
    PermissionManifest, Scope,
};

// User config
pub use crate::{SavedUserConfig, UserConfigSchema, apply_user_config};

// Permissions
pub use crate::{is_granted, permission_hash};
