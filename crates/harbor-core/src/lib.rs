//! Harbor Core - Manifest model and shared validation for the Harbor extension host.
//!
//! This crate provides:
//! - The extension manifest and permission manifest types
//! - Extension id validation
//! - User-config resolution and `{{field}}` payload substitution
//! - Content-addressed permission hashing
//! - The custom-source media id codec
//!
//! # Example
//!
//! ```rust
//! use harbor_core::{ExtensionManifest, Origin};
//!
//! let manifest = ExtensionManifest::from_json(r#"{
//!     "id": "gogoanime", "name": "Gogoanime", "version": "1.0.0",
//!     "language": "javascript", "type": "onlinestream-provider",
//!     "payload": "class Provider {}"
//! }"#).unwrap();
//! manifest.validate(Origin::External, &[]).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod id;
mod manifest;
mod media_id;
mod permissions;
mod user_config;

pub use error::{CoreError, CoreResult, LoadErrorCode};
pub use id::{RESERVED_IDS, is_valid_extension_id, validate_extension_id};
pub use manifest::{
    AllowList, ArgRule, CommandArg, CommandScope, ExtensionManifest, ExtensionType, Language,
    Origin, PermissionManifest, Scope,
};
pub use media_id::{
    EXTENSION_ID_OFFSET, JS_MAX_SAFE_INTEGER, MAX_EXTENSION_IDENTIFIER, MAX_LOCAL_ID,
    MIN_EXTENSION_IDENTIFIER, decode_media_id, encode_media_id, is_extension_media_id,
};
pub use permissions::{is_granted, permission_hash};
pub use user_config::{
    SavedUserConfig, SelectOption, UserConfigField, UserConfigFieldType, UserConfigSchema,
    apply_user_config, substitute_placeholders,
};
