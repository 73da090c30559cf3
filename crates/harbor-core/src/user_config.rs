//! User configuration schemas and payload substitution.
//!
//! A manifest may declare a versioned list of fields. The values the user
//! saved for those fields are substituted into the payload wherever a
//! `{{field}}` placeholder appears, falling back to each field's default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Kind of input rendered for a user-config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserConfigFieldType {
    /// Free text.
    #[default]
    Text,
    /// Boolean toggle, stored as `"true"`/`"false"`.
    Switch,
    /// One of a fixed set of options.
    Select,
}

/// Option of a select field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Stored value.
    pub value: String,
    /// Display label.
    pub label: String,
}

/// One field of a user-config schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfigField {
    /// Input kind.
    #[serde(rename = "type", default)]
    pub field_type: UserConfigFieldType,
    /// Placeholder name.
    pub name: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Options of a select field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
    /// Value used when the user has not saved one.
    #[serde(default)]
    pub default: String,
}

/// Versioned user-config schema declared by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfigSchema {
    /// Schema version; saved values from another version are incompatible.
    pub version: u32,
    /// Whether the extension refuses to load until values are saved.
    #[serde(default)]
    pub requires_config: bool,
    /// Ordered fields.
    #[serde(default)]
    pub fields: Vec<UserConfigField>,
}

/// Values saved by the user for one extension.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SavedUserConfig {
    /// Schema version the values were saved against.
    pub version: u32,
    /// Field name to value.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl UserConfigSchema {
    /// Validate `values` against this schema and wrap them with the schema version.
    ///
    /// Unknown field names are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidUserConfigValue`] for a switch that is not
    /// a boolean or a select value outside its options.
    pub fn save(&self, values: &BTreeMap<String, String>) -> CoreResult<SavedUserConfig> {
        let mut kept = BTreeMap::new();
        for field in &self.fields {
            if let Some(value) = values.get(&field.name) {
                field.check(value)?;
                kept.insert(field.name.clone(), value.clone());
            }
        }
        Ok(SavedUserConfig {
            version: self.version,
            values: kept,
        })
    }

    /// Resolve the effective value of every field.
    ///
    /// # Errors
    ///
    /// - [`CoreError::IncompatibleUserConfig`] if `saved` has another version.
    /// - [`CoreError::UserConfigRequired`] if config is required but nothing is saved.
    /// - [`CoreError::InvalidUserConfigValue`] if a saved value fails validation.
    pub fn resolve(
        &self,
        extension_id: &str,
        saved: Option<&SavedUserConfig>,
    ) -> CoreResult<BTreeMap<String, String>> {
        match saved {
            Some(saved) if saved.version != self.version => {
                return Err(CoreError::IncompatibleUserConfig {
                    expected: self.version,
                    saved: saved.version,
                });
            },
            None if self.requires_config => {
                return Err(CoreError::UserConfigRequired {
                    id: extension_id.to_string(),
                });
            },
            _ => {},
        }

        let mut values = BTreeMap::new();
        for field in &self.fields {
            let value = saved
                .and_then(|s| s.values.get(&field.name))
                .cloned()
                .unwrap_or_else(|| field.default.clone());
            if saved.is_some_and(|s| s.values.contains_key(&field.name)) {
                field.check(&value)?;
            }
            values.insert(field.name.clone(), value);
        }
        Ok(values)
    }
}

impl UserConfigField {
    fn check(&self, value: &str) -> CoreResult<()> {
        let reject = |reason: String| CoreError::InvalidUserConfigValue {
            field: self.name.clone(),
            reason,
        };
        match self.field_type {
            UserConfigFieldType::Text => Ok(()),
            UserConfigFieldType::Switch => match value {
                "true" | "false" => Ok(()),
                other => Err(reject(format!("expected true or false, got {other:?}"))),
            },
            UserConfigFieldType::Select => {
                if self.options.iter().any(|o| o.value == value) {
                    Ok(())
                } else {
                    Err(reject(format!("{value:?} is not one of the options")))
                }
            },
        }
    }
}

/// Replace every `{{name}}` placeholder in `payload` with its value.
///
/// Placeholders naming unknown fields are left untouched.
#[must_use]
pub fn substitute_placeholders(payload: &str, values: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(payload.len());
    let mut rest = payload;
    while let Some(start) = rest.find("{{") {
        let (before, after_open) = rest.split_at(start);
        out.push_str(before);
        let inner = &after_open[2..];
        match inner.find("}}") {
            Some(end) => {
                let name = inner[..end].trim();
                if let Some(value) = values.get(name) {
                    out.push_str(value);
                } else {
                    out.push_str(&after_open[..end.saturating_add(4)]);
                }
                rest = &inner[end.saturating_add(2)..];
            },
            None => {
                out.push_str(after_open);
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out
}

/// Resolve user config for a payload and return the substituted payload.
///
/// A manifest without a schema returns the payload unchanged.
///
/// # Errors
///
/// See [`UserConfigSchema::resolve`].
pub fn apply_user_config(
    extension_id: &str,
    payload: &str,
    schema: Option<&UserConfigSchema>,
    saved: Option<&SavedUserConfig>,
) -> CoreResult<String> {
    let Some(schema) = schema else {
        return Ok(payload.to_string());
    };
    let values = schema.resolve(extension_id, saved)?;
    Ok(substitute_placeholders(payload, &values))
}
