//! Config file discovery and layered loading.
//!
//! Implements the `HostConfig::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge the user file (explicit path, or `<config_dir>/harbor/config.toml`)
//! 3. Apply `HARBOR_*` environment overrides
//! 4. Deserialize the merged tree → `HostConfig`
//! 5. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::HostConfig;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Environment variables mapped onto dotted config keys.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HARBOR_LOG", "logging.level"),
    ("HARBOR_LOG_FORMAT", "logging.format"),
    ("HARBOR_EXTENSIONS_DIR", "paths.extensions_dir"),
    ("HARBOR_DATA_DIR", "paths.data_dir"),
    ("HARBOR_DOWNLOAD_DIR", "paths.download_dir"),
    ("HARBOR_POOL_CAPACITY", "runtime.pool_capacity"),
    ("HARBOR_WATCH", "bank.watch"),
];

/// Load the configuration with layered precedence.
///
/// `explicit` replaces the default user file location when given; a missing
/// explicit file is an error while a missing default file is skipped.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a layer is malformed or the merged
/// configuration fails validation.
pub fn load(explicit: Option<&Path>) -> ConfigResult<HostConfig> {
    let env: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with("HARBOR_"))
        .collect();
    load_with_env(explicit, &env)
}

/// [`load`] with an explicit environment map.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    explicit: Option<&Path>,
    env: &HashMap<String, String>,
) -> ConfigResult<HostConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;

    match explicit {
        Some(path) => {
            let overlay = read_file(path)?.ok_or_else(|| ConfigError::ReadError {
                path: path.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
            deep_merge(&mut merged, &overlay);
            info!(path = %path.display(), "loaded config file");
        },
        None => {
            if let Some(path) = default_user_path()
                && let Some(overlay) = read_file(&path)?
            {
                deep_merge(&mut merged, &overlay);
                info!(path = %path.display(), "loaded user config");
            }
        },
    }

    let applied = apply_env_overrides(&mut merged, env);
    if applied > 0 {
        debug!(count = applied, "applied environment overrides");
    }

    let config: HostConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Default location of the user config file.
#[must_use]
pub fn default_user_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "harbor").map(|d| d.config_dir().join("config.toml"))
}

/// Read a TOML file, returning `None` if it does not exist.
fn read_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

/// Recursively deep-merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the base.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

/// Write environment overrides into the merged tree; returns how many applied.
fn apply_env_overrides(merged: &mut toml::Value, env: &HashMap<String, String>) -> usize {
    let mut applied: usize = 0;
    for (var, dotted) in ENV_OVERRIDES {
        let Some(raw) = env.get(*var) else {
            continue;
        };
        let Some((section, key)) = dotted.split_once('.') else {
            continue;
        };
        let value = parse_scalar(raw);
        if let toml::Value::Table(root) = merged {
            let entry = root
                .entry(section.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
            if let toml::Value::Table(table) = entry {
                table.insert(key.to_string(), value);
                applied = applied.saturating_add(1);
            }
        }
    }
    applied
}

/// Interpret an environment string as a TOML scalar.
fn parse_scalar(raw: &str) -> toml::Value {
    if let Ok(i) = raw.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    match raw {
        "true" => toml::Value::Boolean(true),
        "false" => toml::Value::Boolean(false),
        other => toml::Value::String(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_struct_defaults() {
        let config = load_with_env(None, &HashMap::new());
        // The user file may exist on a developer machine; only compare when absent.
        if default_user_path().is_none_or(|p| !p.exists()) {
            assert_eq!(config.unwrap(), HostConfig::default());
        }
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\npool_capacity = 3\n[plugins]\nrender_interval_ms = 80").unwrap();
        let config = load_with_env(Some(file.path()), &HashMap::new()).unwrap();
        assert_eq!(config.runtime.pool_capacity, 3);
        assert_eq!(config.plugins.render_interval_ms, 80);
        assert_eq!(config.runtime.acquire_timeout_ms, 5_000);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\npool_capacity = 3").unwrap();
        let env = HashMap::from([
            ("HARBOR_POOL_CAPACITY".to_string(), "7".to_string()),
            ("HARBOR_LOG".to_string(), "debug".to_string()),
            ("HARBOR_EXTENSIONS_DIR".to_string(), "/opt/ext".to_string()),
        ]);
        let config = load_with_env(Some(file.path()), &env).unwrap();
        assert_eq!(config.runtime.pool_capacity, 7);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.paths.extensions_dir(), PathBuf::from("/opt/ext"));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let err = load_with_env(Some(Path::new("/nonexistent/harbor.toml")), &HashMap::new());
        assert!(matches!(err, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn test_invalid_value_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\npool_capacity = 0").unwrap();
        let err = load_with_env(Some(file.path()), &HashMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { field, .. } if field == "runtime.pool_capacity"));
    }

    #[test]
    fn test_deep_merge_tables() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n[b]\nz = 4").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_integer(), Some(4));
    }
}
