//! Configuration IO helpers: file location, env overrides and persistence.

use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use beacon_util::expand_tilde;
use dirs_next::config_dir;
use tracing::debug;

use super::model::{BeaconConfig, ConfigError, FIELDS, FieldInfo, FieldSource};
use super::validation::{validate_config, validate_field};

const APP_DIR: &str = "beacon";

/// Returns the default path for the configuration file.
pub fn default_config_path() -> PathBuf {
    if let Some(path) = env_override("BEACON_CONFIG_PATH") {
        return expand_tilde(&path);
    }
    app_dir().join("config.json")
}

/// Directory holding runtime state such as `host_state.json`.
pub fn state_dir() -> PathBuf {
    if let Some(path) = env_override("BEACON_STATE_DIR") {
        return expand_tilde(&path);
    }
    app_dir()
}

/// Loads configuration from the default path with environment overrides applied.
pub fn load_config() -> Result<BeaconConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Defaults, then the file at `path` if present, then environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<BeaconConfig, ConfigError> {
    let mut config = read_config_file(path)?.unwrap_or_default();
    apply_env_overrides(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Saves configuration to a specific path.
pub fn save_config_to_path(config: &BeaconConfig, path: &Path) -> Result<(), ConfigError> {
    validate_config(config)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let content = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, content).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Validate and persist a single key into the file at `path`, leaving env overrides out.
pub fn set_config_value(path: &Path, key: &str, value: &str) -> Result<BeaconConfig, ConfigError> {
    let mut config = read_config_file(path)?.unwrap_or_default();
    validate_field(key, value)?;
    if !config.apply_field(key, value) {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }
    save_config_to_path(&config, path)?;
    Ok(config)
}

/// Every field with its effective value and provenance: env, then file, then default.
pub fn effective_fields(path: &Path) -> Result<Vec<FieldInfo>, ConfigError> {
    let defaults = BeaconConfig::default();
    let file = read_config_file(path)?.unwrap_or_default();

    Ok(FIELDS
        .iter()
        .map(|field| {
            let default_value = defaults.field_value(field.key).unwrap_or_default();
            let file_value = file.field_value(field.key).unwrap_or_default();
            let (value, source) = match env_override(field.env_var) {
                Some(value) => (value, FieldSource::Env),
                None if file_value != default_value => (file_value, FieldSource::ConfigFile),
                None => (default_value, FieldSource::Default),
            };
            FieldInfo {
                key: field.key,
                value,
                source,
            }
        })
        .collect())
}

fn read_config_file(path: &Path) -> Result<Option<BeaconConfig>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(None);
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(config))
}

fn apply_env_overrides(config: &mut BeaconConfig) {
    for field in FIELDS {
        if let Some(value) = env_override(field.env_var) {
            config.apply_field(field.key, &value);
        }
    }
}

fn env_override(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn app_dir() -> PathBuf {
    config_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}
