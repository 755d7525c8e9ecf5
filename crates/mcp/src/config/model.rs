//! Data models for beacon configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::validation::ValidationError;

pub const DEFAULT_MCP_URL: &str = "http://127.0.0.1:8087/mcp";
pub const DEFAULT_MCP_TRANSPORT: &str = "streamable-http";
pub const DEFAULT_HOST_LISTEN: &str = "127.0.0.1:8087";
pub const DEFAULT_HOST_MCP_PATH: &str = "/mcp";

/// Top-level configuration stored in `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeaconConfig {
    pub mcp: McpSettings,
    pub verbose: bool,
    pub host: HostSettings,
}

/// How the client reaches the capability backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct McpSettings {
    /// Endpoint URL, or the backend command line for stdio.
    pub url: String,
    pub transport: String,
}

/// Settings for the managed backend started by `beacon up`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostSettings {
    pub listen: String,
    pub mcp_path: String,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_MCP_URL.to_string(),
            transport: DEFAULT_MCP_TRANSPORT.to_string(),
        }
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_HOST_LISTEN.to_string(),
            mcp_path: DEFAULT_HOST_MCP_PATH.to_string(),
        }
    }
}

/// A configurable key and the environment variable that overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub key: &'static str,
    pub env_var: &'static str,
}

pub const FIELDS: [FieldDef; 5] = [
    FieldDef {
        key: "mcp.url",
        env_var: "BEACON_MCP_URL",
    },
    FieldDef {
        key: "mcp.transport",
        env_var: "BEACON_MCP_TRANSPORT",
    },
    FieldDef {
        key: "verbose",
        env_var: "BEACON_VERBOSE",
    },
    FieldDef {
        key: "host.listen",
        env_var: "BEACON_HOST_LISTEN",
    },
    FieldDef {
        key: "host.mcp_path",
        env_var: "BEACON_HOST_MCP_PATH",
    },
];

/// Where an effective value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldSource {
    Default,
    ConfigFile,
    Env,
}

impl FieldSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldSource::Default => "default",
            FieldSource::ConfigFile => "config.json",
            FieldSource::Env => "env",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub key: &'static str,
    pub value: String,
    pub source: FieldSource,
}

impl BeaconConfig {
    /// String form of a field, `None` for unknown keys.
    pub fn field_value(&self, key: &str) -> Option<String> {
        let value = match key {
            "mcp.url" => self.mcp.url.clone(),
            "mcp.transport" => self.mcp.transport.clone(),
            "verbose" => self.verbose.to_string(),
            "host.listen" => self.host.listen.clone(),
            "host.mcp_path" => self.host.mcp_path.clone(),
            _ => return None,
        };
        Some(value)
    }

    /// Set a field from its string form. Returns false for unknown keys.
    pub fn apply_field(&mut self, key: &str, value: &str) -> bool {
        match key {
            "mcp.url" => self.mcp.url = value.to_string(),
            "mcp.transport" => self.mcp.transport = value.to_string(),
            "verbose" => self.verbose = parse_flag(value),
            "host.listen" => self.host.listen = value.to_string(),
            "host.mcp_path" => self.host.mcp_path = value.to_string(),
            _ => return false,
        }
        true
    }
}

pub(crate) fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true")
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown config key {0:?}")]
    UnknownKey(String),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
