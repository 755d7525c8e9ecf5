//! Configuration for the beacon CLI.
//! This module handles loading, validation and persistence of the
//! ~/.config/beacon/config.json configuration file.

mod io;
mod model;
mod validation;

pub use io::{
    default_config_path, effective_fields, load_config, load_config_from_path, save_config_to_path, set_config_value,
    state_dir,
};
pub use model::{
    BeaconConfig, ConfigError, DEFAULT_HOST_LISTEN, DEFAULT_HOST_MCP_PATH, DEFAULT_MCP_TRANSPORT, DEFAULT_MCP_URL,
    FIELDS, FieldDef, FieldInfo, FieldSource, HostSettings, McpSettings,
};
pub use validation::{ValidationError, validate_config, validate_field};
