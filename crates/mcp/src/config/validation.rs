//! Per-field validation for beacon configuration.

use thiserror::Error;

use super::model::{BeaconConfig, DEFAULT_HOST_LISTEN, FIELDS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{key}: {reason}")]
pub struct ValidationError {
    pub key: String,
    pub reason: String,
}

impl ValidationError {
    fn new(key: &str, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Check that `value` is acceptable for `key`. Unknown keys pass.
pub fn validate_field(key: &str, value: &str) -> Result<(), ValidationError> {
    match key {
        "mcp.url" => {
            if value.trim().is_empty() {
                return Err(ValidationError::new(key, "must not be empty"));
            }
        }
        "mcp.transport" => {
            if value != "streamable-http" && value != "stdio" {
                return Err(ValidationError::new(
                    key,
                    format!("must be \"streamable-http\" or \"stdio\", got {value:?}"),
                ));
            }
        }
        "verbose" => {
            if value != "true" && value != "false" {
                return Err(ValidationError::new(key, format!("must be \"true\" or \"false\", got {value:?}")));
            }
        }
        "host.listen" => validate_listen(key, value)?,
        "host.mcp_path" => {
            if !value.starts_with('/') {
                return Err(ValidationError::new(key, "must start with \"/\""));
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validate every field of a loaded configuration.
pub fn validate_config(config: &BeaconConfig) -> Result<(), ValidationError> {
    for field in FIELDS {
        if let Some(value) = config.field_value(field.key) {
            validate_field(field.key, &value)?;
        }
    }
    Ok(())
}

fn validate_listen(key: &str, value: &str) -> Result<(), ValidationError> {
    let Some((host, port)) = value.trim().rsplit_once(':') else {
        return Err(ValidationError::new(
            key,
            format!("must be host:port (e.g. {DEFAULT_HOST_LISTEN:?})"),
        ));
    };
    if host.starts_with('[') != host.ends_with(']') {
        return Err(ValidationError::new(key, format!("malformed IPv6 host in {value:?}")));
    }
    if host.is_empty() && port.is_empty() {
        return Err(ValidationError::new(
            key,
            format!("must include a port (e.g. {DEFAULT_HOST_LISTEN:?})"),
        ));
    }
    match port.parse::<u32>() {
        Ok(number) if number <= u32::from(u16::MAX) => Ok(()),
        Ok(_) => Err(ValidationError::new(key, format!("port out of range in {value:?}"))),
        Err(_) => Err(ValidationError::new(
            key,
            format!("must use a valid numeric port (e.g. {DEFAULT_HOST_LISTEN:?})"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_accepts_host_port_and_port_zero() {
        for value in ["127.0.0.1:8087", ":9000", "0.0.0.0:0", "[::1]:8087", "localhost:65535"] {
            assert!(validate_field("host.listen", value).is_ok(), "{value}");
        }
    }

    #[test]
    fn listen_rejects_bad_values() {
        for value in ["127.0.0.1", "host:port", "127.0.0.1:70000", ":", "[::1:80"] {
            assert!(validate_field("host.listen", value).is_err(), "{value}");
        }
    }

    #[test]
    fn transport_and_path_rules() {
        assert!(validate_field("mcp.transport", "stdio").is_ok());
        let error = validate_field("mcp.transport", "grpc").unwrap_err();
        assert_eq!(error.to_string(), "mcp.transport: must be \"streamable-http\" or \"stdio\", got \"grpc\"");
        assert!(validate_field("host.mcp_path", "mcp").is_err());
        assert!(validate_field("mcp.url", "  ").is_err());
        assert!(validate_field("verbose", "yes").is_err());
        assert!(validate_field("unrelated", "").is_ok());
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&BeaconConfig::default()).is_ok());
    }
}
