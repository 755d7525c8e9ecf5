//! The backend's side-channel connection descriptor (`<root>/.dir2mcp/connection.json`)
//! and the auth token it advertises.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use beacon_mcp::protocol::PROTOCOL_VERSION_HEADER;
use serde::Deserialize;
use url::Url;

use crate::endpoint::resolve_root_dir;
use crate::state::ManagedProcessState;

pub const DESCRIPTOR_DIR: &str = ".dir2mcp";
pub const CONNECTION_FILE: &str = "connection.json";
pub const SECRET_TOKEN_FILE: &str = "secret.token";

const SUPPORTED_AUTH_SOURCES: [&str; 6] = ["env", "keychain", "file", "secret", "prompt", "contract"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConnectionDescriptor {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub session: SessionContract,
    pub token_source: String,
    pub token_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionContract {
    #[serde(alias = "uses_session_id")]
    pub uses_mcp_session_id: bool,
    pub header_name: String,
}

impl ConnectionDescriptor {
    pub fn path(root: &Path) -> PathBuf {
        root.join(DESCRIPTOR_DIR).join(CONNECTION_FILE)
    }

    /// `None` when the file is missing or unparsable.
    pub fn load(root: &Path) -> Option<Self> {
        let content = fs::read(Self::path(root)).ok()?;
        serde_json::from_slice(&content).ok()
    }

    /// The advertised endpoint, if it is a parseable URL.
    pub fn endpoint_url(&self) -> Option<String> {
        let url = self.url.trim();
        if url.is_empty() || Url::parse(url).is_err() {
            return None;
        }
        Some(url.to_string())
    }

    pub fn protocol_header(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(PROTOCOL_VERSION_HEADER))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Only reported when the session block opts in.
    pub fn session_header_name(&self) -> Option<&str> {
        if !self.session.uses_mcp_session_id {
            return None;
        }
        Some(self.session.header_name.trim()).filter(|name| !name.is_empty())
    }

    /// `token_source` when set, otherwise `file` if a token file is named.
    pub fn auth_source(&self) -> Option<String> {
        let source = self.token_source.trim();
        if !source.is_empty() {
            return Some(source.to_string());
        }
        if !self.token_file.trim().is_empty() {
            return Some("file".to_string());
        }
        None
    }
}

/// Contract fields surfaced by `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractDetails {
    pub protocol_header: String,
    pub session_header_name: String,
    /// Lowercased.
    pub auth_source: String,
}

impl ContractDetails {
    pub fn read(root: Option<&Path>) -> Self {
        let Some(descriptor) = root.and_then(ConnectionDescriptor::load) else {
            return Self::default();
        };
        Self {
            protocol_header: descriptor.protocol_header().unwrap_or_default().to_string(),
            session_header_name: descriptor.session_header_name().unwrap_or_default().to_string(),
            auth_source: descriptor.auth_source().unwrap_or_default().to_lowercase(),
        }
    }
}

/// Root directory the backend serves, falling back to its working directory.
pub fn state_root(state: &ManagedProcessState) -> Option<PathBuf> {
    let root = state.root_dir.trim();
    if !root.is_empty() {
        return Some(PathBuf::from(root));
    }
    let workdir = state.workdir.trim();
    if workdir.is_empty() {
        return None;
    }
    resolve_root_dir(None, Some(Path::new(workdir)))
}

/// The env token wins; otherwise `<root>/.dir2mcp/secret.token`.
pub fn resolve_probe_token(env_token: Option<&str>, root: Option<&Path>) -> Option<String> {
    if let Some(token) = env_token.map(str::trim).filter(|token| !token.is_empty()) {
        return Some(token.to_string());
    }
    let path = root?.join(DESCRIPTOR_DIR).join(SECRET_TOKEN_FILE);
    let token = fs::read_to_string(path).ok()?;
    Some(token.trim().to_string()).filter(|token| !token.is_empty())
}

pub fn is_supported_auth_source(source: &str) -> bool {
    SUPPORTED_AUTH_SOURCES.contains(&source)
}

/// Explains an auth contract the prober cannot satisfy.
pub fn auth_diagnostic(source: &str, has_token: bool) -> Option<String> {
    let source = source.trim();
    if matches!(source, "" | "none" | "unknown") {
        return None;
    }
    if !is_supported_auth_source(source) {
        return Some(format!("invalid/unknown auth source type: {source}"));
    }
    if !has_token {
        return Some(format!("missing required auth token for contract type: {source}"));
    }
    None
}
