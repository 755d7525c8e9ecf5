//! Readiness probing for managed and remote backends.

use std::time::Duration;

use beacon_mcp::protocol::AUTH_TOKEN_ENV;
use beacon_mcp::{CallContext, McpClient, McpClientOptions, TransportKind};
use beacon_util::{or_unknown, sanitize_endpoint};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::contract::{ContractDetails, auth_diagnostic, resolve_probe_token, state_root};
use crate::errors::HostError;
use crate::process::process_alive;
use crate::state::StateStore;

const REACHABILITY_TIMEOUT: Duration = Duration::from_secs(2);
const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);
const PROBE_DEADLINE: Duration = Duration::from_secs(4);

pub const ENDPOINT_NOT_REACHABLE: &str = "endpoint not reachable";
pub const ENDPOINT_NOT_IN_STATE: &str = "endpoint not available in state";
pub const PROCESS_NOT_ALIVE: &str = "process not alive";

/// Health of the managed backend, rebuilt from scratch on every check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthInfo {
    /// A state file exists.
    pub found: bool,
    pub pid: i32,
    pub alive: bool,
    pub mcp_url: String,
    pub reachable: bool,
    /// Handshake and `tools/list` succeeded.
    pub mcp_ready: bool,
    pub ready: bool,
    pub protocol_header: String,
    pub session_header_name: String,
    pub auth_source_type: String,
    pub auth_diagnostic: String,
    pub last_error: String,
}

impl HealthInfo {
    /// `key=value` lines for operator output.
    pub fn summary_lines(&self) -> Vec<String> {
        if !self.found {
            return vec!["no managed process".to_string()];
        }
        let mut lines = vec![format!("pid={} alive={}", self.pid, self.alive)];
        let endpoint = sanitize_endpoint(&self.mcp_url);
        if endpoint.is_empty() {
            lines.push("endpoint=unknown reachable=false mcp_ready=false".to_string());
            return lines;
        }
        lines.push(format!(
            "endpoint={endpoint} reachable={} mcp_ready={}",
            self.reachable, self.mcp_ready
        ));
        lines.push(format!(
            "protocol={} session_header={}",
            or_unknown(&self.protocol_header),
            or_unknown(&self.session_header_name)
        ));
        lines.push(format!("auth_source={}", or_unknown(&self.auth_source_type)));
        if !self.auth_diagnostic.is_empty() {
            lines.push(format!("auth_diagnostic={}", self.auth_diagnostic));
        }
        if !self.last_error.is_empty() {
            lines.push(format!("detail={}", self.last_error));
        }
        lines
    }

    pub fn ensure_ready(&self) -> Result<(), HostError> {
        if !self.found {
            return Err(HostError::not_ready("no managed process"));
        }
        if sanitize_endpoint(&self.mcp_url).is_empty() {
            return Err(HostError::not_ready("endpoint unknown"));
        }
        if self.ready {
            return Ok(());
        }
        let detail = [&self.last_error, &self.auth_diagnostic]
            .into_iter()
            .find(|detail| !detail.is_empty())
            .cloned()
            .unwrap_or_else(|| "unhealthy".to_string());
        Err(HostError::not_ready(detail))
    }
}

/// Reachability and readiness of an arbitrary endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteStatus {
    pub endpoint: String,
    pub reachable: bool,
    pub mcp_ready: bool,
    pub last_error: String,
}

impl RemoteStatus {
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "endpoint={} reachable={} mcp_ready={}",
            sanitize_endpoint(&self.endpoint),
            self.reachable,
            self.mcp_ready
        )];
        if !self.last_error.is_empty() {
            lines.push(format!("detail={}", self.last_error));
        }
        lines
    }

    pub fn ensure_ready(&self) -> Result<(), HostError> {
        if self.reachable && self.mcp_ready {
            return Ok(());
        }
        Err(HostError::not_ready(if self.last_error.is_empty() {
            "unhealthy"
        } else {
            self.last_error.as_str()
        }))
    }
}

pub async fn check_health(store: &StateStore) -> HealthInfo {
    let state = match store.load() {
        Ok(Some(state)) => state,
        Ok(None) => return HealthInfo::default(),
        Err(err) => {
            warn!(error = %err, "could not read host state");
            return HealthInfo::default();
        }
    };

    let alive = process_alive(state.pid);
    let root = state_root(&state);
    let contract = ContractDetails::read(root.as_deref());
    let env_token = std::env::var(AUTH_TOKEN_ENV).ok();
    let token = resolve_probe_token(env_token.as_deref(), root.as_deref());
    let auth_diagnostic = auth_diagnostic(&contract.auth_source, token.is_some()).unwrap_or_default();

    let mut reachable = false;
    let mut mcp_ready = false;
    let mut last_error = String::new();
    if state.mcp_url.is_empty() {
        last_error = ENDPOINT_NOT_IN_STATE.to_string();
    } else if endpoint_reachable(&state.mcp_url).await {
        reachable = true;
        match probe_mcp_ready(&state.mcp_url, token).await {
            Ok(()) => mcp_ready = true,
            Err(err) => last_error = err,
        }
    } else {
        last_error = ENDPOINT_NOT_REACHABLE.to_string();
    }
    if !alive && last_error.is_empty() {
        last_error = PROCESS_NOT_ALIVE.to_string();
    }

    HealthInfo {
        found: true,
        pid: state.pid,
        alive,
        ready: alive && reachable && mcp_ready,
        mcp_url: state.mcp_url,
        reachable,
        mcp_ready,
        protocol_header: contract.protocol_header,
        session_header_name: contract.session_header_name,
        auth_source_type: contract.auth_source,
        auth_diagnostic,
        last_error,
    }
}

/// Reachability plus handshake against `endpoint`, using the env token if any.
pub async fn probe_remote(endpoint: &str) -> Result<RemoteStatus, HostError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(HostError::not_ready("remote endpoint is empty"));
    }
    let mut status = RemoteStatus {
        endpoint: endpoint.to_string(),
        ..Default::default()
    };
    status.reachable = endpoint_reachable(endpoint).await;
    if !status.reachable {
        status.last_error = ENDPOINT_NOT_REACHABLE.to_string();
        return Ok(status);
    }
    let token = std::env::var(AUTH_TOKEN_ENV)
        .ok()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());
    match probe_mcp_ready(endpoint, token).await {
        Ok(()) => status.mcp_ready = true,
        Err(err) => status.last_error = err,
    }
    Ok(status)
}

/// TCP connect to the endpoint's host and port within two seconds.
pub async fn endpoint_reachable(raw: &str) -> bool {
    let Some(address) = socket_address(raw) else {
        return false;
    };
    matches!(
        timeout(REACHABILITY_TIMEOUT, TcpStream::connect(address.as_str())).await,
        Ok(Ok(_))
    )
}

fn socket_address(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let url = match Url::parse(raw) {
        Ok(url) if url.has_host() => url,
        _ => Url::parse(&format!("http://{raw}")).ok()?,
    };
    let host = url.host_str().filter(|host| !host.is_empty())?;
    let port = url.port_or_known_default().unwrap_or(80);
    Some(format!("{host}:{port}"))
}

/// Handshake then `tools/list` under one deadline. Errors name the failing step.
pub async fn probe_mcp_ready(endpoint: &str, token: Option<String>) -> Result<(), String> {
    let options = McpClientOptions {
        auth_token: token,
        request_timeout: PROBE_REQUEST_TIMEOUT,
        verbose: false,
    };
    let client = McpClient::with_options(endpoint, TransportKind::StreamableHttp, options)
        .map_err(|err| format!("initialize failed: {err}"))?;
    let ctx = CallContext::with_timeout(PROBE_DEADLINE);

    client
        .initialize(&ctx)
        .await
        .map_err(|err| format!("initialize failed: {err}"))?;
    let tools = client
        .list_tools(&ctx)
        .await
        .map_err(|err| format!("tools/list failed: {err}"))?;
    debug!(
        endpoint = %sanitize_endpoint(endpoint),
        tools = tools.len(),
        "backend answered readiness probe"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_address_defaults_ports() {
        assert_eq!(socket_address("http://example.com/mcp").as_deref(), Some("example.com:80"));
        assert_eq!(socket_address("https://example.com/mcp").as_deref(), Some("example.com:443"));
        assert_eq!(socket_address("127.0.0.1:9000").as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(socket_address("http://[::1]:9000/mcp").as_deref(), Some("[::1]:9000"));
    }

    #[test]
    fn summary_without_endpoint_stops_early() {
        let info = HealthInfo {
            found: true,
            pid: 7,
            alive: true,
            last_error: ENDPOINT_NOT_IN_STATE.into(),
            ..Default::default()
        };
        assert_eq!(
            info.summary_lines(),
            vec!["pid=7 alive=true", "endpoint=unknown reachable=false mcp_ready=false"]
        );
        assert_eq!(info.ensure_ready().unwrap_err().to_string(), "server not ready: endpoint unknown");
    }

    #[test]
    fn summary_uses_unknown_fallbacks() {
        let info = HealthInfo {
            found: true,
            pid: 7,
            mcp_url: "http://user:pw@127.0.0.1:9000/mcp?token=x".into(),
            last_error: ENDPOINT_NOT_REACHABLE.into(),
            ..Default::default()
        };
        let lines = info.summary_lines();
        assert!(lines.contains(&"endpoint=http://127.0.0.1:9000/mcp reachable=false mcp_ready=false".to_string()));
        assert!(lines.contains(&"protocol=unknown session_header=unknown".to_string()));
        assert!(lines.contains(&"auth_source=unknown".to_string()));
        assert!(lines.contains(&"detail=endpoint not reachable".to_string()));
    }

    #[test]
    fn not_found_is_not_ready() {
        let err = HealthInfo::default().ensure_ready().unwrap_err();
        assert_eq!(err.to_string(), "server not ready: no managed process");
    }

    #[test]
    fn auth_diagnostic_is_the_fallback_detail() {
        let info = HealthInfo {
            found: true,
            mcp_url: "http://127.0.0.1:1/mcp".into(),
            auth_diagnostic: "missing required auth token for contract type: secret".into(),
            ..Default::default()
        };
        assert_eq!(
            info.ensure_ready().unwrap_err().to_string(),
            "server not ready: missing required auth token for contract type: secret"
        );
    }

    #[tokio::test]
    async fn remote_status_rejects_empty_endpoint() {
        let err = probe_remote("   ").await.unwrap_err();
        assert_eq!(err.to_string(), "server not ready: remote endpoint is empty");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("addr");
        drop(listener);
        assert!(!endpoint_reachable(&format!("http://{address}/mcp")).await);
    }
}
