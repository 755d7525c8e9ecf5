//! Endpoint derivation for the managed backend and late-bound endpoint capture.

use std::path::{Path, PathBuf};
use std::time::Duration;

use beacon_mcp::config::DEFAULT_HOST_MCP_PATH;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::contract::ConnectionDescriptor;
use crate::process::process_alive;
use crate::state::StateStore;

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Local URL implied by a listen address, or `None` when the port is ephemeral or unknown.
pub fn compute_mcp_url(listen: &str, mcp_path: &str) -> Option<String> {
    let (host, port) = split_host_port(listen.trim())?;
    let port: u16 = port.parse().ok()?;
    if port == 0 {
        return None;
    }
    let host = match host.trim() {
        "" | "0.0.0.0" | "::" => "127.0.0.1",
        host => host,
    };
    let path = normalize_mcp_path(mcp_path);
    if host.contains(':') {
        Some(format!("http://[{host}]:{port}{path}"))
    } else {
        Some(format!("http://{host}:{port}{path}"))
    }
}

fn split_host_port(listen: &str) -> Option<(&str, &str)> {
    if let Some(rest) = listen.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return Some((host, tail.strip_prefix(':')?));
    }
    let (host, port) = listen.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

pub fn effective_listen(listen: Option<&str>, port: Option<u16>) -> Option<String> {
    if let Some(listen) = listen.map(str::trim).filter(|listen| !listen.is_empty()) {
        return Some(listen.to_string());
    }
    port.filter(|port| *port > 0).map(|port| format!("127.0.0.1:{port}"))
}

pub fn normalize_mcp_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return DEFAULT_HOST_MCP_PATH.to_string();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Absolute form of the `--dir` flag, else of the backend's working directory, else the cwd.
pub fn resolve_root_dir(dir: Option<&Path>, workdir: Option<&Path>) -> Option<PathBuf> {
    let chosen = dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .or(workdir.filter(|dir| !dir.as_os_str().is_empty()));
    match chosen {
        Some(path) => Some(std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())),
        None => std::env::current_dir().ok(),
    }
}

#[derive(Debug, Clone)]
pub struct EndpointCapture {
    pub pid: i32,
    pub root_dir: PathBuf,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl EndpointCapture {
    pub fn new(pid: i32, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            pid,
            root_dir: root_dir.into(),
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            poll_interval: DEFAULT_CAPTURE_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(String),
    TimedOut,
    ProcessExited,
    Cancelled,
    Skipped,
}

/// Polls the connection descriptor until it names an endpoint, then records it.
///
/// The state file is only touched when the stored pid still matches.
pub fn spawn_endpoint_capture(
    store: StateStore,
    capture: EndpointCapture,
    cancel: CancellationToken,
) -> JoinHandle<CaptureOutcome> {
    tokio::spawn(async move { run_capture(&store, &capture, &cancel).await })
}

async fn run_capture(store: &StateStore, capture: &EndpointCapture, cancel: &CancellationToken) -> CaptureOutcome {
    if capture.pid <= 0 || capture.root_dir.as_os_str().is_empty() {
        return CaptureOutcome::Skipped;
    }
    let timeout = if capture.timeout.is_zero() { DEFAULT_CAPTURE_TIMEOUT } else { capture.timeout };
    let poll = if capture.poll_interval.is_zero() {
        DEFAULT_CAPTURE_POLL_INTERVAL
    } else {
        capture.poll_interval
    };

    let deadline = Instant::now() + timeout;
    let mut ticker = interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return CaptureOutcome::Cancelled,
            _ = ticker.tick() => {}
        }
        if Instant::now() > deadline {
            debug!(pid = capture.pid, "endpoint capture timed out");
            return CaptureOutcome::TimedOut;
        }
        if !process_alive(capture.pid) {
            return CaptureOutcome::ProcessExited;
        }
        let Some(endpoint) = ConnectionDescriptor::load(&capture.root_dir).and_then(|d| d.endpoint_url()) else {
            continue;
        };
        match store.update_endpoint(capture.pid, &endpoint) {
            Ok(true) => info!(endpoint = %beacon_util::sanitize_endpoint(&endpoint), "captured backend endpoint"),
            Ok(false) => debug!(pid = capture.pid, "managed process changed; endpoint not recorded"),
            Err(err) => warn!(error = %err, "failed to record captured endpoint"),
        }
        return CaptureOutcome::Captured(endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{CONNECTION_FILE, DESCRIPTOR_DIR};
    use crate::state::ManagedProcessState;
    use tempfile::tempdir;

    #[test]
    fn wildcard_listen_maps_to_loopback() {
        assert_eq!(
            compute_mcp_url("0.0.0.0:8087", "mcp").as_deref(),
            Some("http://127.0.0.1:8087/mcp")
        );
        assert_eq!(compute_mcp_url(":9000", "").as_deref(), Some("http://127.0.0.1:9000/mcp"));
        assert_eq!(compute_mcp_url("[::]:9000", "/rpc").as_deref(), Some("http://127.0.0.1:9000/rpc"));
        assert_eq!(compute_mcp_url("[::1]:9000", "/rpc").as_deref(), Some("http://[::1]:9000/rpc"));
    }

    #[test]
    fn ephemeral_or_invalid_listen_is_non_deterministic() {
        assert_eq!(compute_mcp_url("127.0.0.1:0", "/mcp"), None);
        assert_eq!(compute_mcp_url("", "/mcp"), None);
        assert_eq!(compute_mcp_url("localhost", "/mcp"), None);
        assert_eq!(compute_mcp_url("localhost:http", "/mcp"), None);
        assert_eq!(compute_mcp_url("localhost:70000", "/mcp"), None);
    }

    #[test]
    fn effective_listen_prefers_explicit_value() {
        assert_eq!(effective_listen(Some(" 0.0.0.0:1 "), Some(2)).as_deref(), Some("0.0.0.0:1"));
        assert_eq!(effective_listen(None, Some(8087)).as_deref(), Some("127.0.0.1:8087"));
        assert_eq!(effective_listen(Some(""), Some(0)), None);
    }

    #[test]
    fn root_dir_is_absolute() {
        let root = resolve_root_dir(Some(Path::new("data")), Some(Path::new("/ignored"))).expect("root");
        assert!(root.is_absolute());
        assert!(root.ends_with("data"));
        assert_eq!(
            resolve_root_dir(None, Some(Path::new("/srv/work"))),
            Some(PathBuf::from("/srv/work"))
        );
    }

    #[tokio::test]
    async fn capture_records_descriptor_endpoint() {
        let state_dir = tempdir().expect("tempdir");
        let root = tempdir().expect("tempdir");
        let store = StateStore::new(state_dir.path());
        let pid = std::process::id() as i32;
        store
            .save(&ManagedProcessState {
                pid,
                ..Default::default()
            })
            .expect("save");

        let descriptor_dir = root.path().join(DESCRIPTOR_DIR);
        std::fs::create_dir_all(&descriptor_dir).expect("mkdir");
        std::fs::write(
            descriptor_dir.join(CONNECTION_FILE),
            r#"{"url": "http://127.0.0.1:43111/mcp"}"#,
        )
        .expect("write");

        let mut capture = EndpointCapture::new(pid, root.path());
        capture.poll_interval = Duration::from_millis(20);
        let outcome = spawn_endpoint_capture(store.clone(), capture, CancellationToken::new())
            .await
            .expect("join");

        assert_eq!(outcome, CaptureOutcome::Captured("http://127.0.0.1:43111/mcp".into()));
        assert_eq!(store.load().expect("load").expect("state").mcp_url, "http://127.0.0.1:43111/mcp");
    }

    #[tokio::test]
    async fn capture_times_out_without_touching_state() {
        let state_dir = tempdir().expect("tempdir");
        let root = tempdir().expect("tempdir");
        let store = StateStore::new(state_dir.path());
        let pid = std::process::id() as i32;
        store
            .save(&ManagedProcessState {
                pid,
                ..Default::default()
            })
            .expect("save");

        let capture = EndpointCapture {
            pid,
            root_dir: root.path().to_path_buf(),
            timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(20),
        };
        let outcome = spawn_endpoint_capture(store.clone(), capture, CancellationToken::new())
            .await
            .expect("join");

        assert_eq!(outcome, CaptureOutcome::TimedOut);
        assert_eq!(store.load().expect("load").expect("state").mcp_url, "");
    }

    #[tokio::test]
    async fn capture_stops_on_cancel() {
        let state_dir = tempdir().expect("tempdir");
        let root = tempdir().expect("tempdir");
        let cancel = CancellationToken::new();
        let handle = spawn_endpoint_capture(
            StateStore::new(state_dir.path()),
            EndpointCapture::new(std::process::id() as i32, root.path()),
            cancel.clone(),
        );
        cancel.cancel();
        assert_eq!(handle.await.expect("join"), CaptureOutcome::Cancelled);
    }

    #[tokio::test]
    async fn capture_skips_unknown_root() {
        let state_dir = tempdir().expect("tempdir");
        let outcome = spawn_endpoint_capture(
            StateStore::new(state_dir.path()),
            EndpointCapture::new(1, PathBuf::new()),
            CancellationToken::new(),
        )
        .await
        .expect("join");
        assert_eq!(outcome, CaptureOutcome::Skipped);
    }
}
