//! Persisted identity of the managed backend process.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use beacon_mcp::config::state_dir;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::HostError;

const STATE_FILE_NAME: &str = "host_state.json";

/// What `up` records about the process it started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedProcessState {
    pub pid: i32,
    /// RFC 3339 start time.
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub workdir: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub root_dir: String,
    /// Empty until the endpoint is known.
    #[serde(default)]
    pub mcp_url: String,
}

/// JSON state file under the state directory.
///
/// Reads and writes replace the whole file; concurrent writers race and the last one wins.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(state_dir())
    }
}

impl StateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, state: &ManagedProcessState) -> Result<(), HostError> {
        if let Some(parent) = self.path.parent() {
            create_private_dir(parent).map_err(|source| self.io_error(source))?;
        }
        let content = serde_json::to_vec_pretty(state).map_err(|source| HostError::StateFormat {
            path: self.path.clone(),
            source,
        })?;

        let staging = self.path.with_extension("json.tmp");
        write_private_file(&staging, &content).map_err(|source| self.io_error(source))?;
        fs::rename(&staging, &self.path).map_err(|source| self.io_error(source))?;
        debug!(path = %self.path.display(), pid = state.pid, "saved host state");
        Ok(())
    }

    /// `Ok(None)` when nothing is managed.
    pub fn load(&self) -> Result<Option<ManagedProcessState>, HostError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| HostError::StateFormat {
                path: self.path.clone(),
                source,
            })
    }

    pub fn clear(&self) -> Result<(), HostError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Records a discovered endpoint if `pid` is still the managed process.
    /// Returns whether the state file changed.
    pub fn update_endpoint(&self, pid: i32, endpoint: &str) -> Result<bool, HostError> {
        let Some(mut state) = self.load()? else {
            return Ok(false);
        };
        if state.pid != pid {
            return Ok(false);
        }
        state.mcp_url = endpoint.to_string();
        self.save(&state)?;
        Ok(true)
    }

    fn io_error(&self, source: std::io::Error) -> HostError {
        HostError::State {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

pub(crate) fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(pid: i32) -> ManagedProcessState {
        ManagedProcessState {
            pid,
            started_at: "2026-01-02T03:04:05Z".into(),
            command: vec!["dir2mcp".into(), "up".into()],
            workdir: "/srv/data".into(),
            root_dir: String::new(),
            mcp_url: String::new(),
        }
    }

    #[test]
    fn load_missing_file_returns_none() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path());
        assert!(store.load().expect("load").is_none());
        store.clear().expect("clearing a missing file is fine");
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("nested"));
        let state = sample(4242);
        store.save(&state).expect("save");

        assert_eq!(store.load().expect("load"), Some(state));

        let raw = fs::read_to_string(store.path()).expect("read");
        assert!(raw.contains("\"workdir\""));
        assert!(!raw.contains("root_dir"), "empty root_dir is omitted: {raw}");
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path());
        store.save(&sample(1)).expect("save");
        let mode = fs::metadata(store.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn update_endpoint_requires_matching_pid() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path());
        store.save(&sample(10)).expect("save");

        assert!(!store.update_endpoint(11, "http://127.0.0.1:9000/mcp").expect("update"));
        assert_eq!(store.load().expect("load").expect("state").mcp_url, "");

        assert!(store.update_endpoint(10, "http://127.0.0.1:9000/mcp").expect("update"));
        assert_eq!(
            store.load().expect("load").expect("state").mcp_url,
            "http://127.0.0.1:9000/mcp"
        );
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path());
        fs::write(store.path(), "{not json").expect("write");
        assert!(matches!(store.load(), Err(HostError::StateFormat { .. })));
    }
}
