//! Error types for the host supervisor.

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("could not locate {binary} binary (set BEACON_SERVER_COMMAND to override)")]
    BackendNotFound { binary: String },

    #[error("backend command is empty")]
    EmptyCommand,

    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("state file {}: {source}", path.display())]
    State {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid state file {}: {source}", path.display())]
    StateFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("backend exited: {status}")]
    Exited { status: ExitStatus },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("process {pid} did not terminate within timeout")]
    TerminateTimeout { pid: i32 },

    #[error("server not ready: {detail}")]
    NotReady { detail: String },

    #[error("{}", join_messages(.0))]
    Joined(Vec<HostError>),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl HostError {
    pub fn not_ready(detail: impl Into<String>) -> Self {
        Self::NotReady { detail: detail.into() }
    }

    /// Combines a primary failure with any cleanup failures; with none it stays unwrapped.
    pub fn join(primary: HostError, cleanup: impl IntoIterator<Item = HostError>) -> Self {
        let mut errors = vec![primary];
        errors.extend(cleanup);
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Self::Joined(errors)
        }
    }
}

fn join_messages(errors: &[HostError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_message_carries_detail() {
        let err = HostError::not_ready("endpoint not reachable");
        assert_eq!(err.to_string(), "server not ready: endpoint not reachable");
    }

    #[test]
    fn join_without_cleanup_failure_keeps_primary() {
        let joined = HostError::join(HostError::EmptyCommand, None);
        assert!(matches!(joined, HostError::EmptyCommand));
    }

    #[test]
    fn join_renders_every_message() {
        let joined = HostError::join(
            HostError::EmptyCommand,
            Some(HostError::TerminateTimeout { pid: 42 }),
        );
        assert!(matches!(joined, HostError::Joined(ref errors) if errors.len() == 2));
        assert_eq!(
            joined.to_string(),
            "backend command is empty; process 42 did not terminate within timeout"
        );
    }
}
