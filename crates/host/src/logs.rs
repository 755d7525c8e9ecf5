//! Detached backend log file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::HostError;

pub const LOG_FILE_NAME: &str = "beacon-mcp-server.log";

pub fn log_path() -> PathBuf {
    std::env::temp_dir().join(LOG_FILE_NAME)
}

/// Last `max_lines` lines of `raw`; zero keeps everything.
pub fn tail_log_lines(raw: &str, max_lines: usize) -> String {
    let trimmed = raw.trim_end_matches('\n');
    if trimmed.is_empty() {
        return String::new();
    }
    let lines: Vec<&str> = trimmed.split('\n').collect();
    let start = if max_lines > 0 { lines.len().saturating_sub(max_lines) } else { 0 };
    lines[start..].join("\n")
}

/// Tail of the log at `path`; a missing file reads as empty.
pub fn read_log_tail(path: &Path, max_lines: usize) -> Result<String, HostError> {
    match fs::read(path) {
        Ok(bytes) => Ok(tail_log_lines(&String::from_utf8_lossy(&bytes), max_lines)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(source) => Err(HostError::LogFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}
