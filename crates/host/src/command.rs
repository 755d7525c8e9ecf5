//! Backend command resolution and `up` argument assembly.

use std::env;
use std::path::PathBuf;

use beacon_mcp::protocol::DEFAULT_BACKEND_BINARY;

use crate::errors::HostError;

pub const SERVER_COMMAND_ENV: &str = "BEACON_SERVER_COMMAND";

/// Program, leading arguments and working directory used to launch the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub base_args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

impl BackendCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            workdir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// `BEACON_SERVER_COMMAND` (whitespace split) wins; otherwise the backend binary on `PATH`.
    pub fn resolve() -> Result<Self, HostError> {
        if let Ok(raw) = env::var(SERVER_COMMAND_ENV)
            && !raw.trim().is_empty()
        {
            return Self::parse(&raw);
        }
        which::which(DEFAULT_BACKEND_BINARY)
            .map(Self::new)
            .map_err(|_| HostError::BackendNotFound {
                binary: DEFAULT_BACKEND_BINARY.to_string(),
            })
    }

    pub fn parse(raw: &str) -> Result<Self, HostError> {
        let mut parts = raw.split_whitespace();
        let program = parts.next().ok_or(HostError::EmptyCommand)?;
        Ok(Self::new(program).with_args(parts))
    }

    /// Full argv as recorded in the state file.
    pub fn argv(&self, args: &[String]) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + self.base_args.len() + args.len());
        argv.push(self.program.display().to_string());
        argv.extend(self.base_args.iter().cloned());
        argv.extend(args.iter().cloned());
        argv
    }
}

/// Options accepted by `up` and `up_detached`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpOptions {
    /// Directory the backend indexes.
    pub dir: Option<PathBuf>,
    pub listen: Option<String>,
    /// Shorthand for `--listen 127.0.0.1:<port>` when `listen` is unset.
    pub port: Option<u16>,
    pub mcp_path: Option<String>,
    pub json: bool,
}

impl UpOptions {
    /// The backend's `up` subcommand and its flags.
    pub fn up_args(&self) -> Vec<String> {
        let mut args = vec!["up".to_string()];
        if let Some(dir) = &self.dir {
            args.push("--dir".into());
            args.push(dir.display().to_string());
        }
        if let Some(listen) = crate::endpoint::effective_listen(self.listen.as_deref(), self.port) {
            args.push("--listen".into());
            args.push(listen);
        }
        if let Some(path) = self.mcp_path.as_deref().map(str::trim).filter(|path| !path.is_empty()) {
            args.push("--mcp-path".into());
            args.push(path.to_string());
        }
        if self.json {
            args.push("--json".into());
        }
        args
    }
}
