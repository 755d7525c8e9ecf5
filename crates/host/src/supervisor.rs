//! Lifecycle of the managed backend: start, persist, probe and stop.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use beacon_util::sanitize_endpoint;
use chrono::{SecondsFormat, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{BackendCommand, UpOptions};
use crate::endpoint::{
    CaptureOutcome, EndpointCapture, compute_mcp_url, effective_listen, resolve_root_dir, spawn_endpoint_capture,
};
use crate::errors::HostError;
use crate::health::{HealthInfo, RemoteStatus, check_health, probe_remote};
use crate::logs::log_path;
use crate::process::{process_alive, terminate_process};
use crate::state::{ManagedProcessState, StateStore};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What `down` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownOutcome {
    NothingManaged,
    AlreadyStopped { pid: i32 },
    Stopped { pid: i32 },
}

/// A backend left running after `up_detached` returns.
#[derive(Debug)]
pub struct DetachedBackend {
    pub pid: i32,
    /// Known up front only when the listen address names a concrete port.
    pub mcp_url: Option<String>,
    pub log_path: PathBuf,
    /// Pending endpoint discovery, if the URL was not known at launch.
    pub capture: Option<JoinHandle<CaptureOutcome>>,
}

struct Launch {
    command: BackendCommand,
    args: Vec<String>,
    derived_url: Option<String>,
    root_dir: Option<PathBuf>,
}

impl Launch {
    fn display(&self) -> String {
        self.command.program.display().to_string()
    }

    fn record(&self, pid: i32) -> ManagedProcessState {
        ManagedProcessState {
            pid,
            started_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            command: self.command.argv(&self.args),
            workdir: self
                .command
                .workdir
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            root_dir: self
                .root_dir
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            mcp_url: self.derived_url.clone().unwrap_or_default(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.command.program);
        command
            .args(&self.command.base_args)
            .args(&self.args)
            .stdin(Stdio::null());
        if let Some(dir) = &self.command.workdir {
            command.current_dir(dir);
        }
        command
    }

    fn capture(&self, pid: i32) -> Option<EndpointCapture> {
        if self.derived_url.is_some() {
            return None;
        }
        self.root_dir.as_ref().map(|root| EndpointCapture::new(pid, root))
    }
}

/// Starts and stops the backend and answers health questions about it.
#[derive(Debug, Clone)]
pub struct Supervisor {
    store: StateStore,
    command: Option<BackendCommand>,
    log_path: PathBuf,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(StateStore::default())
    }
}

impl Supervisor {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            command: None,
            log_path: log_path(),
        }
    }

    /// Use a fixed backend command instead of resolving one at launch.
    pub fn with_command(mut self, command: BackendCommand) -> Self {
        self.command = Some(command);
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = path.into();
        self
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Runs the backend in the foreground until it exits or a shutdown is requested.
    ///
    /// Ctrl-C, SIGTERM and `cancel` all trigger the same escalating shutdown.
    pub async fn up(&self, options: &UpOptions, cancel: CancellationToken) -> Result<(), HostError> {
        let launch = self.prepare(options)?;
        let mut command = launch.command();
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| HostError::Spawn {
            command: launch.display(),
            source,
        })?;
        let pid = child_pid(&child);
        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, "stderr");
        }

        let state = launch.record(pid);
        if let Err(err) = self.store.save(&state) {
            return Err(HostError::join(err, stop_child(&mut child).await.err()));
        }

        let capture_cancel = cancel.child_token();
        if let Some(capture) = launch.capture(pid) {
            spawn_endpoint_capture(self.store.clone(), capture, capture_cancel.clone());
        }
        info!(pid, "started {} (press Ctrl+C to stop)", launch.display());

        tokio::select! {
            status = child.wait() => {
                capture_cancel.cancel();
                self.clear_state();
                let status = status?;
                if !status.success() {
                    return Err(HostError::Exited { status });
                }
                info!(pid, "backend stopped");
                Ok(())
            }
            _ = shutdown_requested(&cancel) => {
                capture_cancel.cancel();
                info!(pid, "shutting down backend");
                // Reap while signalling so the pid disappears once the child exits.
                let (terminated, waited) = tokio::join!(
                    terminate_process(pid),
                    timeout(SHUTDOWN_GRACE, child.wait()),
                );
                if !matches!(waited, Ok(Ok(_)))
                    && let Err(err) = stop_child(&mut child).await
                {
                    warn!(pid, error = %err, "failed to force-kill backend");
                }
                self.clear_state();
                terminated?;
                info!(pid, "backend stopped");
                Ok(())
            }
        }
    }

    /// Starts the backend in the background with output appended to the log file.
    pub async fn up_detached(&self, options: &UpOptions) -> Result<DetachedBackend, HostError> {
        let launch = self.prepare(options)?;
        let log = open_log(&self.log_path)?;
        let stdout = log.try_clone().map_err(|source| self.log_error(source))?;
        let stderr = log.try_clone().map_err(|source| self.log_error(source))?;

        let mut command = launch.command();
        command.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn().map_err(|source| HostError::Spawn {
            command: launch.display(),
            source,
        })?;
        let pid = child_pid(&child);

        let state = launch.record(pid);
        if let Err(err) = self.store.save(&state) {
            return Err(HostError::join(err, stop_child(&mut child).await.err()));
        }

        tokio::spawn(async move {
            let status = child.wait().await;
            drop(log);
            debug!(pid, ?status, "detached backend exited");
        });

        let capture = launch
            .capture(pid)
            .map(|capture| spawn_endpoint_capture(self.store.clone(), capture, CancellationToken::new()));
        info!(
            pid,
            endpoint = %sanitize_endpoint(&state.mcp_url),
            log = %self.log_path.display(),
            "started backend in background"
        );
        Ok(DetachedBackend {
            pid,
            mcp_url: launch.derived_url,
            log_path: self.log_path.clone(),
            capture,
        })
    }

    pub async fn down(&self) -> Result<DownOutcome, HostError> {
        let Some(state) = self.store.load()? else {
            return Ok(DownOutcome::NothingManaged);
        };
        if !process_alive(state.pid) {
            self.store.clear()?;
            return Ok(DownOutcome::AlreadyStopped { pid: state.pid });
        }
        terminate_process(state.pid).await?;
        self.store.clear()?;
        info!(pid = state.pid, "stopped backend");
        Ok(DownOutcome::Stopped { pid: state.pid })
    }

    pub async fn check_health(&self) -> HealthInfo {
        check_health(&self.store).await
    }

    /// Health of the managed backend, failing unless it is ready.
    pub async fn status(&self) -> Result<HealthInfo, HostError> {
        let health = self.check_health().await;
        health.ensure_ready()?;
        Ok(health)
    }

    /// Readiness of an endpoint this supervisor does not manage.
    pub async fn status_remote(&self, endpoint: &str) -> Result<RemoteStatus, HostError> {
        let status = probe_remote(endpoint).await?;
        status.ensure_ready()?;
        Ok(status)
    }

    fn prepare(&self, options: &UpOptions) -> Result<Launch, HostError> {
        let command = match &self.command {
            Some(command) => command.clone(),
            None => BackendCommand::resolve()?,
        };
        let derived_url = effective_listen(options.listen.as_deref(), options.port)
            .and_then(|listen| compute_mcp_url(&listen, options.mcp_path.as_deref().unwrap_or_default()));
        let root_dir = resolve_root_dir(options.dir.as_deref(), command.workdir.as_deref());
        Ok(Launch {
            command,
            args: options.up_args(),
            derived_url,
            root_dir,
        })
    }

    fn clear_state(&self) {
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to clear host state");
        }
    }

    fn log_error(&self, source: std::io::Error) -> HostError {
        HostError::LogFile {
            path: self.log_path.clone(),
            source,
        }
    }
}

fn child_pid(child: &Child) -> i32 {
    child.id().and_then(|id| i32::try_from(id).ok()).unwrap_or_default()
}

fn open_log(path: &Path) -> Result<std::fs::File, HostError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|source| HostError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

async fn stop_child(child: &mut Child) -> Result<(), HostError> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }
    child.start_kill()?;
    child.wait().await?;
    Ok(())
}

fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(target: "beacon::server", stream, "{line}");
        }
    });
}

async fn shutdown_requested(cancel: &CancellationToken) {
    #[cfg(unix)]
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(signal) => Some(signal),
        Err(err) => {
            warn!(error = %err, "failed to register SIGTERM handler");
            None
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match sigterm.as_mut() {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => debug!("received interrupt"),
        _ = terminate => debug!("received SIGTERM"),
        _ = cancel.cancelled() => debug!("shutdown requested"),
    }
}
