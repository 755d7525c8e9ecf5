//! Liveness checks and escalating termination for processes identified by pid.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::errors::HostError;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);
#[cfg(unix)]
const INTERRUPT_GRACE: Duration = Duration::from_secs(4);
#[cfg(unix)]
const KILL_GRACE: Duration = Duration::from_secs(2);
#[cfg(windows)]
const WINDOWS_KILL_GRACE: Duration = Duration::from_secs(3);

/// True when a process with `pid` exists. A process owned by another user counts as alive.
#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(windows)]
pub fn process_alive(pid: i32) -> bool {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    if pid <= 0 {
        return false;
    }
    let target = Pid::from_u32(pid as u32);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    system.process(target).is_some()
}

/// Polls until `pid` is gone or `timeout` elapses. Returns whether it exited.
pub async fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
    !process_alive(pid)
}

/// Interrupt, then kill, then give up.
///
/// A process that is already gone is a success; non-positive pids are ignored.
#[cfg(unix)]
pub async fn terminate_process(pid: i32) -> Result<(), HostError> {
    if pid <= 0 {
        return Ok(());
    }
    debug!(pid, "sending SIGINT");
    if !send_signal(pid, libc::SIGINT)? {
        return Ok(());
    }
    if wait_for_exit(pid, INTERRUPT_GRACE).await {
        return Ok(());
    }

    debug!(pid, "escalating to SIGKILL");
    if !send_signal(pid, libc::SIGKILL)? {
        return Ok(());
    }
    if wait_for_exit(pid, KILL_GRACE).await {
        return Ok(());
    }
    Err(HostError::TerminateTimeout { pid })
}

/// Returns `Ok(false)` when the process no longer exists.
#[cfg(unix)]
fn send_signal(pid: i32, signal: libc::c_int) -> Result<bool, HostError> {
    // SAFETY: plain kill(2) on a caller-supplied positive pid.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        return Ok(true);
    }
    let source = std::io::Error::last_os_error();
    if source.raw_os_error() == Some(libc::ESRCH) {
        return Ok(false);
    }
    Err(HostError::Signal { pid, source })
}

#[cfg(windows)]
pub async fn terminate_process(pid: i32) -> Result<(), HostError> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    if pid <= 0 {
        return Ok(());
    }
    let target = Pid::from_u32(pid as u32);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
    let Some(process) = system.process(target) else {
        return Ok(());
    };
    debug!(pid, "killing process");
    if !process.kill() && process_alive(pid) {
        return Err(HostError::Signal {
            pid,
            source: std::io::Error::other("kill request rejected"),
        });
    }
    if wait_for_exit(pid, WINDOWS_KILL_GRACE).await {
        return Ok(());
    }
    Err(HostError::TerminateTimeout { pid })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_pids_are_never_alive() {
        assert!(!process_alive(0));
        assert!(!process_alive(-5));
    }

    #[test]
    fn current_process_is_alive() {
        assert!(process_alive(std::process::id() as i32));
    }

    #[tokio::test]
    async fn terminate_ignores_non_positive_pid() {
        terminate_process(0).await.expect("no-op");
        terminate_process(-1).await.expect("no-op");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_a_running_child() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("pid") as i32;
        // Reap in the background so the pid disappears once the signal lands.
        let reaper = tokio::spawn(async move { child.wait().await });

        terminate_process(pid).await.expect("terminate");
        assert!(!process_alive(pid));
        let status = reaper.await.expect("join").expect("wait");
        assert!(!status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_of_exited_process_is_silent() {
        let mut child = tokio::process::Command::new("true").spawn().expect("spawn true");
        let pid = child.id().expect("pid") as i32;
        child.wait().await.expect("wait");
        terminate_process(pid).await.expect("already gone");
    }
}
