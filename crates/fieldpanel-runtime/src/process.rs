use std::process::Output;
use std::time::Duration;

use fieldpanel_core::{FieldPanelError, Result};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Run a command to completion, killing it if it outlives `timeout`.
///
/// Spawn failures surface as `FieldPanelError::Io` so callers can tell a
/// missing binary (`ErrorKind::NotFound`) from a failed run.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(FieldPanelError::Timeout(format!(
            "command timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Ask a child to exit with SIGTERM, escalating to SIGKILL after `grace`.
pub async fn terminate_child(child: &mut Child, grace: Duration) -> Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    if let Some(pid) = child.id() {
        send_sigterm(pid);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            debug!("Child exited after SIGTERM: {:?}", status?);
        }
        Err(_) => {
            warn!(
                "Child {:?} did not terminate within {:?}, killing",
                child.id(),
                grace
            );
            child.kill().await?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    info!("Sending SIGTERM to process {}", pid);
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to {}: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32) {
    // No graceful signal here; the grace timeout falls through to kill().
    debug!("SIGTERM unsupported, waiting on process {}", pid);
}
