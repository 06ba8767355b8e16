//! Remote access to the host's own desktop: `x11vnc` exporting the X display
//! and `websockify` serving noVNC in front of it.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use fieldpanel_core::{DesktopConfig, FieldPanelError, Result};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::process::run_with_timeout;

const START_SCRIPT: &str = "start-remote-desktop.sh";
const STOP_SCRIPT: &str = "stop-remote-desktop.sh";
const SETUP_HINT: &str = "Run: ./scripts/setup-remote-desktop.sh";

/// Read access to the host process table.
pub trait ProcessTable: Send + Sync {
    /// Pids whose full command line matches `pattern`.
    fn find(&self, pattern: &Regex) -> Vec<u32>;

    /// Send SIGTERM; false if the process was already gone.
    fn terminate(&self, pid: u32) -> bool;
}

/// [`ProcessTable`] backed by `sysinfo`.
pub struct SysinfoProcessTable {
    system: Mutex<System>,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn find(&self, pattern: &Regex) -> Vec<u32> {
        let own_pid = sysinfo::get_current_pid().ok();
        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        let mut pids: Vec<u32> = system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != own_pid)
            .filter(|(_, process)| {
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                pattern.is_match(&cmdline)
            })
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }

    fn terminate(&self, pid: u32) -> bool {
        let system = self.system.lock();
        system
            .process(sysinfo::Pid::from_u32(pid))
            .and_then(|process| process.kill_with(Signal::Term))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DesktopStatus {
    pub x11vnc_running: bool,
    pub novnc_running: bool,
    pub running: bool,
    pub vnc_port: Option<u16>,
    pub novnc_port: Option<u16>,
    pub novnc_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DesktopOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vnc_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub novnc_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub novnc_url: Option<String>,
}

pub struct DesktopController {
    config: DesktopConfig,
    processes: Arc<dyn ProcessTable>,
    x11vnc_bin: String,
    websockify_bin: String,
    x11vnc_pattern: Regex,
    novnc_pattern: Regex,
}

impl DesktopController {
    pub fn new(config: DesktopConfig, processes: Arc<dyn ProcessTable>) -> Result<Self> {
        let x11vnc_pattern = Regex::new(&format!(r"x11vnc.*-rfbport {}", config.vnc_port))
            .map_err(|e| FieldPanelError::Config(e.to_string()))?;
        let novnc_pattern = Regex::new(&format!(r"websockify.*{}", config.novnc_port))
            .map_err(|e| FieldPanelError::Config(e.to_string()))?;
        Ok(Self {
            config,
            processes,
            x11vnc_bin: "x11vnc".to_string(),
            websockify_bin: "websockify".to_string(),
            x11vnc_pattern,
            novnc_pattern,
        })
    }

    /// Override the service executables (tests, non-standard installs).
    pub fn with_binaries(mut self, x11vnc: impl Into<String>, websockify: impl Into<String>) -> Self {
        self.x11vnc_bin = x11vnc.into();
        self.websockify_bin = websockify.into();
        self
    }

    /// Process-table scans block, so they run on the blocking pool.
    async fn find(&self, pattern: &Regex) -> Vec<u32> {
        let processes = Arc::clone(&self.processes);
        let pattern = pattern.clone();
        tokio::task::spawn_blocking(move || processes.find(&pattern))
            .await
            .unwrap_or_else(|e| {
                warn!("Process scan failed: {}", e);
                Vec::new()
            })
    }

    async fn terminate(&self, pid: u32) -> bool {
        let processes = Arc::clone(&self.processes);
        tokio::task::spawn_blocking(move || processes.terminate(pid))
            .await
            .unwrap_or(false)
    }

    async fn x11vnc_running(&self) -> bool {
        !self.find(&self.x11vnc_pattern).await.is_empty()
    }

    async fn novnc_running(&self) -> bool {
        !self.find(&self.novnc_pattern).await.is_empty()
    }

    fn script(&self, name: &str) -> Option<PathBuf> {
        self.config
            .scripts_dir
            .as_ref()
            .map(|dir| dir.join(name))
            .filter(|path| path.exists())
    }

    pub async fn status(&self) -> DesktopStatus {
        let x11vnc_running = self.x11vnc_running().await;
        let novnc_running = self.novnc_running().await;
        DesktopStatus {
            x11vnc_running,
            novnc_running,
            running: x11vnc_running && novnc_running,
            vnc_port: x11vnc_running.then_some(self.config.vnc_port),
            novnc_port: novnc_running.then_some(self.config.novnc_port),
            novnc_url: novnc_running
                .then(|| format!("http://localhost:{}/vnc.html", self.config.novnc_port)),
        }
    }

    fn started(&self, message: &str) -> DesktopOutcome {
        DesktopOutcome {
            success: true,
            message: message.to_string(),
            vnc_port: Some(self.config.vnc_port),
            novnc_port: Some(self.config.novnc_port),
            novnc_url: Some("/vnc/vnc.html".to_string()),
        }
    }

    pub async fn start(&self) -> Result<DesktopOutcome> {
        let x11vnc_running = self.x11vnc_running().await;
        let novnc_running = self.novnc_running().await;
        if x11vnc_running && novnc_running {
            return Ok(self.started("Remote desktop already running"));
        }

        if let Some(script) = self.script(START_SCRIPT) {
            let timeout = Duration::from_secs(self.config.script_timeout_secs);
            match run_with_timeout(&mut Command::new(&script), timeout).await {
                Ok(output) if output.status.success() => {
                    info!("Remote desktop started via {:?}", script);
                    return Ok(self.started("Remote desktop started"));
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    return Err(FieldPanelError::Process(if stderr.is_empty() {
                        "Script failed".to_string()
                    } else {
                        stderr
                    }));
                }
                // long-running scripts keep the services in the foreground
                Err(FieldPanelError::Timeout(_)) => {
                    debug!("{:?} still running after {:?}", script, timeout)
                }
                Err(e) => return Err(e),
            }
        }

        if !x11vnc_running {
            let display = self.config.display.clone();
            let port = self.config.vnc_port.to_string();
            let mut args = [
                "-display",
                display.as_str(),
                "-forever",
                "-shared",
                "-rfbport",
                port.as_str(),
                "-bg",
            ]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
            if self.config.password_file.exists() {
                args.push("-rfbauth".into());
                args.push(self.config.password_file.display().to_string());
            } else {
                args.push("-nopw".into());
            }
            spawn_detached(&self.x11vnc_bin, &args, "x11vnc")?;
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        if !novnc_running {
            let args = vec![
                format!("--web={}", self.config.novnc_web_root),
                self.config.novnc_port.to_string(),
                format!("localhost:{}", self.config.vnc_port),
            ];
            spawn_detached(&self.websockify_bin, &args, "novnc/websockify")?;
        }

        info!(
            vnc_port = self.config.vnc_port,
            novnc_port = self.config.novnc_port,
            "Remote desktop started"
        );
        Ok(self.started("Remote desktop started"))
    }

    pub async fn stop(&self) -> Result<DesktopOutcome> {
        if let Some(script) = self.script(STOP_SCRIPT) {
            let timeout = Duration::from_secs(self.config.script_timeout_secs);
            if let Err(e) = run_with_timeout(&mut Command::new(&script), timeout).await {
                warn!("{:?} failed: {}", script, e);
            }
        } else {
            for pattern in [&self.x11vnc_pattern, &self.novnc_pattern] {
                for pid in self.find(pattern).await {
                    if self.terminate(pid).await {
                        info!("Sent SIGTERM to {} ({})", pid, pattern);
                    }
                }
            }
        }

        Ok(DesktopOutcome {
            success: true,
            message: "Remote desktop stopped".to_string(),
            vnc_port: None,
            novnc_port: None,
            novnc_url: None,
        })
    }
}

fn spawn_detached(binary: &str, args: &[String], service: &str) -> Result<()> {
    let spawned = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    match spawned {
        Ok(child) => {
            debug!("Launched {} (pid {:?})", binary, child.id());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FieldPanelError::Unavailable(
            format!("{service} not installed. {SETUP_HINT}"),
        )),
        Err(e) => Err(e.into()),
    }
}
