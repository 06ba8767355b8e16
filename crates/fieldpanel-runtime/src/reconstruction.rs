//! Supervision of the GP reconstruction scripts, one child process per trial.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use fieldpanel_core::{
    image_url, FieldPanelError, ReconstructionConfig, Result, TrialId, TrialLayout,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::process::{run_with_timeout, terminate_child};

/// Lines of `reconstruction.log` returned by [`ReconstructionSupervisor::logs`].
pub const LOG_TAIL_LINES: usize = 200;
const ERROR_LINES: usize = 5;
const DISCARD_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Serialize)]
pub struct ReconstructionStarted {
    pub pid: u32,
    pub log_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconstructionStatus {
    pub running: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconstructionStatus {
    fn idle(message: &str) -> Self {
        Self {
            running: false,
            message: message.to_string(),
            pid: None,
            return_code: None,
            success: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconstructionLogs {
    pub logs: String,
    pub running: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HeatmapOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Job {
    child: Child,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
}

impl Job {
    /// Exit status once the child has finished; cached after the first hit.
    fn poll(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => warn!("try_wait on reconstruction {:?} failed: {}", self.pid, e),
            }
        }
        self.exit
    }
}

pub struct ReconstructionSupervisor {
    layout: TrialLayout,
    python: PathBuf,
    config: ReconstructionConfig,
    jobs: Mutex<HashMap<TrialId, Job>>,
    /// Held across replace/discard so only one of them touches a trial at a time.
    guards: Mutex<HashMap<TrialId, Arc<AsyncMutex<()>>>>,
}

impl ReconstructionSupervisor {
    pub fn new(layout: TrialLayout, python: PathBuf, config: ReconstructionConfig) -> Self {
        Self {
            layout,
            python,
            config,
            jobs: Mutex::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self, id: TrialId) -> Arc<AsyncMutex<()>> {
        self.guards.lock().entry(id).or_default().clone()
    }

    /// Start a full reconstruction run, replacing any job for the same trial.
    pub async fn start(&self, id: TrialId) -> Result<ReconstructionStarted> {
        if !self.layout.mission_dir(id).exists() {
            return Err(FieldPanelError::not_found(format!(
                "Trial {id} data not found"
            )));
        }

        let guard = self.guard(id);
        let _exclusive = guard.lock().await;

        let previous = self.jobs.lock().remove(&id);
        if let Some(mut job) = previous {
            if job.poll().is_none() {
                info!(trial = %id, "Replacing running reconstruction {:?}", job.pid);
                let grace = Duration::from_secs(self.config.terminate_grace_secs);
                terminate_child(&mut job.child, grace).await?;
            }
        }

        fs::create_dir_all(self.layout.results_dir(id))?;
        let log_file = self.layout.reconstruction_log(id);
        let stdout = File::create(&log_file)?;
        let stderr = stdout.try_clone()?;

        let reconstruction_dir = self.layout.reconstruction_dir();
        let child = Command::new(&self.python)
            .arg(reconstruction_dir.join(&self.config.script))
            .args(["all", &id.to_string(), "all"])
            .current_dir(&reconstruction_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| {
                FieldPanelError::Process(format!(
                    "failed to launch {}: {}",
                    self.python.display(),
                    e
                ))
            })?;

        let pid = child.id().unwrap_or_default();
        info!(trial = %id, pid, "Reconstruction started, logging to {:?}", log_file);
        self.jobs.lock().insert(
            id,
            Job {
                child,
                pid: Some(pid),
                exit: None,
            },
        );

        Ok(ReconstructionStarted { pid, log_file })
    }

    pub fn status(&self, id: TrialId) -> ReconstructionStatus {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(&id) else {
            return ReconstructionStatus::idle("No reconstruction process found");
        };

        let Some(exit) = job.poll() else {
            return ReconstructionStatus {
                running: true,
                message: "Reconstruction in progress".to_string(),
                pid: job.pid,
                ..ReconstructionStatus::idle("")
            };
        };

        let return_code = exit.code().unwrap_or(-1);
        if return_code == 0 {
            return ReconstructionStatus {
                return_code: Some(0),
                success: Some(true),
                ..ReconstructionStatus::idle("Reconstruction completed successfully")
            };
        }

        ReconstructionStatus {
            return_code: Some(return_code),
            success: Some(false),
            error: Some(self.failure_reason(id)),
            ..ReconstructionStatus::idle("Reconstruction failed")
        }
    }

    fn failure_reason(&self, id: TrialId) -> String {
        let log_file = self.layout.reconstruction_log(id);
        if !log_file.exists() {
            return "No log file found".to_string();
        }
        match fs::read_to_string(&log_file) {
            Ok(content) => {
                let errors: Vec<&str> = content
                    .lines()
                    .filter(|line| line.to_lowercase().contains("error"))
                    .collect();
                if errors.is_empty() {
                    "Reconstruction failed. Check logs for details.".to_string()
                } else {
                    errors[errors.len().saturating_sub(ERROR_LINES)..].join("\n")
                }
            }
            Err(_) => "Could not read error log".to_string(),
        }
    }

    pub fn is_running(&self, id: TrialId) -> bool {
        self.jobs
            .lock()
            .get_mut(&id)
            .is_some_and(|job| job.poll().is_none())
    }

    pub fn logs(&self, id: TrialId) -> ReconstructionLogs {
        let logs = fs::read_to_string(self.layout.reconstruction_log(id))
            .map(|content| tail_lines(&content, LOG_TAIL_LINES))
            .unwrap_or_default();
        ReconstructionLogs {
            logs,
            running: self.is_running(id),
        }
    }

    /// Terminate and forget the trial's job. Returns whether one existed.
    pub async fn discard(&self, id: TrialId) -> Result<bool> {
        let guard = self.guard(id);
        let _exclusive = guard.lock().await;

        let job = self.jobs.lock().remove(&id);
        match job {
            Some(mut job) => {
                if job.poll().is_none() {
                    info!(trial = %id, "Stopping reconstruction {:?}", job.pid);
                    terminate_child(&mut job.child, DISCARD_GRACE).await?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run the comparison script that renders the method/kernel heatmap.
    pub async fn generate_heatmap(&self, id: TrialId) -> Result<HeatmapOutcome> {
        if !self.layout.results_dir(id).exists() {
            return Err(FieldPanelError::not_found(format!(
                "No reconstruction results for trial {id}"
            )));
        }

        let reconstruction_dir = self.layout.reconstruction_dir();
        let mut cmd = Command::new(&self.python);
        cmd.arg(reconstruction_dir.join(&self.config.compare_script))
            .arg(id.to_string())
            .current_dir(&reconstruction_dir);

        let timeout = Duration::from_secs(self.config.compare_timeout_secs);
        let output = match run_with_timeout(&mut cmd, timeout).await {
            Ok(output) => output,
            Err(FieldPanelError::Timeout(_)) => {
                return Err(FieldPanelError::Timeout(
                    "Heatmap generation timed out".to_string(),
                ))
            }
            Err(e) => return Err(e),
        };
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            warn!(trial = %id, "Heatmap script failed: {}", stderr.trim());
            return Ok(HeatmapOutcome {
                success: false,
                message: "Failed to generate heatmap".to_string(),
                path: None,
                output: None,
                error: Some(if stderr.is_empty() { stdout } else { stderr }),
            });
        }

        if self.layout.heatmap(id).exists() {
            Ok(HeatmapOutcome {
                success: true,
                message: format!("Comparison heatmap generated for trial {id}"),
                path: Some(image_url(id, "comparison/comparison_heatmaps.png")),
                output: None,
                error: None,
            })
        } else {
            Ok(HeatmapOutcome {
                success: false,
                message: "Heatmap script completed but no image was created".to_string(),
                path: None,
                output: Some(stdout),
                error: None,
            })
        }
    }
}

fn tail_lines(content: &str, n: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut tail = lines[lines.len().saturating_sub(n)..].join("\n");
    if !tail.is_empty() && content.ends_with('\n') {
        tail.push('\n');
    }
    tail
}
