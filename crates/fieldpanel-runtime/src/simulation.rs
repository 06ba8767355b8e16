//! Simulation trials: one container per trial, named `<prefix><id>`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use fieldpanel_core::{
    numeric_sort_key, ContainerConfig, FieldPanelError, Result, TrialId, TrialLayout,
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::container::{ContainerRuntime, ContainerStats, PortBinding, RunSpec, VolumeMount};

/// Log lines inspected for waypoint progress.
pub const PROGRESS_LOG_TAIL: usize = 50;

lazy_static! {
    static ref WAYPOINT: Regex = Regex::new(r"Waypoint (\d+)/(\d+):").unwrap();
}

const MISSION_COMPLETE: &str = "MISSION COMPLETE!";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MissionProgress {
    pub current_waypoint: u32,
    pub total_waypoints: u32,
    pub mission_complete: bool,
    pub progress_percent: f64,
}

/// A trial container as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerSummary {
    pub name: String,
    pub trial_id: String,
    pub status: String,
    pub vnc_port: Option<u16>,
    /// Empty object unless the container is running.
    #[serde(serialize_with = "object_or_empty")]
    pub stats: Option<ContainerStats>,
    #[serde(serialize_with = "object_or_empty")]
    pub mission: Option<MissionProgress>,
    pub created: String,
}

impl ContainerSummary {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn trial(&self) -> Option<TrialId> {
        self.trial_id.parse().ok()
    }
}

fn object_or_empty<S, T>(value: &Option<T>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    match value {
        Some(v) => v.serialize(serializer),
        None => BTreeMap::<String, String>::new().serialize(serializer),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartedTrial {
    pub container_id: String,
    pub name: String,
    pub vnc_port: u16,
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Extract waypoint progress from mission log output.
///
/// The last `Waypoint c/t:` line wins; a `MISSION COMPLETE!` line anywhere
/// pins the progress at 100%.
pub fn parse_mission_progress(logs: &str) -> MissionProgress {
    let mut progress = MissionProgress::default();

    if let Some(caps) = WAYPOINT.captures_iter(logs).last() {
        let current: u32 = caps[1].parse().unwrap_or(0);
        let total: u32 = caps[2].parse().unwrap_or(0);
        progress.current_waypoint = current;
        progress.total_waypoints = total;
        if total > 0 {
            progress.progress_percent = round1(current as f64 / total as f64 * 100.0);
        }
    }

    if logs.contains(MISSION_COMPLETE) {
        progress.mission_complete = true;
        progress.progress_percent = 100.0;
    }

    progress
}

pub struct SimulationService {
    runtime: Arc<dyn ContainerRuntime>,
    layout: TrialLayout,
    config: ContainerConfig,
}

impl SimulationService {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, layout: TrialLayout, config: ContainerConfig) -> Self {
        Self {
            runtime,
            layout,
            config,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn layout(&self) -> &TrialLayout {
        &self.layout
    }

    pub fn container_name(&self, id: TrialId) -> String {
        id.container_name(&self.config.name_prefix)
    }

    /// Every container carrying the trial prefix, ordered by trial id.
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>> {
        let prefix = &self.config.name_prefix;
        let mut summaries = Vec::new();

        for info in self.runtime.list(true).await? {
            let Some(trial_id) = info.name.strip_prefix(prefix.as_str()) else {
                continue;
            };

            let mut stats = None;
            let mut mission = None;
            if info.is_running() {
                match self.runtime.stats(&info.name).await {
                    Ok(s) => {
                        stats = Some(ContainerStats {
                            cpu_percent: round1(s.cpu_percent),
                            mem_usage_mb: round1(s.mem_usage_mb),
                            mem_percent: round1(s.mem_percent),
                        })
                    }
                    Err(e) => debug!("stats for {} unavailable: {}", info.name, e),
                }
                match self.runtime.logs(&info.name, PROGRESS_LOG_TAIL).await {
                    Ok(logs) => mission = Some(parse_mission_progress(&logs)),
                    Err(e) => debug!("logs for {} unavailable: {}", info.name, e),
                }
            }

            summaries.push(ContainerSummary {
                trial_id: trial_id.to_string(),
                vnc_port: info.host_port_for(self.config.container_vnc_port),
                status: info.status.clone(),
                created: info.created.clone(),
                name: info.name,
                stats,
                mission,
            });
        }

        summaries.sort_by_key(|c| numeric_sort_key(&c.trial_id));
        Ok(summaries)
    }

    pub async fn running_count(&self) -> Result<usize> {
        let prefix = &self.config.name_prefix;
        Ok(self
            .runtime
            .list(false)
            .await?
            .iter()
            .filter(|c| c.is_running() && c.name.starts_with(prefix.as_str()))
            .count())
    }

    /// Launch a fresh container for the trial, replacing any previous one.
    pub async fn start_trial(&self, id: TrialId) -> Result<StartedTrial> {
        let name = self.container_name(id);
        let vnc_port = id.vnc_port(self.config.vnc_base_port)?;

        let missions = self.layout.missions_dir();
        let trial_dir = self.layout.mission_dir(id);
        fs::create_dir_all(&trial_dir)?;
        open_permissions(&missions)?;
        open_permissions(&trial_dir)?;

        match self.runtime.remove(&name, true).await {
            Ok(()) => info!(trial = %id, "Removed previous container {}", name),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut env = BTreeMap::new();
        env.insert("TRIAL_ID".to_string(), id.to_string());
        env.insert("ROS_DOMAIN_ID".to_string(), id.ros_domain_id().to_string());
        env.insert("HEADLESS".to_string(), "1".to_string());

        let spec = RunSpec {
            image: self.config.image.clone(),
            command: self
                .config
                .command
                .split_whitespace()
                .map(String::from)
                .collect(),
            name: name.clone(),
            env,
            volumes: vec![VolumeMount {
                host_path: missions,
                container_path: self.config.container_data_dir.clone(),
                read_only: false,
            }],
            ports: vec![PortBinding {
                host_port: vnc_port,
                container_port: self.config.container_vnc_port,
            }],
        };

        let container_id = self.runtime.run(&spec).await?;
        info!(trial = %id, vnc_port, "Trial container {} started", name);
        Ok(StartedTrial {
            container_id,
            name,
            vnc_port,
        })
    }

    pub async fn stop_trial(&self, id: TrialId) -> Result<()> {
        let timeout = Duration::from_secs(self.config.stop_timeout_secs);
        self.runtime.stop(&self.container_name(id), timeout).await
    }

    pub async fn remove_trial(&self, id: TrialId) -> Result<()> {
        self.runtime.remove(&self.container_name(id), true).await
    }

    pub async fn trial_logs(&self, id: TrialId, lines: usize) -> Result<String> {
        self.runtime.logs(&self.container_name(id), lines).await
    }

    /// Stop every running trial container; returns the names stopped.
    pub async fn stop_all(&self) -> Result<Vec<String>> {
        let timeout = Duration::from_secs(self.config.stop_timeout_secs);
        let prefix = &self.config.name_prefix;
        let mut stopped = Vec::new();
        for info in self.runtime.list(false).await? {
            if !info.is_running() || !info.name.starts_with(prefix.as_str()) {
                continue;
            }
            match self.runtime.stop(&info.name, timeout).await {
                Ok(()) => stopped.push(info.name),
                Err(e) => warn!("Failed to stop {}: {}", info.name, e),
            }
        }
        Ok(stopped)
    }
}

/// The container user differs from the host user; both must write here.
#[cfg(unix)]
fn open_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o777)).map_err(|e| {
        FieldPanelError::Io(std::io::Error::new(
            e.kind(),
            format!("chmod 0777 {}: {}", path.display(), e),
        ))
    })
}

#[cfg(not(unix))]
fn open_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
