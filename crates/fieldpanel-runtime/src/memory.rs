//! In-memory `ContainerRuntime` for exercising the services without an engine.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use fieldpanel_core::{FieldPanelError, Result};
use parking_lot::Mutex;

use crate::container::{ContainerInfo, ContainerRuntime, ContainerStats, RunSpec};

#[derive(Default)]
pub struct InMemoryRuntime {
    containers: Mutex<BTreeMap<String, ContainerInfo>>,
    logs: Mutex<BTreeMap<String, String>>,
    runs: Mutex<Vec<RunSpec>>,
    failing: Mutex<HashSet<String>>,
    next_id: Mutex<u64>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: ContainerInfo) {
        self.containers.lock().insert(info.name.clone(), info);
    }

    pub fn set_status(&self, name: &str, status: &str) {
        if let Some(info) = self.containers.lock().get_mut(name) {
            info.status = status.to_string();
        }
    }

    pub fn set_logs(&self, name: &str, logs: &str) {
        self.logs.lock().insert(name.to_string(), logs.to_string());
    }

    /// Make every later `run` for this container name fail.
    pub fn fail_runs_for(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn runs(&self) -> Vec<RunSpec> {
        self.runs.lock().clone()
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.containers.lock().get(name).cloned()
    }

    fn missing(name: &str) -> FieldPanelError {
        FieldPanelError::NotFound(format!("No such container: {name}"))
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .containers
            .lock()
            .values()
            .filter(|c| all || c.is_running())
            .cloned()
            .collect())
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats> {
        match self.containers.lock().get(name) {
            Some(c) if c.is_running() => Ok(ContainerStats {
                cpu_percent: 12.34,
                mem_usage_mb: 256.04,
                mem_percent: 1.66,
            }),
            Some(_) => Err(FieldPanelError::Container(format!("{name} is not running"))),
            None => Err(Self::missing(name)),
        }
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        if !self.containers.lock().contains_key(name) {
            return Err(Self::missing(name));
        }
        let logs = self.logs.lock().get(name).cloned().unwrap_or_default();
        let lines: Vec<&str> = logs.lines().collect();
        Ok(lines[lines.len().saturating_sub(tail)..].join("\n"))
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        if self.failing.lock().contains(&spec.name) {
            return Err(FieldPanelError::Container(format!(
                "failed to start {}",
                spec.name
            )));
        }
        let mut containers = self.containers.lock();
        if containers.contains_key(&spec.name) {
            return Err(FieldPanelError::Container(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }

        let id = {
            let mut next = self.next_id.lock();
            *next += 1;
            format!("{:064x}", *next)
        };
        containers.insert(
            spec.name.clone(),
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                status: "running".to_string(),
                created: "2026-01-01T00:00:00Z".to_string(),
                ports: spec.ports.clone(),
            },
        );
        self.runs.lock().push(spec.clone());
        Ok(id)
    }

    async fn stop(&self, name: &str, _timeout: Duration) -> Result<()> {
        match self.containers.lock().get_mut(name) {
            Some(info) => {
                info.status = "exited".to_string();
                Ok(())
            }
            None => Err(Self::missing(name)),
        }
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let mut containers = self.containers.lock();
        match containers.get(name) {
            Some(info) if info.is_running() && !force => Err(FieldPanelError::Container(
                format!("cannot remove running container {name}"),
            )),
            Some(_) => {
                containers.remove(name);
                Ok(())
            }
            None => Err(Self::missing(name)),
        }
    }
}
