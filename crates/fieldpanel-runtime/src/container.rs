use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use fieldpanel_core::Result;
use serde::{Deserialize, Serialize};

/// A container as reported by the engine's listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    /// Engine state: `created`, `running`, `exited`, ...
    pub status: String,
    pub created: String,
    /// Host port -> container port bindings, e.g. `6081 -> 6080/tcp`.
    pub ports: Vec<PortBinding>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|b| b.container_port == container_port)
            .map(|b| b.host_port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub mem_usage_mb: f64,
    pub mem_percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Everything needed to launch one detached container.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub image: String,
    pub command: Vec<String>,
    pub name: String,
    pub env: BTreeMap<String, String>,
    pub volumes: Vec<VolumeMount>,
    pub ports: Vec<PortBinding>,
}

/// Abstraction over the container engine that runs simulation trials.
///
/// Operations on a container that does not exist fail with
/// `FieldPanelError::NotFound`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Containers known to the engine; `all` includes stopped ones.
    async fn list(&self, all: bool) -> Result<Vec<ContainerInfo>>;

    async fn stats(&self, name: &str) -> Result<ContainerStats>;

    async fn logs(&self, name: &str, tail: usize) -> Result<String>;

    /// Start a detached container and return its id.
    async fn run(&self, spec: &RunSpec) -> Result<String>;

    async fn stop(&self, name: &str, timeout: Duration) -> Result<()>;

    async fn remove(&self, name: &str, force: bool) -> Result<()>;
}
