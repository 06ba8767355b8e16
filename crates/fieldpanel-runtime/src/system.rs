use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::System;
use tokio::process::Command;
use tracing::debug;

use crate::process::run_with_timeout;
use crate::simulation::round1;

const GPU_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SystemStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_used_gb: f64,
    pub memory_total_gb: f64,
    pub gpu: Option<GpuStats>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GpuStats {
    pub utilization: u32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub name: String,
}

/// Host CPU, memory and (NVIDIA) GPU usage.
///
/// CPU usage is the delta since the previous snapshot, so the monitor keeps
/// one long-lived `System`.
pub struct SystemMonitor {
    system: Mutex<System>,
    nvidia_smi: String,
}

impl SystemMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            nvidia_smi: "nvidia-smi".to_string(),
        }
    }

    pub fn with_nvidia_smi(mut self, binary: impl Into<String>) -> Self {
        self.nvidia_smi = binary.into();
        self
    }

    pub async fn snapshot(&self) -> SystemStats {
        let mut stats = self.host_stats();
        stats.gpu = self.gpu_stats().await;
        stats
    }

    fn host_stats(&self) -> SystemStats {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory() as f64;
        let used = system.used_memory() as f64;
        SystemStats {
            cpu_percent: round1(system.global_cpu_usage() as f64),
            memory_percent: if total > 0.0 {
                round1(used / total * 100.0)
            } else {
                0.0
            },
            memory_used_gb: round1(used / BYTES_PER_GB),
            memory_total_gb: round1(total / BYTES_PER_GB),
            gpu: None,
        }
    }

    async fn gpu_stats(&self) -> Option<GpuStats> {
        let mut cmd = Command::new(&self.nvidia_smi);
        cmd.args([
            "--query-gpu=utilization.gpu,memory.used,memory.total,name",
            "--format=csv,noheader,nounits",
        ]);
        match run_with_timeout(&mut cmd, GPU_QUERY_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                parse_gpu_line(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(_) => None,
            Err(e) => {
                debug!("GPU query unavailable: {}", e);
                None
            }
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// First GPU from `nvidia-smi ... --format=csv,noheader,nounits`.
fn parse_gpu_line(stdout: &str) -> Option<GpuStats> {
    let line = stdout.lines().next()?.trim();
    let parts: Vec<&str> = line.splitn(4, ',').map(str::trim).collect();
    if parts.len() < 4 {
        return None;
    }
    Some(GpuStats {
        utilization: parts[0].parse().ok()?,
        memory_used_mb: parts[1].parse().ok()?,
        memory_total_mb: parts[2].parse().ok()?,
        name: parts[3].to_string(),
    })
}
