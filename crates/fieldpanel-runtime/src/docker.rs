//! `ContainerRuntime` backed by the `docker` command-line client.
//!
//! Every call shells out once and reads the `{{json .}}` formatted output,
//! so the panel works against whatever engine the local CLI is pointed at.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use fieldpanel_core::{FieldPanelError, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::container::{ContainerInfo, ContainerRuntime, ContainerStats, PortBinding, RunSpec};
use crate::process::run_with_timeout;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn exec(&self, args: &[String], timeout: Duration) -> Result<String> {
        debug!("{} {}", self.binary, args.join(" "));
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);

        let output = match run_with_timeout(&mut cmd, timeout).await {
            Ok(output) => output,
            Err(FieldPanelError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FieldPanelError::Unavailable(format!(
                    "{} binary not found",
                    self.binary
                )));
            }
            Err(e) => return Err(e),
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("No such container") {
            Err(FieldPanelError::NotFound(stderr))
        } else {
            Err(FieldPanelError::Container(stderr))
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[derive(Debug, Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Ports", default)]
    ports: String,
    #[serde(rename = "CreatedAt", default)]
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct StatsLine {
    #[serde(rename = "CPUPerc", default)]
    cpu_perc: String,
    #[serde(rename = "MemUsage", default)]
    mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    mem_perc: String,
}

fn parse_ps(stdout: &str) -> Result<Vec<ContainerInfo>> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let ps: PsLine = serde_json::from_str(line)?;
            Ok(ContainerInfo {
                id: ps.id,
                // multiple names are comma separated; the first is canonical
                name: ps.names.split(',').next().unwrap_or_default().to_string(),
                status: ps.state,
                created: ps.created_at,
                ports: parse_ports(&ps.ports),
            })
        })
        .collect()
}

/// Parse `0.0.0.0:6081->6080/tcp, :::6081->6080/tcp` into bindings.
fn parse_ports(ports: &str) -> Vec<PortBinding> {
    let mut bindings: Vec<PortBinding> = Vec::new();
    for entry in ports.split(',').map(str::trim) {
        let Some((host, container)) = entry.split_once("->") else {
            continue;
        };
        let host_port = host.rsplit(':').next().and_then(|p| p.parse().ok());
        let container_port = container.split('/').next().and_then(|p| p.parse().ok());
        if let (Some(host_port), Some(container_port)) = (host_port, container_port) {
            let binding = PortBinding {
                host_port,
                container_port,
            };
            if !bindings.contains(&binding) {
                bindings.push(binding);
            }
        }
    }
    bindings
}

fn parse_percent(value: &str) -> f64 {
    value.trim().trim_end_matches('%').parse().unwrap_or(0.0)
}

/// `"100.5MiB / 15.5GiB"` -> MiB used.
fn parse_mem_usage_mb(value: &str) -> f64 {
    let used = value.split('/').next().unwrap_or_default().trim();
    let split = used
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(used.len());
    let (number, unit) = used.split_at(split);
    let Ok(number) = number.trim().parse::<f64>() else {
        return 0.0;
    };
    let bytes = match unit {
        "B" => number,
        "KiB" => number * 1024.0,
        "MiB" => number * 1024.0 * 1024.0,
        "GiB" => number * 1024.0 * 1024.0 * 1024.0,
        "TiB" => number * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "kB" | "KB" => number * 1e3,
        "MB" => number * 1e6,
        "GB" => number * 1e9,
        _ => number,
    };
    bytes / 1024.0 / 1024.0
}

fn run_args(spec: &RunSpec) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        spec.name.clone(),
    ];
    for (key, value) in &spec.env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    for volume in &spec.volumes {
        args.push("-v".into());
        args.push(format!(
            "{}:{}:{}",
            volume.host_path.display(),
            volume.container_path,
            if volume.read_only { "ro" } else { "rw" }
        ));
    }
    for port in &spec.ports {
        args.push("-p".into());
        args.push(format!("{}:{}/tcp", port.host_port, port.container_port));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn ping(&self) -> Result<()> {
        let args = ["version", "--format", "{{.Server.Version}}"].map(String::from);
        let version = self.exec(&args, Duration::from_secs(10)).await?;
        info!("Docker engine reachable (server {})", version.trim());
        Ok(())
    }

    async fn list(&self, all: bool) -> Result<Vec<ContainerInfo>> {
        let mut args = vec!["ps".to_string()];
        if all {
            args.push("-a".into());
        }
        args.extend(["--no-trunc", "--format", "{{json .}}"].map(String::from));
        let stdout = self.exec(&args, DEFAULT_TIMEOUT).await?;
        parse_ps(&stdout)
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats> {
        let args = ["stats", "--no-stream", "--format", "{{json .}}", name].map(String::from);
        let stdout = self.exec(&args, DEFAULT_TIMEOUT).await?;
        let line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| FieldPanelError::Container(format!("no stats for {name}")))?;
        let stats: StatsLine = serde_json::from_str(line)?;
        Ok(ContainerStats {
            cpu_percent: parse_percent(&stats.cpu_perc),
            mem_usage_mb: parse_mem_usage_mb(&stats.mem_usage),
            mem_percent: parse_percent(&stats.mem_perc),
        })
    }

    async fn logs(&self, name: &str, tail: usize) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["logs", "--tail", &tail.to_string(), name]);
        let output = run_with_timeout(&mut cmd, DEFAULT_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(if stderr.contains("No such container") {
                FieldPanelError::NotFound(stderr)
            } else {
                FieldPanelError::Container(stderr)
            });
        }
        // container stdout and stderr are both part of the log
        let mut logs = String::from_utf8_lossy(&output.stdout).into_owned();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn run(&self, spec: &RunSpec) -> Result<String> {
        let stdout = self.exec(&run_args(spec), Duration::from_secs(120)).await?;
        let id = stdout.trim().to_string();
        info!("Started container {} ({})", spec.name, id);
        Ok(id)
    }

    async fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        let args = ["stop", "-t", &timeout.as_secs().to_string(), name].map(String::from);
        self.exec(&args, timeout + DEFAULT_TIMEOUT).await?;
        info!("Stopped container {}", name);
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("-f".into());
        }
        args.push(name.to_string());
        self.exec(&args, DEFAULT_TIMEOUT).await?;
        info!("Removed container {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::VolumeMount;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    #[test]
    fn parses_ps_json_lines() {
        let stdout = concat!(
            r#"{"ID":"abc123","Names":"aquatic-trial-3","State":"running","Ports":"0.0.0.0:6083->6080/tcp, :::6083->6080/tcp","CreatedAt":"2026-05-01 10:00:00 +0000 UTC"}"#,
            "\n",
            r#"{"ID":"def456","Names":"aquatic-trial-4","State":"exited","Ports":"","CreatedAt":"2026-05-01 11:00:00 +0000 UTC"}"#,
            "\n"
        );
        let containers = parse_ps(stdout).unwrap();
        assert_eq!(containers.len(), 2);
        assert!(containers[0].is_running());
        assert_eq!(
            containers[0].ports,
            vec![PortBinding {
                host_port: 6083,
                container_port: 6080
            }]
        );
        assert_eq!(containers[0].host_port_for(6080), Some(6083));
        assert_eq!(containers[1].host_port_for(6080), None);
    }

    #[test]
    fn parses_stats_units() {
        assert_eq!(parse_percent("12.5%"), 12.5);
        assert_eq!(parse_percent("--"), 0.0);
        assert!((parse_mem_usage_mb("512MiB / 15.5GiB") - 512.0).abs() < 1e-9);
        assert!((parse_mem_usage_mb("1.5GiB / 15.5GiB") - 1536.0).abs() < 1e-9);
        assert_eq!(parse_mem_usage_mb("garbage"), 0.0);
    }

    #[test]
    fn builds_run_arguments() {
        let mut env = BTreeMap::new();
        env.insert("TRIAL_ID".to_string(), "5".to_string());
        let spec = RunSpec {
            image: "aquatic-sim:latest".into(),
            command: vec!["mission".into()],
            name: "aquatic-trial-5".into(),
            env,
            volumes: vec![VolumeMount {
                host_path: PathBuf::from("/data/missions"),
                container_path: "/home/simuser/missions".into(),
                read_only: false,
            }],
            ports: vec![PortBinding {
                host_port: 6085,
                container_port: 6080,
            }],
        };
        assert_eq!(
            run_args(&spec).join(" "),
            "run -d --name aquatic-trial-5 -e TRIAL_ID=5 -v /data/missions:/home/simuser/missions:rw -p 6085:6080/tcp aquatic-sim:latest mission"
        );
    }
}
