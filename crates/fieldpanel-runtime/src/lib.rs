pub mod container;
pub mod desktop;
pub mod docker;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod process;
pub mod reconstruction;
pub mod simulation;
pub mod system;

pub use container::*;
pub use desktop::{DesktopController, DesktopOutcome, DesktopStatus, ProcessTable, SysinfoProcessTable};
pub use docker::DockerCli;
pub use reconstruction::{
    HeatmapOutcome, ReconstructionLogs, ReconstructionStarted, ReconstructionStatus,
    ReconstructionSupervisor,
};
pub use simulation::{
    parse_mission_progress, round1, ContainerSummary, MissionProgress, SimulationService,
    StartedTrial,
};
pub use system::{GpuStats, SystemMonitor, SystemStats};
