use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fieldpanel_core::{Settings, TrialLayout};
use fieldpanel_runtime::{
    ContainerRuntime, DesktopController, DockerCli, ProcessTable, ReconstructionSupervisor,
    SimulationService, SysinfoProcessTable, SystemMonitor,
};
use tracing::{info, warn};

use crate::batch::BatchScheduler;
use crate::error::{ApiError, ApiResult};
use crate::event_bus::EventBus;

pub const DOCKER_UNAVAILABLE: &str = "Docker not available. Make sure Docker is running.";

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    layout: TrialLayout,
    /// Absent in production deployments or when the engine is unreachable.
    simulation: Option<Arc<SimulationService>>,
    pub reconstruction: Arc<ReconstructionSupervisor>,
    pub desktop: Arc<DesktopController>,
    pub system: Arc<SystemMonitor>,
    pub batch: Arc<BatchScheduler>,
    pub events: EventBus,
    pub ws_metrics: Arc<WebSocketMetrics>,
}

impl AppState {
    /// Build the state for a real host: probe the Docker engine unless the
    /// deployment is marked as production.
    pub async fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let runtime: Option<Arc<dyn ContainerRuntime>> = if settings.runtime.production {
            info!("Running in production mode - Docker features disabled");
            None
        } else {
            let docker = DockerCli::new(settings.containers.docker_binary.clone());
            match docker.ping().await {
                Ok(()) => {
                    info!("Docker client connected");
                    Some(Arc::new(docker) as Arc<dyn ContainerRuntime>)
                }
                Err(e) => {
                    warn!("Docker client failed: {}", e);
                    None
                }
            }
        };
        Self::new(settings, runtime, Arc::new(SysinfoProcessTable::new()))
    }

    pub fn new(
        settings: Settings,
        runtime: Option<Arc<dyn ContainerRuntime>>,
        processes: Arc<dyn ProcessTable>,
    ) -> anyhow::Result<Self> {
        let layout = settings.layout();
        let simulation = runtime.map(|runtime| {
            Arc::new(SimulationService::new(
                runtime,
                layout.clone(),
                settings.containers.clone(),
            ))
        });
        let reconstruction = Arc::new(ReconstructionSupervisor::new(
            layout.clone(),
            settings.python_path(),
            settings.reconstruction.clone(),
        ));
        let desktop = Arc::new(DesktopController::new(settings.desktop.clone(), processes)?);

        Ok(Self {
            settings: Arc::new(settings),
            layout,
            simulation,
            reconstruction,
            desktop,
            system: Arc::new(SystemMonitor::new()),
            batch: Arc::new(BatchScheduler::new()),
            events: EventBus::new(),
            ws_metrics: Arc::new(WebSocketMetrics::default()),
        })
    }

    pub fn layout(&self) -> &TrialLayout {
        &self.layout
    }

    pub fn simulation(&self) -> ApiResult<&Arc<SimulationService>> {
        self.simulation
            .as_ref()
            .ok_or_else(|| ApiError::Internal(DOCKER_UNAVAILABLE.to_string()))
    }

    pub fn host_connected(&self) -> bool {
        self.simulation.is_some()
    }
}

#[derive(Default)]
pub struct WebSocketMetrics {
    pub active_connections: AtomicUsize,
    pub peak_connections: AtomicUsize,
    pub total_connections: AtomicUsize,
}

impl WebSocketMetrics {
    pub fn on_connect(&self) {
        let now = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        let mut peak = self.peak_connections.load(Ordering::Relaxed);
        while now > peak
            && self
                .peak_connections
                .compare_exchange(peak, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_err()
        {
            peak = self.peak_connections.load(Ordering::Relaxed);
        }
    }

    pub fn on_disconnect(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}
