use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::RUNNING_TRIALS;
use crate::{create_router, AppState};

const METRICS_REFRESH: Duration = Duration::from_secs(15);

pub struct Server {
    state: AppState,
    addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        crate::metrics::register_metrics();

        let shutdown = CancellationToken::new();
        if state.host_connected() {
            spawn_gauge_refresh(state.clone(), shutdown.clone(), METRICS_REFRESH);
        }

        Self {
            state,
            addr,
            shutdown,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let batch = self.state.batch.clone();
        let router = create_router(self.state);

        info!("Starting FieldPanel control panel on {}", self.addr);

        let listener = {
            let socket = if self.addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }
            .context("creating listening socket")?;

            // Restarts should not wait for TIME_WAIT to expire
            let _ = socket.set_reuseaddr(true);
            let _ = socket.set_keepalive(true);

            socket
                .bind(self.addr)
                .with_context(|| format!("binding {}", self.addr))?;
            socket.listen(1024)?
        };

        info!("Dashboard available at http://{}/dashboard", self.addr);
        info!("Live updates at ws://{}/ws", self.addr);
        info!("Prometheus metrics at http://{}/metrics", self.addr);

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.shutdown.cancel();
        batch.stop();
        served.context("serving control panel")?;
        info!("Control panel stopped");
        Ok(())
    }
}

/// Keep the running-trials gauge current for scrapes until `shutdown` fires.
fn spawn_gauge_refresh(
    state: AppState,
    shutdown: CancellationToken,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Ok(simulation) = state.simulation() {
                match simulation.running_count().await {
                    Ok(count) => RUNNING_TRIALS.set(count as i64),
                    Err(e) => debug!("Could not count running trials: {}", e),
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(every) => {}
            }
        }
        debug!("Running-trials gauge refresh stopped");
    })
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Ctrl+C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
        "Ctrl+C"
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
        "SIGTERM"
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&str>();

    let received = tokio::select! {
        name = interrupt => name,
        name = terminate => name,
    };
    info!(signal = received, "Shutdown requested");
}
