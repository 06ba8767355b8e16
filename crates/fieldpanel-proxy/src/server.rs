use std::future::Future;
use std::net::SocketAddr;

use anyhow::Context;
use fieldpanel_core::ProxyConfig;
use tracing::info;

use crate::{create_router, ProxyState};

pub struct ProxyServer {
    state: ProxyState,
    addr: SocketAddr,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| format!("invalid proxy address {}:{}", config.host, config.port))?;
        Ok(Self {
            state: ProxyState::new(config)?,
            addr,
        })
    }

    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let base = self.state.config.base_port;
        let router = create_router(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding {}", self.addr))?;

        info!("Trial VNC proxy listening on {}", self.addr);
        info!("Routing trialN.<domain> -> port {} + N", base);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("serving trial proxy")?;

        info!("Trial VNC proxy stopped");
        Ok(())
    }
}
