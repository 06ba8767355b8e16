//! Reverse proxy exposing each trial's noVNC session under its own
//! host name: `trialN.<domain>` is served by `localhost:<base_port + N>`.

pub mod error;
pub mod forward;
pub mod routing;
pub mod server;
pub mod websocket;

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    extract::ws::WebSocketUpgrade,
    response::{IntoResponse, Response},
    Router,
};
use fieldpanel_core::ProxyConfig;
use tower_http::trace::TraceLayer;

pub use error::{ProxyError, ProxyResult};
pub use routing::{trial_from_host, Route};
pub use server::ProxyServer;

const WEBSOCKET_PATH: &str = "/websockify";

#[derive(Clone)]
pub struct ProxyState {
    pub config: Arc<ProxyConfig>,
    pub client: reqwest::Client,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> anyhow::Result<Self> {
        // Redirects belong to the browser, not the proxy
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }
}

pub fn create_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(State(proxy): State<ProxyState>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();
    if parts.uri.path() == WEBSOCKET_PATH && websocket::is_upgrade(&parts) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &proxy).await {
            Ok(ws) => websocket::bridge(proxy, parts, ws).await,
            Err(rejection) => rejection.into_response(),
        };
    }

    let req = Request::from_parts(parts, body);
    forward::forward(State(proxy), req).await.into_response()
}
