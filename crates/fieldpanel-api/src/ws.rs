//! Live dashboard feed over WebSocket.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::handlers::snapshot;
use crate::metrics::WS_CLIENTS;
use crate::state::AppState;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(2);

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_websocket(socket, state))
}

fn encode<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Could not encode dashboard message: {}", e);
            None
        }
    }
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    let mut ticker = interval(SNAPSHOT_INTERVAL);

    state.ws_metrics.on_connect();
    WS_CLIENTS.inc();
    info!(clients = state.ws_metrics.active(), "Dashboard client connected");

    loop {
        let outgoing = tokio::select! {
            _ = ticker.tick() => encode(&snapshot(&state).await),

            event = events.recv() => match event {
                Ok(event) => encode(&event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Dashboard client lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },

            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            },
        };

        if let Some(message) = outgoing {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    }

    state.ws_metrics.on_disconnect();
    WS_CLIENTS.dec();
    info!(clients = state.ws_metrics.active(), "Dashboard client disconnected");
}
