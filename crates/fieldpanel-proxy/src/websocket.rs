//! WebSocket bridging between the browser's noVNC client and a trial's
//! websockify endpoint.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use http::{header, request::Parts, HeaderValue};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as WsMessage},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::routing::Route;
use crate::ProxyState;

type Upstream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

pub async fn bridge(proxy: ProxyState, parts: Parts, ws: WebSocketUpgrade) -> Response {
    let Some(route) = Route::resolve(&proxy.config, &parts.headers, &parts.uri) else {
        return ProxyError::InvalidHost("Invalid trial URL".to_string()).into_response();
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/websockify");
    let url = format!("ws://{}:{}{}", proxy.config.upstream_host, route.port, path);
    info!(trial = route.trial, port = route.port, "WebSocket proxy {}", path);

    let protocols = parts.headers.get(header::SEC_WEBSOCKET_PROTOCOL).cloned();
    let (upstream, selected) = match connect_upstream(&url, protocols).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!(trial = route.trial, "WebSocket upstream unavailable: {}", e);
            return ProxyError::Unavailable {
                trial: route.trial,
                port: route.port,
            }
            .into_response();
        }
    };

    let ws = match selected {
        Some(protocol) => ws.protocols([protocol]),
        None => ws,
    };
    let trial = route.trial;
    ws.on_upgrade(move |client| async move {
        pump(client, upstream).await;
        debug!(trial, "WebSocket proxy closed");
    })
}

/// Connect to the trial, offering the client's sub-protocols, and report the
/// one the trial accepted.
async fn connect_upstream(
    url: &str,
    protocols: Option<HeaderValue>,
) -> Result<(Upstream, Option<String>), tokio_tungstenite::tungstenite::Error> {
    let mut request = url.into_client_request()?;
    if let Some(protocols) = protocols {
        request
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, protocols);
    }
    let (stream, response) = connect_async(request).await?;
    let selected = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok((stream, selected))
}

/// Relay data frames both ways until either side closes.
async fn pump(client: WebSocket, upstream: Upstream) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let to_upstream = async {
        while let Some(Ok(msg)) = client_rx.next().await {
            let forwarded = match msg {
                Message::Text(text) => WsMessage::Text(text.as_str().to_owned().into()),
                Message::Binary(data) => WsMessage::Binary(data),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if upstream_tx.send(forwarded).await.is_err() {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let to_client = async {
        while let Some(Ok(msg)) = upstream_rx.next().await {
            let forwarded = match msg {
                WsMessage::Text(text) => Message::Text(text.as_str().to_owned().into()),
                WsMessage::Binary(data) => Message::Binary(data),
                WsMessage::Close(_) => break,
                _ => continue,
            };
            if client_tx.send(forwarded).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = to_upstream => {},
        _ = to_client => {},
    }
}
