use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{any, get},
    Router,
};
use fieldpanel_core::ProxyConfig;
use fieldpanel_proxy::{create_router, ProxyState};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as WsMessage},
};

async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn echo(headers: HeaderMap, uri: axum::http::Uri, body: Bytes) -> Response {
    let seen_host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let token = headers
        .get("x-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (
        [("x-upstream", "novnc"), ("x-seen-host", seen_host.as_str())],
        format!("{} {} {}", uri, token, String::from_utf8_lossy(&body)),
    )
        .into_response()
}

async fn echo_socket(ws: WebSocketUpgrade) -> Response {
    ws.protocols(["binary"])
        .on_upgrade(|mut socket: WebSocket| async move {
            while let Some(Ok(msg)) = socket.recv().await {
                let reply = match msg {
                    Message::Text(text) => Message::Text(format!("echo:{}", text.as_str()).into()),
                    Message::Binary(data) => Message::Binary(data),
                    Message::Close(_) => break,
                    _ => continue,
                };
                if socket.send(reply).await.is_err() {
                    break;
                }
            }
        })
}

fn upstream_router() -> Router {
    Router::new()
        .route("/websockify", get(echo_socket))
        .route("/moved", get(|| async { Redirect::temporary("/vnc.html") }))
        .route("/{*path}", any(echo))
}

/// Proxy whose `trial1` maps onto `upstream_port`.
async fn spawn_proxy(upstream_port: u16) -> SocketAddr {
    let config = ProxyConfig {
        base_port: upstream_port - 1,
        domain_hint: "example.com".into(),
        ..ProxyConfig::default()
    };
    spawn(create_router(ProxyState::new(config).unwrap())).await
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn forwards_request_to_trial_port() {
    let upstream = spawn(upstream_router()).await;
    let proxy = spawn_proxy(upstream.port()).await;

    let resp = client()
        .post(format!("http://{proxy}/core/app.js?v=2"))
        .header(header::HOST, "trial1.example.com")
        .header("x-token", "abc")
        .body("payload")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-upstream"], "novnc");
    assert_ne!(resp.headers()["x-seen-host"], "trial1.example.com");
    assert_eq!(resp.text().await.unwrap(), "/core/app.js?v=2 abc payload");
}

#[tokio::test]
async fn redirects_are_passed_through() {
    let upstream = spawn(upstream_router()).await;
    let proxy = spawn_proxy(upstream.port()).await;

    let resp = client()
        .get(format!("http://{proxy}/moved"))
        .header(header::HOST, "trial1.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.headers()[header::LOCATION], "/vnc.html");
}

#[tokio::test]
async fn unknown_host_is_rejected() {
    let upstream = spawn(upstream_router()).await;
    let proxy = spawn_proxy(upstream.port()).await;

    let resp = client()
        .get(format!("http://{proxy}/vnc.html"))
        .header(header::HOST, "vnc.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        resp.text().await.unwrap(),
        "Invalid trial URL. Use trialX.example.com"
    );
}

#[tokio::test]
async fn stopped_trial_is_unavailable() {
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let proxy = spawn_proxy(closed).await;

    let resp = client()
        .get(format!("http://{proxy}/vnc.html"))
        .header(header::HOST, "trial1.example.com")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        resp.text().await.unwrap(),
        format!("Trial 1 VNC not running (port {closed})")
    );
}

#[tokio::test]
async fn websocket_frames_are_bridged() {
    let upstream = spawn(upstream_router()).await;
    let proxy = spawn_proxy(upstream.port()).await;

    let mut request = format!("ws://{proxy}/websockify?token=1")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(header::HOST, "trial1.example.com".parse().unwrap());
    request
        .headers_mut()
        .insert(header::SEC_WEBSOCKET_PROTOCOL, "binary".parse().unwrap());

    let (mut socket, response) = connect_async(request).await.unwrap();
    assert_eq!(response.headers()[header::SEC_WEBSOCKET_PROTOCOL], "binary");

    socket.send(WsMessage::Text("hello".into())).await.unwrap();
    match socket.next().await.unwrap().unwrap() {
        WsMessage::Text(text) => assert_eq!(text.as_str(), "echo:hello"),
        other => panic!("unexpected frame {other:?}"),
    }

    socket
        .send(WsMessage::Binary(vec![1u8, 2, 3].into()))
        .await
        .unwrap();
    match socket.next().await.unwrap().unwrap() {
        WsMessage::Binary(data) => assert_eq!(&data[..], &[1, 2, 3]),
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn websocket_with_bad_host_is_rejected() {
    let upstream = spawn(upstream_router()).await;
    let proxy = spawn_proxy(upstream.port()).await;

    let mut request = format!("ws://{proxy}/websockify").into_client_request().unwrap();
    request
        .headers_mut()
        .insert(header::HOST, "example.com".parse().unwrap());
    let err = connect_async(request).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => {
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST)
        }
        other => panic!("unexpected error {other:?}"),
    }
}
