//! Plain HTTP forwarding to a trial's noVNC web server.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    response::Response,
};
use http::{header, HeaderMap, HeaderName};
use tracing::{debug, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::routing::Route;
use crate::ProxyState;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Copy `headers` without hop-by-hop fields and the extra names given.
fn filtered(headers: &HeaderMap, extra: &[HeaderName]) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || extra.contains(name) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

pub fn request_headers(headers: &HeaderMap) -> HeaderMap {
    filtered(headers, &[header::HOST, header::CONTENT_LENGTH])
}

pub fn response_headers(headers: &HeaderMap) -> HeaderMap {
    filtered(headers, &[header::CONTENT_LENGTH])
}

pub async fn forward(State(proxy): State<ProxyState>, req: Request) -> ProxyResult<Response> {
    let route = Route::resolve(&proxy.config, req.headers(), req.uri()).ok_or_else(|| {
        ProxyError::InvalidHost(format!(
            "Invalid trial URL. Use trialX.{}",
            proxy.config.domain_hint
        ))
    })?;

    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}:{}{}", proxy.config.upstream_host, route.port, path);
    info!(trial = route.trial, port = route.port, "Proxying {} {}", req.method(), path);

    let (parts, body) = req.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::BadRequest(format!("Could not read request body: {e}")))?;

    let upstream = proxy
        .client
        .request(parts.method, &url)
        .headers(request_headers(&parts.headers))
        .body(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_connect() {
                debug!(trial = route.trial, "Upstream refused connection: {}", e);
                ProxyError::Unavailable {
                    trial: route.trial,
                    port: route.port,
                }
            } else {
                warn!(trial = route.trial, "Upstream request failed: {}", e);
                ProxyError::BadGateway(e.to_string())
            }
        })?;

    let mut response = Response::builder().status(upstream.status());
    if let Some(headers) = response.headers_mut() {
        *headers = response_headers(upstream.headers());
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ProxyError::BadGateway(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn strips_host_length_and_hop_headers_from_requests() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("trial1.example.com"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("4"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("text/html"));
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));

        let out = request_headers(&headers);
        assert!(out.get(header::HOST).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert_eq!(out[header::ACCEPT], "text/html");
        assert_eq!(out.get_all(header::COOKIE).iter().count(), 2);
    }

    #[test]
    fn response_keeps_content_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("10"));
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let out = response_headers(&headers);
        assert!(out.get(header::TRANSFER_ENCODING).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(out[header::CONTENT_ENCODING], "gzip");
    }
}
