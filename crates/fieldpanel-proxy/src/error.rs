use axum::response::{IntoResponse, Response};
use http::StatusCode;
use thiserror::Error;

/// Failures are returned to the browser as plain text.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{0}")]
    InvalidHost(String),

    #[error("Trial {trial} VNC not running (port {port})")]
    Unavailable { trial: u32, port: u16 },

    #[error("Upstream error: {0}")]
    BadGateway(String),

    #[error("{0}")]
    BadRequest(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidHost(_) | ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

pub type ProxyResult<T> = Result<T, ProxyError>;
