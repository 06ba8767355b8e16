use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use fieldpanel_core::FieldPanelError;
use serde_json::json;
use thiserror::Error;

/// Errors returned by handlers. The message is sent to the dashboard as
/// `detail`, so variants display their text verbatim.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    /// Missing or wrong Basic credentials; challenges the browser.
    #[error("{0}")]
    Unauthorized(String),

    /// Rejected form login; no challenge header.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) | ApiError::InvalidCredentials(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<FieldPanelError> for ApiError {
    fn from(err: FieldPanelError) -> Self {
        match err {
            FieldPanelError::NotFound(msg) => ApiError::NotFound(msg),
            FieldPanelError::InvalidInput(msg) => ApiError::BadRequest(msg),
            FieldPanelError::Process(msg)
            | FieldPanelError::Timeout(msg)
            | FieldPanelError::Unavailable(msg) => ApiError::Internal(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "detail": self.to_string(),
            "status": status.as_u16()
        }));

        let mut response = (status, body).into_response();
        if matches!(self, ApiError::Unauthorized(_)) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
        }
        response
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
