use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pulse_core::RescanError;
use serde_json::json;
use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<RescanError> for AppError {
    fn from(err: RescanError) -> Self {
        match err {
            RescanError::UpstreamUnavailable(_) => {
                Self::unavailable(err.to_string())
            }
            RescanError::Validation(msg) => Self::bad_request(msg),
            RescanError::AlreadyRunning => Self::conflict(err.to_string()),
            RescanError::TransientRpc { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, err.to_string())
            }
            RescanError::LogRead { .. } => Self::internal(err.to_string()),
        }
    }
}
