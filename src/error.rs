/*
 * Responsibility
 * - AppError shared by the HTTP handlers
 * - IntoResponse (HTTP status / JSON error body)
 * - Map SessionError kinds and startup failures onto it
 */
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::services::auth::{SessionError, SessionErrorKind};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub messages: Vec<String>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{code}: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("{code}: {message}")]
    Unauthorized { code: &'static str, message: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal server error")]
    Internal,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn missing_header(name: &str) -> Self {
        Self::bad_request("PARAMS_ERROR", format!("Missing {name} header"))
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
        }
    }
}

fn session_status(kind: SessionErrorKind) -> StatusCode {
    match kind {
        SessionErrorKind::WrongTokenFormat => StatusCode::BAD_REQUEST,
        SessionErrorKind::TokenNotValid
        | SessionErrorKind::TokenExpired
        | SessionErrorKind::SecurityCipher => StatusCode::UNAUTHORIZED,
        SessionErrorKind::MaxTokensReached => StatusCode::CONFLICT,
        SessionErrorKind::Backend => StatusCode::SERVICE_UNAVAILABLE,
        SessionErrorKind::RemoteAuthority => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, messages) = match self {
            AppError::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, code, vec![message])
            }
            AppError::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, vec![message])
            }
            AppError::Session(e) => (session_status(e.kind), e.kind.code(), e.messages),
            AppError::Config(e) => {
                tracing::error!(error = %e, "configuration error reached a handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    vec!["internal server error".into()],
                )
            }
            AppError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_SERVER_ERROR",
                vec!["internal server error".into()],
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody { code, messages },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_errors_keep_their_code() {
        let resp = AppError::from(SessionError::expired("t")).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = AppError::from(SessionError::wrong_format("bad")).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = AppError::from(SessionError::new(SessionErrorKind::Backend, "down")).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
