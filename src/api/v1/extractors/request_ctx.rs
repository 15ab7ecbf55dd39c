use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use chrono::Utc;

use crate::error::AppError;
use crate::services::context::{RequestContext, RequestFingerprint};
use crate::state::AppState;

/// Handler-side access to the caller's `RequestContext`, built from request headers.
pub struct RequestCtx(pub RequestContext);

impl FromRequestParts<AppState> for RequestCtx
where
    AppState: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        // First hop of X-Forwarded-For, then X-Real-IP.
        let ip = header_value(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .or_else(|| header_value(headers, "x-real-ip"));

        let fingerprint = RequestFingerprint::new(
            header_value(headers, header::USER_AGENT.as_str()).as_deref(),
            header_value(headers, header::HOST.as_str()).as_deref(),
            ip.as_deref(),
            header_value(headers, header::REFERER.as_str()).as_deref(),
            Some(parts.uri.path()),
            Utc::now(),
        );

        Ok(RequestCtx(RequestContext::new(fingerprint)))
    }
}

pub fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn required_header(headers: &HeaderMap, name: &str) -> Result<String, AppError> {
    header_value(headers, name).ok_or_else(|| AppError::missing_header(name))
}
