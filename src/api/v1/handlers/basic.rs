/*
 * Responsibility
 * - POST /basic/auth   : fixed user/password -> self-issued token
 * - GET  /basic/check  : X-WEB-KEY -> session
 * - GET  /basic/logout : X-WEB-KEY [?_delete_all_tokens]
 */
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use chrono::Utc;
use serde_json::json;

use crate::api::v1::dto::session::{
    BasicAuthRequest, CheckResponse, LogoutQuery, LogoutResponse, TokenResponse,
};
use crate::api::v1::extractors::{ParamsJson, RequestCtx, required_header};
use crate::error::AppError;
use crate::services::auth::authority::HEADER_WEB_KEY;
use crate::services::auth::{SessionError, ValidateOptions, token};
use crate::state::AppState;

pub async fn auth(
    State(state): State<AppState>,
    RequestCtx(ctx): RequestCtx,
    ParamsJson(req): ParamsJson<BasicAuthRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    req.validate()
        .map_err(|m| AppError::bad_request("PARAMS_ERROR", m))?;

    let basic = &state.basic;
    if req.user != basic.user {
        return Err(AppError::unauthorized("SECURITY_ERROR", "wrong user"));
    }
    if req.password != basic.password {
        return Err(AppError::unauthorized("SECURITY_ERROR", "wrong password"));
    }

    let data = json!({ "updated_at": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string() });
    let session = state
        .sessions(ctx)
        .create_token(&req.user, &basic.namespace, data)
        .await?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn check(
    State(state): State<AppState>,
    RequestCtx(ctx): RequestCtx,
    headers: HeaderMap,
) -> Result<Json<CheckResponse>, AppError> {
    let token = self_issued(&headers)?;
    let session = state
        .sessions(ctx)
        .validate(&token, &ValidateOptions::default())
        .await?;

    Ok(Json(CheckResponse {
        is_auth: true,
        session,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    RequestCtx(ctx): RequestCtx,
    headers: HeaderMap,
    Query(q): Query<LogoutQuery>,
) -> Result<Json<LogoutResponse>, AppError> {
    let token = self_issued(&headers)?;
    let all = q.delete_all_tokens.is_some();
    state.sessions(ctx).revoke(&token, all).await?;

    Ok(Json(LogoutResponse {
        is_auth: false,
        delete_all_tokens: all,
    }))
}

// Basic endpoints never reach the authority.
fn self_issued(headers: &HeaderMap) -> Result<String, AppError> {
    let raw = required_header(headers, HEADER_WEB_KEY)?;
    if token::parse(&raw)?.is_remote() {
        return Err(SessionError::not_valid("X-WEB-KEY must carry a self-issued token").into());
    }
    Ok(raw)
}
