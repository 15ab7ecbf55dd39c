/*
 * Responsibility
 * - POST /erp/auth   : sign in against the identity authority
 * - GET  /erp/check  : X-DS-TOKEN + X-EXTRA-INFO [?_update]
 * - GET  /erp/logout : X-DS-TOKEN + X-EXTRA-INFO [?_delete_all_tokens]
 */
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};

use crate::api::v1::dto::session::{
    CheckQuery, CheckResponse, ErpAuthRequest, LogoutQuery, LogoutResponse, TokenResponse,
};
use crate::api::v1::extractors::{ParamsJson, RequestCtx, required_header};
use crate::error::AppError;
use crate::services::auth::ValidateOptions;
use crate::services::auth::authority::{HEADER_DS_TOKEN, HEADER_EXTRA_INFO};
use crate::state::AppState;

pub async fn auth(
    State(state): State<AppState>,
    RequestCtx(ctx): RequestCtx,
    ParamsJson(req): ParamsJson<ErpAuthRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), AppError> {
    req.validate()
        .map_err(|m| AppError::bad_request("PARAMS_ERROR", m))?;

    let session = state
        .sessions(ctx)
        .sign_in(
            &req.namespace,
            &req.user,
            &req.password,
            Some(&req.integration_key),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(session.into())))
}

pub async fn check(
    State(state): State<AppState>,
    RequestCtx(ctx): RequestCtx,
    headers: HeaderMap,
    Query(q): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, AppError> {
    let token = required_header(&headers, HEADER_DS_TOKEN)?;
    let integration_key = required_header(&headers, HEADER_EXTRA_INFO)?;

    let opts = ValidateOptions {
        refresh: q.update.is_some(),
        integration_key: Some(integration_key),
    };
    let session = state.sessions(ctx).validate(&token, &opts).await?;

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
    let token = required_header(&headers, HEADER_DS_TOKEN)?;
    // Required for parity with /erp/check even though revocation is local.
    required_header(&headers, HEADER_EXTRA_INFO)?;

    let all = q.delete_all_tokens.is_some();
    state.sessions(ctx).revoke(&token, all).await?;

    Ok(Json(LogoutResponse {
        is_auth: false,
        delete_all_tokens: all,
    }))
}
