/*
 * Responsibility
 * - v1 URL layout
 * - /basic/... (self-issued tokens), /erp/... (authority-issued tokens)
 */
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::v1::handlers::{basic, erp};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/basic/auth", post(basic::auth))
        .route("/basic/check", get(basic::check))
        .route("/basic/logout", get(basic::logout))
        .route("/erp/auth", post(erp::auth))
        .route("/erp/check", get(erp::check))
        .route("/erp/logout", get(erp::logout))
}
