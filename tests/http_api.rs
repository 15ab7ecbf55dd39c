//! Router-level checks through `tower::ServiceExt::oneshot`.
mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use cached_auth::app::build_router;
use cached_auth::services::auth::{IdentityAuthority, SessionPolicy};
use cached_auth::services::cache::{CacheSettings, MemoryBackend};
use cached_auth::state::{AppState, BasicCredentials};
use common::ScriptedAuthority;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(authority: Option<Arc<ScriptedAuthority>>) -> Router {
    let state = AppState::new(
        Arc::new(MemoryBackend::new()),
        authority.map(|a| a as Arc<dyn IdentityAuthority>),
        CacheSettings::new("http").with_app_prefix("test"),
        SessionPolicy::default(),
        BasicCredentials {
            user: "test".into(),
            password: "password".into(),
            namespace: "_apis".into(),
        },
    );
    build_router(state, Duration::from_secs(2))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), 1 << 20).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_with(uri: &str, headers: &[(&str, &str)]) -> Request<Body> {
    let mut req = Request::get(uri);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    req.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_reports_backend() {
    let app = app(None);
    let (status, body) = send(&app, get_with("/health", &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok", "cache": "memory"}));
}

#[tokio::test]
async fn basic_login_check_logout() {
    let app = app(None);

    let (status, body) = send(
        &app,
        post_json("/api/v1/basic/auth", json!({"user": "test", "password": "password"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("token__test___apis__"));
    assert!(body["data"]["updated_at"].is_string());

    let (status, body) = send(&app, get_with("/api/v1/basic/check", &[("X-WEB-KEY", &token)])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_auth"], json!(true));
    assert_eq!(body["identity_id"], json!("test"));
    assert_eq!(body["active_tokens"], json!(1));

    let (status, body) =
        send(&app, get_with("/api/v1/basic/logout", &[("X-WEB-KEY", &token)])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"is_auth": false, "delete_all_tokens": false}));

    let (status, body) = send(&app, get_with("/api/v1/basic/check", &[("X-WEB-KEY", &token)])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("TOKEN_NOT_VALID"));
}

#[tokio::test]
async fn basic_rejects_bad_credentials_and_headers() {
    let app = app(None);

    let (status, body) = send(
        &app,
        post_json("/api/v1/basic/auth", json!({"user": "test", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("SECURITY_ERROR"));

    let (status, body) = send(&app, get_with("/api/v1/basic/check", &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("PARAMS_ERROR"));

    let (status, body) =
        send(&app, get_with("/api/v1/basic/check", &[("X-WEB-KEY", "garbage")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("WRONG_TOKEN_FORMAT"));

    // Remote tokens never pass the basic endpoints.
    let (status, _) = send(
        &app,
        get_with("/api/v1/basic/check", &[("X-WEB-KEY", "acme__bob__t1")]),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_bodies_are_params_errors() {
    let app = app(None);

    let (status, body) = send(&app, post_json("/api/v1/basic/auth", json!({"user": "test"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("PARAMS_ERROR"));
    assert!(body["error"]["messages"][0].as_str().unwrap().contains("password"));

    let req = Request::post("/api/v1/erp/auth")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("PARAMS_ERROR"));
}

#[tokio::test]
async fn erp_sign_in_and_cached_check() {
    let authority = Arc::new(ScriptedAuthority::new());
    let app = app(Some(authority.clone()));

    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/erp/auth",
            json!({
                "user": "bob",
                "password": "secret",
                "namespace": "acme",
                "integration_key": "ik"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("acme__bob__"));

    let headers = [("X-DS-TOKEN", token.as_str()), ("X-EXTRA-INFO", "ik")];
    let (status, body) = send(&app, get_with("/api/v1/erp/check", &headers)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["namespace"], json!("acme"));
    assert_eq!(authority.checks(), 0);

    let (status, _) = send(&app, get_with("/api/v1/erp/check?_update=1", &headers)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(authority.checks(), 1);

    let (status, body) = send(
        &app,
        get_with("/api/v1/erp/logout?_delete_all_tokens=1", &headers),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["delete_all_tokens"], json!(true));
}

#[tokio::test]
async fn erp_wrong_password_is_not_valid() {
    let app = app(Some(Arc::new(ScriptedAuthority::new())));
    let (status, body) = send(
        &app,
        post_json(
            "/api/v1/erp/auth",
            json!({
                "user": "bob",
                "password": "wrong",
                "namespace": "acme",
                "integration_key": "ik"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("TOKEN_NOT_VALID"));
}
