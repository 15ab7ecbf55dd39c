/*
 * Responsibility
 * - tracing / panic hook setup
 * - Config -> cache backend + identity authority -> Router
 * - axum::serve() startup
 */
use axum::{Router, routing::get};
use std::{panic, process, time::Duration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::api::v1::handlers::health::health;
use crate::config::Config;
use crate::error::AppError;
use crate::middleware;
use crate::services::auth::build_authority;
use crate::services::cache::build_backend;
use crate::state::{AppState, BasicCredentials};

fn init_tracing() {
    // RUST_LOG wins when set, e.g.
    // RUST_LOG=info,cached_auth=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // The default hook still prints location and payload to stderr.
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Route the panic through tracing as well; stderr may not be collected.
        tracing::error!(?info, "panic");

        // Development: crash the whole process so it is noticed.
        // Production: default hook, keep serving.
        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<(), AppError> {
    init_tracing();
    let config = Config::from_env()?;

    let abort_on_panic = !config.app_env.is_production();
    init_panic_hook(abort_on_panic);

    tracing::info!(
        "starting in {:?} mode on {} (cache backend: {})",
        config.app_env,
        config.addr,
        config.backend.kind
    );

    let state = build_state(&config)?;
    let app = build_router(state, config.authority_timeout);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|e| {
            tracing::error!(addr = %config.addr, error = %e, "bind failed");
            AppError::Internal
        })?;
    axum::serve(listener, app).await.map_err(|e| {
        tracing::error!(error = %e, "server stopped");
        AppError::Internal
    })?;

    Ok(())
}

/// Process-level services, built once and shared by every request.
///
/// A Valkey backend connects on first use; a missing host leaves it disabled.
pub fn build_state(config: &Config) -> Result<AppState, AppError> {
    let backend = build_backend(&config.backend).map_err(|e| {
        tracing::error!(backend = %config.backend.kind, error = %e, "cache backend unavailable");
        AppError::Internal
    })?;
    // None without AUTHORITY_URL: self-issued tokens still work, remote ones are refused.
    let authority = build_authority(config)?;

    let basic = BasicCredentials {
        user: config.basic_user.clone(),
        password: config.basic_password.clone(),
        namespace: config.basic_namespace.clone(),
    };

    Ok(AppState::new(
        backend,
        authority,
        config.cache_settings(),
        config.session_policy(),
        basic,
    ))
}

/// `/health` plus the versioned API, wrapped in the HTTP middleware stack.
pub fn build_router(state: AppState, authority_timeout: Duration) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api::v1::routes())
        .with_state(state);

    middleware::http::apply(router, authority_timeout)
}
