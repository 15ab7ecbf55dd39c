//! HTTP-level middleware applied to every route.
//!
//! Transport concerns only; nothing here knows about tokens or the cache.
//!
//! Responsibility:
//! - Request-Id generation + propagation (X-Request-Id)
//! - Access logging / request tracing (TraceLayer)
//! - Body size limit
//! - Global timeout
//!
//! Notes:
//! - The timeout is derived from the authority timeout, so a slow authority
//!   surfaces as REMOTE_AUTHORITY from the handler before the layer cuts the request.

use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::http::{StatusCode, header::HeaderName};
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

// Session payloads are small JSON documents.
const BODY_LIMIT: usize = 64 * 1024;
// Headroom over the authority timeout.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Apply HTTP-level middleware to the given Router.
///
/// Defaults:
/// - Request-Id header: `x-request-id`
/// - Body limit: 64 KiB
/// - Timeout: `authority_timeout` + 5 seconds
pub fn apply(router: Router, authority_timeout: Duration) -> Router {
    let request_id_header = HeaderName::from_static("x-request-id");
    let timeout = authority_timeout + TIMEOUT_MARGIN;

    let layers = ServiceBuilder::new()
        // Layer errors (timeouts) become plain status responses; the router needs `Infallible`.
        .layer(HandleErrorLayer::new(|err: BoxError| async move {
            if err.is::<tower::timeout::error::Elapsed>() {
                StatusCode::REQUEST_TIMEOUT
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }))
        // Keep the caller's request id, or mint one, and echo it on the response.
        .layer(SetRequestIdLayer::new(
            request_id_header.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header))
        // Oversized bodies are answered with 413 before any handler runs.
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        // Upper bound for one request, authority round trip included.
        .layer(TimeoutLayer::new(timeout))
        // One span per request; set RUST_LOG=tower_http=debug for per-request lines.
        .layer(TraceLayer::new_for_http());

    router.layer(layers)
}
