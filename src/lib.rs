//! Cached, revocable API tokens backed by a pluggable cache.
//!
//! - [`services::cache`]: namespaced cache store over Valkey, a directory, Postgres
//!   documents or process memory, with TTL / hash / cipher invalidation.
//! - [`services::auth`]: token session manager and the remote identity authority client.
//! - [`api`], [`app`]: the thin axum service exposing both.
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;
