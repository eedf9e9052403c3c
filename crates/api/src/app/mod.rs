//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: ledger store, bus, engine, realtime feed, daily pass job
//! - `routes/`: one file per area (credit, delivery, repayment, ...)
//! - `dto.rs`: request bodies and JSON views
//! - `errors.rs`: rejection codes to HTTP statuses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use osas_infra::config::EngineConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Router over a fresh in-memory engine with default configuration.
pub fn build_app(jwt_secret: String) -> Router {
    let services = Arc::new(services::build_in_memory_services(EngineConfig::default()));
    build_app_with(jwt_secret, services)
}

/// Router over the given services (used by `main.rs`).
pub fn build_app_with(jwt_secret: String, services: Arc<services::AppServices>) -> Router {
    let jwt = Arc::new(osas_auth::Hs256JwtValidator::new(jwt_secret.into_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require auth + tenant context.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
