use axum::{Router, routing::get};

pub mod admin;
pub mod common;
pub mod credit;
pub mod delivery;
pub mod recovery;
pub mod repayment;
pub mod risk;
pub mod settlement;
pub mod support;
pub mod system;

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/events/stream", get(system::stream))
        .nest("/credit", credit::router())
        .nest("/delivery", delivery::router())
        .nest("/repayment", repayment::router())
        .nest("/settlement", settlement::router())
        .nest("/risk", risk::router())
        .nest("/recovery", recovery::router())
        .nest("/support", support::router())
        .nest("/admin", admin::router())
}
