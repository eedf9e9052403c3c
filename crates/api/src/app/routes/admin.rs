//! Operational endpoints: daily pass trigger and read-model rebuild.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/daily-pass", post(run_daily_pass))
        .route("/read-models/rebuild", post(rebuild_read_models))
}

/// Run the daily pass for the caller's tenant now (or at `at`).
///
/// Safe to repeat: items already done for the day are skipped.
pub async fn run_daily_pass(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Option<Json<dto::DailyPassRequest>>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "admin.daily_pass") {
        return r;
    }
    let at = body.and_then(|Json(b)| b.at).unwrap_or_else(Utc::now);
    let report = services.engine().run_daily_pass(tenant.tenant_id(), at);
    (StatusCode::OK, Json(report)).into_response()
}

pub async fn rebuild_read_models(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "admin.rebuild") {
        return r;
    }
    match services.engine().rebuild_read_models() {
        Ok(replayed) => {
            info!(principal_id = %principal.principal_id(), replayed, "read models rebuilt");
            (StatusCode::OK, Json(json!({ "replayed": replayed }))).into_response()
        }
        Err(e) => errors::engine_error_to_response(e),
    }
}
