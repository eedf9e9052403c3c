use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use osas_core::CreditAccountId;

use crate::app::errors;
use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/:account_id", get(get_risk))
        .route("/:account_id/recompute", post(recompute))
}

/// Current score, level, recommended limit and assessment history.
pub async fn get_risk(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(account_id): Path<CreditAccountId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "risk.read") {
        return r;
    }
    match services.engine().risk_view(tenant.tenant_id(), account_id) {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn recompute(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(account_id): Path<CreditAccountId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "risk.recompute") {
        return r;
    }
    match services
        .engine()
        .recompute_risk(tenant.tenant_id(), account_id, Utc::now())
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
