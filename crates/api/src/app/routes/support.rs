use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new().route("/tickets", get(list_tickets))
}

/// Tickets opened for failures that need a human, oldest first.
pub async fn list_tickets(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "support.read") {
        return r;
    }
    let items = services.engine().tickets().list(tenant.tenant_id());
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}
