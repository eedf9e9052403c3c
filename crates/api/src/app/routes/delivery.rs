use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use osas_core::OrderId;

use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/verify", post(verify))
        .route("/status", post(record_status))
        .route("/exception", post(raise_exception))
        .route("/exception/resolve", post(resolve_exception))
        .route("/:order_id", get(get_delivery))
}

/// Verify a delivered order; no proof of delivery leaves it in exception.
pub async fn verify(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::VerifyDeliveryRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "delivery.verify") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services
        .engine()
        .verify_delivery(tenant.tenant_id(), body.order_id, body.pod_ref, Utc::now())
    {
        Ok(delivery) => (StatusCode::OK, Json(dto::DeliveryView::from(&delivery))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Logistics status update (delivered, cancelled, returned, ...).
pub async fn record_status(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::DeliveryStatusRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "delivery.status") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().record_delivery_status(
        tenant.tenant_id(),
        body.order_id,
        body.status,
        body.pod_ref,
        Utc::now(),
    ) {
        Ok(delivery) => (StatusCode::OK, Json(dto::DeliveryView::from(&delivery))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn raise_exception(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::RaiseExceptionRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "delivery.exception") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().raise_delivery_exception(
        tenant.tenant_id(),
        body.order_id,
        &body.reason,
        Utc::now(),
    ) {
        Ok(delivery) => (StatusCode::OK, Json(dto::DeliveryView::from(&delivery))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Admin override of a delivery exception; the caller is recorded.
pub async fn resolve_exception(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ResolveExceptionRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "delivery.override") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().resolve_delivery_exception(
        tenant.tenant_id(),
        body.order_id,
        principal.user_id(),
        body.resolution,
        Utc::now(),
    ) {
        Ok(delivery) => (StatusCode::OK, Json(dto::DeliveryView::from(&delivery))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_delivery(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(order_id): Path<OrderId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "delivery.read") {
        return r;
    }
    match services.engine().delivery(tenant.tenant_id(), order_id) {
        Ok(delivery) => (StatusCode::OK, Json(dto::DeliveryView::from(&delivery))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
