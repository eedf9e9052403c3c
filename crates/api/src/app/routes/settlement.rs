use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use osas_core::BatchId;

use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/approve", post(approve))
        .route("/send", post(send))
        .route("/reconcile", post(reconcile))
        .route("/fail", post(fail))
        .route("/retry", post(retry))
        .route("/abandon", post(abandon))
        .route("/adjustments", post(record_adjustment))
        .route("/batches/:id", get(get_batch))
}

pub async fn generate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::GenerateBatchRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.generate") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let now = Utc::now();
    let cutoff = body.cutoff.unwrap_or(now);
    match services
        .engine()
        .generate_batch(tenant.tenant_id(), body.seller_id, cutoff, now)
    {
        Ok(batch) => (StatusCode::CREATED, Json(dto::BatchView::from(&batch))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// The approver is always the caller; a differing `approverId` is refused.
pub async fn approve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ApproveBatchRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.approve") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let approver = principal.user_id();
    if body.approver_id.is_some_and(|id| id != approver) {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "approverId must match the authenticated caller",
        );
    }
    match services
        .engine()
        .approve_batch(tenant.tenant_id(), body.batch_id, approver, Utc::now())
    {
        Ok(batch) => (StatusCode::OK, Json(dto::BatchView::from(&batch))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn send(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BatchRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.send") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services
        .engine()
        .send_to_bank(tenant.tenant_id(), body.batch_id, Utc::now())
    {
        Ok(batch) => (StatusCode::OK, Json(dto::BatchView::from(&batch))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Bank callback. A mismatch answers 409 and opens a support ticket.
pub async fn reconcile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ReconcileRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.reconcile") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().reconcile_batch(
        tenant.tenant_id(),
        body.batch_id,
        &body.bank_reference,
        body.outcome,
        Utc::now(),
    ) {
        Ok(batch) => (
            StatusCode::OK,
            Json(json!({ "batchId": batch.batch_id, "state": batch.state })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn fail(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::FailBatchRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.fail") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().mark_batch_failed(
        tenant.tenant_id(),
        body.batch_id,
        &body.reason,
        body.retryable,
        false,
        Utc::now(),
    ) {
        Ok(batch) => (StatusCode::OK, Json(dto::BatchView::from(&batch))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn retry(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::BatchRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.approve") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().retry_batch(
        tenant.tenant_id(),
        body.batch_id,
        principal.user_id(),
        Utc::now(),
    ) {
        Ok(batch) => (StatusCode::OK, Json(dto::BatchView::from(&batch))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn abandon(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::AbandonBatchRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.abandon") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services
        .engine()
        .abandon_batch(tenant.tenant_id(), body.batch_id, &body.reason, Utc::now())
    {
        Ok(batch) => (StatusCode::OK, Json(dto::BatchView::from(&batch))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Prior-period deduction, netted against the seller's next batches.
pub async fn record_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::AdjustmentRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "settlement.adjust") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let adjustment_id = body.adjustment_id.unwrap_or_else(Uuid::now_v7);
    match services.engine().record_adjustment(
        tenant.tenant_id(),
        body.seller_id,
        adjustment_id,
        body.amount,
        &body.reason,
        body.reference,
        Utc::now(),
    ) {
        Ok(_) => (
            StatusCode::CREATED,
            Json(json!({ "adjustmentId": adjustment_id, "sellerId": body.seller_id })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(batch_id): Path<BatchId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "settlement.read") {
        return r;
    }
    match services.engine().settlement_batch(tenant.tenant_id(), batch_id) {
        Ok(batch) => (StatusCode::OK, Json(dto::BatchView::from(&batch))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
