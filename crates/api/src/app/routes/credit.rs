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

use osas_core::CreditAccountId;
use osas_infra::ReserveRequest;

use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/accounts", post(open_account))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/freeze", post(freeze_account))
        .route("/accounts/:id/unfreeze", post(unfreeze_account))
        .route("/accounts/:id/limit", post(adjust_limit))
        .route("/reserve", post(reserve))
        .route("/commit", post(commit))
        .route("/release", post(release))
}

pub async fn open_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::OpenAccountRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "credit.accounts.open") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let account_id = body.account_id.unwrap_or_else(CreditAccountId::generate);

    match services.engine().open_account(
        tenant.tenant_id(),
        account_id,
        body.owner_id,
        body.buyer_kind,
        body.credit_limit,
        Utc::now(),
    ) {
        Ok(account) => (StatusCode::CREATED, Json(dto::AccountView::from(&account))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(account_id): Path<CreditAccountId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "credit.read") {
        return r;
    }
    match services.engine().account(tenant.tenant_id(), account_id) {
        Ok(account) => (StatusCode::OK, Json(dto::AccountView::from(&account))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn freeze_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(account_id): Path<CreditAccountId>,
    Json(body): Json<dto::FreezeRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "credit.accounts.freeze") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services
        .engine()
        .freeze(tenant.tenant_id(), account_id, &body.reason, Utc::now())
    {
        Ok(account) => (StatusCode::OK, Json(dto::AccountView::from(&account))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn unfreeze_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(account_id): Path<CreditAccountId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "credit.accounts.freeze") {
        return r;
    }
    match services
        .engine()
        .unfreeze(tenant.tenant_id(), account_id, Utc::now())
    {
        Ok(account) => (StatusCode::OK, Json(dto::AccountView::from(&account))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Manual limit change; the caller is recorded as approver.
pub async fn adjust_limit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(account_id): Path<CreditAccountId>,
    Json(body): Json<dto::AdjustLimitRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "credit.limit.adjust") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().adjust_limit(
        tenant.tenant_id(),
        account_id,
        body.new_limit,
        &body.reason,
        principal.user_id(),
        Utc::now(),
    ) {
        Ok(account) => (StatusCode::OK, Json(dto::AccountView::from(&account))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn reserve(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ReserveRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "credit.reserve") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let request = ReserveRequest {
        account_id: body.account_id,
        order_id: body.order_id,
        seller_id: body.seller_id,
        amount: body.amount,
        auto_approve_pod: body.auto_approve_pod,
    };
    match services
        .engine()
        .reserve(tenant.tenant_id(), request, Utc::now())
    {
        Ok(reservation_id) => (
            StatusCode::CREATED,
            Json(json!({ "reservationId": reservation_id })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn commit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CommitRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "credit.commit") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services
        .engine()
        .commit(tenant.tenant_id(), body.reservation_id, Utc::now())
    {
        Ok(obligation_id) => (StatusCode::OK, Json(json!({ "obligationId": obligation_id }))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ReleaseRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "credit.release") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let reason = body.reason.as_deref().unwrap_or("released by request");
    match services
        .engine()
        .release(tenant.tenant_id(), body.reservation_id, reason, Utc::now())
    {
        Ok(account) => (StatusCode::OK, Json(dto::AccountView::from(&account))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
