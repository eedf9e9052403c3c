use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use uuid::Uuid;

use osas_core::{EmiPlanId, ObligationId};

use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/pay", post(pay))
        .route("/skip", post(skip))
        .route("/convert-emi", post(convert_emi))
        .route("/emi/pay", post(pay_installment))
        .route("/emi/:id", get(get_emi_plan))
        .route("/write-off", post(write_off))
        .route("/obligations/:id", get(get_obligation))
}

pub async fn pay(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PayRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "repayment.pay") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let payment_id = body.payment_id.unwrap_or_else(Uuid::now_v7);
    match services.engine().pay(
        tenant.tenant_id(),
        body.obligation_id,
        payment_id,
        body.amount,
        body.method,
        Utc::now(),
    ) {
        Ok(obligation) => (StatusCode::OK, Json(dto::ObligationView::from(&obligation))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn skip(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::SkipRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "repayment.skip") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services
        .engine()
        .request_skip(tenant.tenant_id(), body.obligation_id, Utc::now())
    {
        Ok(obligation) => (StatusCode::OK, Json(dto::ObligationView::from(&obligation))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn convert_emi(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::ConvertEmiRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "repayment.convert_emi") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let obligations = body.obligations();
    if obligations.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "obligationId or obligationIds is required",
        );
    }
    let policy = &services.engine().config().repayment;
    if body.tenure_months.is_some_and(|t| !policy.allows_tenure(t)) {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("tenureMonths must be between 1 and {}", policy.emi_max_tenure_months),
        );
    }
    match services
        .engine()
        .convert_to_emi(tenant.tenant_id(), &obligations, body.tenure_months, Utc::now())
    {
        Ok(plan) => (StatusCode::CREATED, Json(dto::EmiPlanView::from(&plan))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn pay_installment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::PayInstallmentRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "repayment.pay") {
        Ok(b) => b,
        Err(r) => return r,
    };
    let payment_id = body.payment_id.unwrap_or_else(Uuid::now_v7);
    match services.engine().pay_installment(
        tenant.tenant_id(),
        body.plan_id,
        payment_id,
        body.installment_number,
        body.amount,
        Utc::now(),
    ) {
        Ok(plan) => (StatusCode::OK, Json(dto::EmiPlanView::from(&plan))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Write off the remaining balance; the caller is recorded as approver.
pub async fn write_off(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::WriteOffRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "repayment.write_off") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().write_off(
        tenant.tenant_id(),
        body.obligation_id,
        &body.reason,
        principal.user_id(),
        Utc::now(),
    ) {
        Ok(obligation) => (StatusCode::OK, Json(dto::ObligationView::from(&obligation))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_obligation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(obligation_id): Path<ObligationId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "repayment.read") {
        return r;
    }
    match services.engine().obligation(tenant.tenant_id(), obligation_id) {
        Ok(obligation) => (StatusCode::OK, Json(dto::ObligationView::from(&obligation))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_emi_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(plan_id): Path<EmiPlanId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "repayment.read") {
        return r;
    }
    match services.engine().emi_plan(tenant.tenant_id(), plan_id) {
        Ok(plan) => (StatusCode::OK, Json(dto::EmiPlanView::from(&plan))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
