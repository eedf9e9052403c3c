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

use osas_core::RecoveryCaseId;

use crate::app::routes::common::guard;
use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/cases", get(list_open_cases))
        .route("/cases/:id", get(get_case))
        .route("/cases/:id/assign", post(assign_agent))
        .route("/cases/:id/contact", post(record_contact))
        .route("/cases/:id/promise", post(record_promise))
        .route("/cases/:id/escalate", post(escalate))
}

pub async fn list_open_cases(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "recovery.read") {
        return r;
    }
    let items = services
        .engine()
        .read_models()
        .directory()
        .open_recovery_cases(tenant.tenant_id());
    (StatusCode::OK, Json(json!({ "items": items }))).into_response()
}

pub async fn get_case(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(case_id): Path<RecoveryCaseId>,
) -> axum::response::Response {
    if let Err(r) = guard(&tenant, &principal, (), "recovery.read") {
        return r;
    }
    match services.engine().recovery_case(tenant.tenant_id(), case_id) {
        Ok(Some(case)) => (StatusCode::OK, Json(dto::RecoveryCaseView::from(&case))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "recovery case not found"),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn assign_agent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(case_id): Path<RecoveryCaseId>,
    Json(body): Json<dto::AssignAgentRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "recovery.assign") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services
        .engine()
        .assign_agent(tenant.tenant_id(), case_id, body.agent_id, Utc::now())
    {
        Ok(case) => (StatusCode::OK, Json(dto::RecoveryCaseView::from(&case))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn record_contact(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(case_id): Path<RecoveryCaseId>,
    Json(body): Json<dto::ContactRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "recovery.contact") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().record_contact(
        tenant.tenant_id(),
        case_id,
        body.agent_id,
        &body.note,
        Utc::now(),
    ) {
        Ok(case) => (StatusCode::OK, Json(dto::RecoveryCaseView::from(&case))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn record_promise(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(case_id): Path<RecoveryCaseId>,
    Json(body): Json<dto::PromiseRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "recovery.promise") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().record_promise(
        tenant.tenant_id(),
        case_id,
        body.promised_date,
        body.amount,
        Utc::now(),
    ) {
        Ok(case) => (StatusCode::OK, Json(dto::RecoveryCaseView::from(&case))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn escalate(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(case_id): Path<RecoveryCaseId>,
    Json(body): Json<dto::EscalateRequest>,
) -> axum::response::Response {
    let body = match guard(&tenant, &principal, body, "recovery.escalate") {
        Ok(b) => b,
        Err(r) => return r,
    };
    match services.engine().escalate(
        tenant.tenant_id(),
        case_id,
        body.escalated_to,
        &body.reason,
        Utc::now(),
    ) {
        Ok(case) => (StatusCode::OK, Json(dto::RecoveryCaseView::from(&case))).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
