use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use osas_auth::AuthzError;
use osas_core::RejectionCode;
use osas_infra::EngineError;
use osas_infra::command_dispatcher::DispatchError;

/// HTTP status for a stable rejection code.
pub fn rejection_status(code: RejectionCode) -> StatusCode {
    match code {
        RejectionCode::InsufficientCredit
        | RejectionCode::AlreadyReleased
        | RejectionCode::AlreadyCommitted
        | RejectionCode::AlreadyConverted
        | RejectionCode::StaleVersion
        | RejectionCode::BankReconciliationMismatch => StatusCode::CONFLICT,
        RejectionCode::AccountFrozen => StatusCode::LOCKED,
        RejectionCode::OverpaymentRejected => StatusCode::BAD_REQUEST,
        RejectionCode::SkipLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        RejectionCode::VerificationException | RejectionCode::InvalidState => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RejectionCode::LimitIncreaseRequiresApproval => StatusCode::FORBIDDEN,
    }
}

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Dispatch(e) => dispatch_error_to_response(e),
        EngineError::UnknownEntity { kind, id } => {
            entity_error(StatusCode::NOT_FOUND, "not_found", format!("{kind} not found"), id)
        }
        EngineError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        EngineError::InFlight { key } => entity_error(
            StatusCode::CONFLICT,
            "in_flight",
            "operation already running for this scope",
            key,
        ),
        e @ (EngineError::Lease(_) | EngineError::Projection(_)) => {
            error!(error = %e, "engine infrastructure failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> axum::response::Response {
    match err {
        DispatchError::Rejected { code, entity_id } => entity_error(
            rejection_status(code),
            code.as_str(),
            code.to_string(),
            entity_id,
        ),
        DispatchError::StaleVersion { aggregate_id, attempts } => entity_error(
            StatusCode::CONFLICT,
            RejectionCode::StaleVersion.as_str(),
            format!("gave up after {attempts} attempts"),
            aggregate_id.to_string(),
        ),
        DispatchError::Concurrency(msg) => {
            json_error(StatusCode::CONFLICT, RejectionCode::StaleVersion.as_str(), msg)
        }
        DispatchError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        DispatchError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DispatchError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        DispatchError::Unauthorized => json_error(StatusCode::FORBIDDEN, "unauthorized", "unauthorized"),
        DispatchError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        DispatchError::TenantIsolation(msg) => json_error(StatusCode::FORBIDDEN, "tenant_isolation", msg),
        e @ (DispatchError::Deserialize(_) | DispatchError::Store(_) | DispatchError::Publish(_)) => {
            error!(error = %e, "ledger failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn authz_error_to_response(err: AuthzError) -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", err.to_string())
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn entity_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    entity_id: String,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "entity_id": entity_id,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes_map_to_distinct_statuses() {
        assert_eq!(rejection_status(RejectionCode::InsufficientCredit), StatusCode::CONFLICT);
        assert_eq!(rejection_status(RejectionCode::AccountFrozen), StatusCode::LOCKED);
        assert_eq!(rejection_status(RejectionCode::OverpaymentRejected), StatusCode::BAD_REQUEST);
        assert_eq!(rejection_status(RejectionCode::SkipLimitExceeded), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            rejection_status(RejectionCode::VerificationException),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn store_failures_do_not_leak_details() {
        let res = dispatch_error_to_response(DispatchError::Deserialize("column xyz".into()));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn unknown_entity_is_not_found() {
        let res = engine_error_to_response(EngineError::UnknownEntity {
            kind: "credit account",
            id: "abc".into(),
        });
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
