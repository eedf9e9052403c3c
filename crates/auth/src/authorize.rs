use thiserror::Error;
use tracing::debug;

use osas_core::TenantId;

use crate::roles::{ADMIN, BUYER, COLLECTIONS, CREDIT_OFFICER, FINANCE};
use crate::{Permission, PrincipalId, Role, TenantMembership};

/// A fully resolved principal for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Commands that declare the permissions needed to issue them.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Pure policy check of one permission within the principal's active tenant.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    if principal
        .membership
        .permissions
        .iter()
        .any(|held| held.grants(required))
    {
        Ok(())
    } else {
        debug!(principal_id = %principal.principal_id, permission = %required, "permission denied");
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Static role policy of the credit engine.
///
/// - `admin`: everything
/// - `credit_officer`: accounts, reservations, delivery gate, risk
/// - `finance`: settlement batches and repayments
/// - `collections`: recovery cases, read access to obligations
/// - `buyer`: pay, skip and convert own obligations
pub fn permissions_for_roles(roles: &[Role]) -> Vec<Permission> {
    let mut out = Vec::new();
    for role in roles {
        let granted: &[&'static str] = match role.as_str() {
            ADMIN => &["*"],
            CREDIT_OFFICER => &["credit.*", "delivery.*", "risk.*"],
            FINANCE => &["settlement.*", "repayment.*", "support.read"],
            COLLECTIONS => &["recovery.*", "repayment.read", "credit.read"],
            BUYER => &[
                "repayment.pay",
                "repayment.skip",
                "repayment.convert_emi",
                "repayment.read",
                "credit.read",
            ],
            _ => &[],
        };
        out.extend(granted.iter().map(|p| Permission::new(*p)));
    }
    out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&'static str]) -> Principal {
        let tenant = TenantId::new();
        let roles: Vec<Role> = roles.iter().map(|r| Role::new(*r)).collect();
        Principal {
            principal_id: PrincipalId::new(),
            active_tenant_id: tenant,
            membership: TenantMembership {
                tenant_id: tenant,
                permissions: permissions_for_roles(&roles),
                roles,
            },
        }
    }

    #[test]
    fn finance_can_approve_batches_but_not_reserve_credit() {
        let p = principal(&["finance"]);
        assert!(authorize(&p, &Permission::new("settlement.approve")).is_ok());
        assert_eq!(
            authorize(&p, &Permission::new("credit.reserve")),
            Err(AuthzError::Forbidden("credit.reserve".to_string()))
        );
    }

    #[test]
    fn admin_is_allowed_everything() {
        let p = principal(&["admin"]);
        assert!(authorize(&p, &Permission::new("recovery.escalate")).is_ok());
    }

    #[test]
    fn tenant_mismatch_is_rejected_before_permissions() {
        let mut p = principal(&["admin"]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::new("credit.read")),
            Err(AuthzError::TenantMismatch)
        );
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let viewer = Role::new("viewer");
        assert!(!viewer.is_known());
        assert!(permissions_for_roles(&[viewer]).is_empty());
        assert!(Role::new(BUYER).is_known());
    }
}
