//! Authorization guard at the command boundary.
//!
//! Runs before anything is dispatched, so the engine and aggregates stay
//! auth-agnostic.

use osas_auth::{AuthzError, CommandAuthorization, authorize};

use crate::context::{PrincipalContext, TenantContext};

/// Check every permission the command requires in the current request context.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let principal = principal.in_tenant(tenant);
    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use osas_auth::{Permission, PrincipalId, Role};
    use osas_core::TenantId;

    struct Needs(Vec<Permission>);

    impl CommandAuthorization for Needs {
        fn required_permissions(&self) -> &[Permission] {
            &self.0
        }
    }

    fn ctx(roles: &[&'static str]) -> (TenantContext, PrincipalContext) {
        (
            TenantContext::new(TenantId::new()),
            PrincipalContext::new(PrincipalId::new(), roles.iter().map(|r| Role::new(*r)).collect()),
        )
    }

    #[test]
    fn finance_may_approve_batches_but_not_reserve_credit() {
        let (tenant, principal) = ctx(&["finance"]);
        let approve = Needs(vec![Permission::new("settlement.approve")]);
        let reserve = Needs(vec![Permission::new("credit.reserve")]);

        assert!(authorize_command(&tenant, &principal, &approve).is_ok());
        assert!(authorize_command(&tenant, &principal, &reserve).is_err());
    }

    #[test]
    fn every_required_permission_must_be_granted() {
        let (tenant, principal) = ctx(&["buyer"]);
        let both = Needs(vec![
            Permission::new("repayment.pay"),
            Permission::new("repayment.write_off"),
        ]);
        assert!(authorize_command(&tenant, &principal, &both).is_err());
    }
}
