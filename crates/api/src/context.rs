//! Per-request identity, resolved once by the auth middleware.

use osas_auth::{Permission, Principal, PrincipalId, Role, TenantMembership, permissions_for_roles};
use osas_core::{TenantId, UserId};

/// The tenant every ledger operation of the request runs in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Caller identity with the permissions its roles expand to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        let permissions = permissions_for_roles(&roles);
        Self {
            principal_id,
            roles,
            permissions,
        }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    /// Identity recorded on approvals and manual overrides.
    pub fn user_id(&self) -> UserId {
        self.principal_id.as_user()
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn unknown_roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.iter().filter(|r| !r.is_known())
    }

    /// Policy view of the caller acting inside `tenant`.
    pub fn in_tenant(&self, tenant: &TenantContext) -> Principal {
        Principal {
            principal_id: self.principal_id,
            active_tenant_id: tenant.tenant_id(),
            membership: TenantMembership {
                tenant_id: tenant.tenant_id(),
                roles: self.roles.clone(),
                permissions: self.permissions.clone(),
            },
        }
    }
}
