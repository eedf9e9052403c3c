use axum::response::Response;

use osas_auth::{CommandAuthorization, Permission};

use crate::app::errors;
use crate::authz::authorize_command;
use crate::context::{PrincipalContext, TenantContext};

/// Associates required permissions with a request body.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CmdAuth<C> {
    pub fn new(inner: C, permission: &'static str) -> Self {
        Self {
            inner,
            required: vec![Permission::new(permission)],
        }
    }
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Authorize `inner` for `permission` and hand it back, or a 403.
pub fn guard<C>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    inner: C,
    permission: &'static str,
) -> Result<C, Response> {
    let cmd = CmdAuth::new(inner, permission);
    authorize_command(tenant, principal, &cmd).map_err(errors::authz_error_to_response)?;
    Ok(cmd.inner)
}
