//! `osas-auth`: authentication and authorization boundary for the credit engine.
//!
//! Decoupled from HTTP and storage: the API layer feeds it bearer tokens and
//! asks it permission questions.

pub mod authorize;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod roles;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize, permissions_for_roles};
pub use claims::{Hs256JwtValidator, JwtClaims, JwtValidator, TokenValidationError, validate_claims};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use roles::Role;
