use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Operator with every permission in the tenant.
pub const ADMIN: &str = "admin";
/// Opens accounts, manages limits, runs the delivery gate and risk.
pub const CREDIT_OFFICER: &str = "credit_officer";
/// Settlement batches and repayments.
pub const FINANCE: &str = "finance";
/// Recovery agents.
pub const COLLECTIONS: &str = "collections";
/// Retailer or designer acting on their own obligations.
pub const BUYER: &str = "buyer";

/// Role name carried in the token. Unknown names grant nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_known(&self) -> bool {
        matches!(self.as_str(), ADMIN | CREDIT_OFFICER | FINANCE | COLLECTIONS | BUYER)
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
