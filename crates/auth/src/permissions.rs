use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Permission identifier, dotted by area (e.g. "credit.reserve").
///
/// `"*"` grants everything; `"settlement.*"` grants every permission of an area.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn grants(&self, required: &Permission) -> bool {
        if self.is_wildcard() || self == required {
            return true;
        }
        match self.as_str().strip_suffix(".*") {
            Some(area) => required
                .as_str()
                .strip_prefix(area)
                .is_some_and(|rest| rest.starts_with('.')),
            None => false,
        }
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_wildcard_grants_only_its_area() {
        let held = Permission::new("settlement.*");
        assert!(held.grants(&Permission::new("settlement.approve")));
        assert!(!held.grants(&Permission::new("settlements.approve")));
        assert!(!held.grants(&Permission::new("credit.reserve")));
    }
}
